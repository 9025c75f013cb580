//! The service context.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use tracing::info;

use auricle_effect::{BUNDLED_LIBRARY_NAME, BundledLibrary, EffectLibrary};
use auricle_engine::{EffectChainManager, EnhanceChainManager, HeadTracker, PostureSensor};
use auricle_hal::HdiParamProxy;

use crate::config::ServiceConfig;
use crate::{Result, ServerError};

static INSTALLED: OnceLock<Arc<AudioEffectService>> = OnceLock::new();

/// Owns the playback and capture chain managers.
///
/// There is exactly one per process in production, installed into the
/// module-loader slot with [`install`](AudioEffectService::install);
/// everything else receives the context by reference.
pub struct AudioEffectService {
    manager: Arc<EffectChainManager>,
    enhance: Arc<EnhanceChainManager>,
    providers: HashMap<String, Arc<dyn EffectLibrary>>,
}

impl AudioEffectService {
    /// Service over the given HDI proxy and posture sensor, with the
    /// bundled effect library pre-registered as a provider.
    pub fn new(hdi: HdiParamProxy, sensor: Arc<dyn PostureSensor>) -> Self {
        let head_tracker = HeadTracker::new(sensor);
        let mut providers: HashMap<String, Arc<dyn EffectLibrary>> = HashMap::new();
        providers.insert(BUNDLED_LIBRARY_NAME.to_string(), BundledLibrary::new());
        AudioEffectService {
            manager: Arc::new(EffectChainManager::new(hdi, head_tracker)),
            enhance: Arc::new(EnhanceChainManager::new()),
            providers,
        }
    }

    /// Offer an additional library provider for configs to reference.
    pub fn register_provider(&mut self, name: &str, library: Arc<dyn EffectLibrary>) {
        self.providers.insert(name.to_string(), library);
    }

    /// Initialize both managers from a configuration.
    pub fn init(&self, config: &ServiceConfig) {
        self.manager.init(&config.chain_manager_config(&self.providers));
        self.enhance
            .init(&config.enhance_manager_config(&self.providers));
        info!("audio effect service initialized");
    }

    /// The playback chain manager.
    pub fn manager(&self) -> &Arc<EffectChainManager> {
        &self.manager
    }

    /// The capture chain manager.
    pub fn enhance(&self) -> &Arc<EnhanceChainManager> {
        &self.enhance
    }

    /// Install the process-wide instance the module adapters resolve.
    /// The first installation wins; later calls return the winner.
    pub fn install(service: Arc<AudioEffectService>) -> Arc<AudioEffectService> {
        Arc::clone(INSTALLED.get_or_init(|| service))
    }

    /// The installed instance, if any.
    pub fn installed() -> Result<Arc<AudioEffectService>> {
        INSTALLED.get().cloned().ok_or(ServerError::NotInstalled)
    }
}

impl std::fmt::Debug for AudioEffectService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioEffectService")
            .field("manager", &self.manager)
            .field("enhance", &self.enhance)
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auricle_engine::NullPostureSensor;

    #[test]
    fn service_boots_from_empty_config() {
        let service = AudioEffectService::new(
            HdiParamProxy::disconnected(),
            Arc::new(NullPostureSensor::default()),
        );
        service.init(&ServiceConfig::default());
        assert!(!service.manager().offload_enabled());
        assert_eq!(service.enhance().chain_count(), 0);
    }
}
