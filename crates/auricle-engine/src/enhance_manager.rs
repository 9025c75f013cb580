//! Capture-side chain manager.
//!
//! Mirrors the playback manager for the enhance pipeline, with simpler
//! keying: one chain per (scene, up-device, down-device) triple, no
//! refcounting. Duplicate creation for a live key is an error.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{info, warn};

use auricle_core::{EffectMode, EffectScene, EnhanceBufferAttr};
use auricle_effect::{EffectBinding, EffectRegistry, EnhanceChain, LibraryRegistration};

use crate::manager::ChainRecipe;
use crate::{EngineError, Result};

/// One enhance recipe plus the (scene, mode) pair that selects it.
#[derive(Debug, Clone)]
pub struct EnhanceRecipe {
    /// Scene.
    pub scene: EffectScene,
    /// Mode within the scene.
    pub mode: EffectMode,
    /// Recipe name.
    pub chain_name: String,
}

/// Boot input for [`EnhanceChainManager::init`].
#[derive(Debug, Clone, Default)]
pub struct EnhanceManagerConfig {
    /// Libraries to register.
    pub libraries: Vec<LibraryRegistration>,
    /// Effect name → library bindings.
    pub effects: Vec<EffectBinding>,
    /// Chain recipes.
    pub chains: Vec<ChainRecipe>,
    /// (scene, mode) → recipe mappings.
    pub scene_map: Vec<EnhanceRecipe>,
}

/// AEC reference channels each capture scene expects.
fn ref_channels_for(scene: EffectScene) -> u32 {
    match scene {
        // voice scenes carry a playback reference for echo cancellation
        EffectScene::Speech => 1,
        _ => 0,
    }
}

struct EnhanceState {
    registry: Option<EffectRegistry>,
    chain_recipes: HashMap<String, Vec<String>>,
    scene_map: HashMap<(EffectScene, EffectMode), String>,
    chains: HashMap<String, Arc<EnhanceChain>>,
    up_and_down_device: String,
    initialized: bool,
}

/// Manager for capture (enhance) chains.
pub struct EnhanceChainManager {
    state: Mutex<EnhanceState>,
}

impl EnhanceChainManager {
    /// New, uninitialized manager.
    pub fn new() -> Self {
        EnhanceChainManager {
            state: Mutex::new(EnhanceState {
                registry: None,
                chain_recipes: HashMap::new(),
                scene_map: HashMap::new(),
                chains: HashMap::new(),
                up_and_down_device: String::new(),
                initialized: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EnhanceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load libraries, recipes, and the scene map.
    pub fn init(&self, config: &EnhanceManagerConfig) {
        let mut state = self.lock();
        state.registry = Some(EffectRegistry::load(&config.libraries, &config.effects));
        state.chain_recipes = config
            .chains
            .iter()
            .map(|recipe| (recipe.name.clone(), recipe.apply.clone()))
            .collect();
        state.scene_map = config
            .scene_map
            .iter()
            .map(|entry| ((entry.scene, entry.mode), entry.chain_name.clone()))
            .collect();
        state.initialized = true;
        info!(
            recipes = state.chain_recipes.len(),
            "enhance chain manager initialized"
        );
    }

    fn chain_key(scene: EffectScene, up_and_down: &str) -> String {
        format!("{scene}_&_{up_and_down}")
    }

    /// Build the enhance chain for `(scene, up/down device)`.
    pub fn create_chain(
        &self,
        scene: EffectScene,
        mode: EffectMode,
        up_and_down_device: &str,
    ) -> Result<()> {
        let mut state = self.lock();
        if !state.initialized {
            return Err(EngineError::NotInitialized);
        }
        state.up_and_down_device = up_and_down_device.to_string();
        let key = Self::chain_key(scene, up_and_down_device);
        if state.chains.contains_key(&key) {
            return Err(EngineError::DuplicateEnhanceChain(key));
        }

        let chain = Arc::new(EnhanceChain::new(scene));
        chain.set_mode(mode);
        let chain_name = state
            .scene_map
            .get(&(scene, mode))
            .cloned()
            .unwrap_or_else(|| EffectMode::None.wire_name().to_string());
        let effects = state
            .chain_recipes
            .get(&chain_name)
            .cloned()
            .unwrap_or_default();
        let registry = state.registry.as_ref().ok_or(EngineError::NotInitialized)?;
        for effect in &effects {
            match registry.create_effect(effect) {
                Ok((handle, library)) => {
                    let _ = chain.add_enhance_handle(handle, library);
                }
                Err(err) => {
                    warn!(effect = %effect, %err, "creating enhance effect failed, skipping");
                }
            }
        }
        if chain.is_empty() {
            info!(%scene, "enhance chain is empty, capture passes through");
        }
        state.chains.insert(key, chain);
        Ok(())
    }

    /// Tear down the chain for `(scene, up/down device)`.
    pub fn release_chain(&self, scene: EffectScene, up_and_down_device: &str) -> Result<()> {
        let mut state = self.lock();
        if !state.initialized {
            return Err(EngineError::NotInitialized);
        }
        let key = Self::chain_key(scene, up_and_down_device);
        if let Some(chain) = state.chains.remove(&key) {
            chain.release();
        }
        Ok(())
    }

    /// Run the chain over one capture frame. A missing or empty chain
    /// passes the frame through and reports an error.
    pub fn apply_chain(
        &self,
        scene: EffectScene,
        up_and_down_device: &str,
        attr: &mut EnhanceBufferAttr,
    ) -> Result<()> {
        let chain = {
            let state = self.lock();
            let key = Self::chain_key(scene, up_and_down_device);
            match state.chains.get(&key) {
                Some(chain) => Arc::clone(chain),
                None => {
                    let len = attr.output.len().min(attr.input.len());
                    let input = std::mem::take(&mut attr.input);
                    attr.output[..len].copy_from_slice(&input[..len]);
                    attr.input = input;
                    return Err(EngineError::MissingChain {
                        scene,
                        device: auricle_core::DeviceType::None,
                    });
                }
            }
        };
        attr.ref_count = ref_channels_for(scene);
        chain.apply(attr)?;
        Ok(())
    }

    /// The up/down device pair the last created chain was keyed with.
    pub fn up_and_down_device(&self) -> String {
        self.lock().up_and_down_device.clone()
    }

    /// Number of live enhance chains.
    pub fn chain_count(&self) -> usize {
        self.lock().chains.len()
    }
}

impl Default for EnhanceChainManager {
    fn default() -> Self {
        EnhanceChainManager::new()
    }
}

impl std::fmt::Debug for EnhanceChainManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("EnhanceChainManager")
            .field("initialized", &state.initialized)
            .field("chains", &state.chains.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auricle_effect::{BUNDLED_LIBRARY_NAME, BundledLibrary};

    fn config() -> EnhanceManagerConfig {
        EnhanceManagerConfig {
            libraries: vec![LibraryRegistration {
                name: BUNDLED_LIBRARY_NAME.to_string(),
                library: BundledLibrary::new(),
            }],
            effects: vec![EffectBinding {
                effect_name: "passthrough".to_string(),
                library_name: BUNDLED_LIBRARY_NAME.to_string(),
            }],
            chains: vec![ChainRecipe {
                name: "record_enhance_chain".to_string(),
                apply: vec!["passthrough".to_string()],
            }],
            scene_map: vec![EnhanceRecipe {
                scene: EffectScene::Speech,
                mode: EffectMode::Default,
                chain_name: "record_enhance_chain".to_string(),
            }],
        }
    }

    fn attr() -> EnhanceBufferAttr {
        let bytes = 16 * 10 * 2; // 16kHz, 10ms, s16
        EnhanceBufferAttr {
            input: (0..bytes).map(|i| i as u8).collect(),
            output: vec![0u8; bytes],
            frame_length_ms: 10,
            sample_rate: 16_000,
            bytes_per_sample: 2,
            mic_count: 1,
            ref_count: 0,
            out_count: 1,
        }
    }

    #[test]
    fn duplicate_create_is_error() {
        let manager = EnhanceChainManager::new();
        manager.init(&config());
        manager
            .create_chain(EffectScene::Speech, EffectMode::Default, "mic_&_Speaker")
            .unwrap();
        assert!(matches!(
            manager.create_chain(EffectScene::Speech, EffectMode::Default, "mic_&_Speaker"),
            Err(EngineError::DuplicateEnhanceChain(_))
        ));
        manager
            .release_chain(EffectScene::Speech, "mic_&_Speaker")
            .unwrap();
        assert_eq!(manager.chain_count(), 0);
    }

    #[test]
    fn apply_missing_chain_passes_through() {
        let manager = EnhanceChainManager::new();
        manager.init(&config());
        let mut a = attr();
        assert!(manager
            .apply_chain(EffectScene::Speech, "mic_&_Speaker", &mut a)
            .is_err());
        assert_eq!(a.output, a.input);
    }

    #[test]
    fn speech_scene_gets_aec_reference_channel() {
        let manager = EnhanceChainManager::new();
        manager.init(&config());
        manager
            .create_chain(EffectScene::Speech, EffectMode::Default, "mic_&_Speaker")
            .unwrap();
        let mut a = attr();
        manager
            .apply_chain(EffectScene::Speech, "mic_&_Speaker", &mut a)
            .unwrap();
        assert_eq!(a.ref_count, 1);
        assert_eq!(manager.up_and_down_device(), "mic_&_Speaker");
    }

    #[test]
    fn unmapped_scene_builds_empty_chain() {
        let manager = EnhanceChainManager::new();
        manager.init(&config());
        manager
            .create_chain(EffectScene::Music, EffectMode::Default, "mic_&_Speaker")
            .unwrap();
        let mut a = attr();
        // empty chain: pass-through with error from the chain itself
        assert!(manager
            .apply_chain(EffectScene::Music, "mic_&_Speaker", &mut a)
            .is_err());
        assert_eq!(a.output, a.input);
    }
}
