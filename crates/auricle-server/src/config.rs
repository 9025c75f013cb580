//! Boot configuration.
//!
//! The policy server's init payload expressed as TOML, in the shape the
//! chain managers consume. Library entries name registered providers;
//! resolving names to actual [`EffectLibrary`] values happens at
//! assembly time so configurations stay declarative.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use auricle_core::{DeviceType, EffectMode, EffectScene};
use auricle_effect::{EffectBinding, EffectLibrary, LibraryRegistration};
use auricle_engine::{
    ChainManagerConfig, ChainRecipe, EnhanceManagerConfig, EnhanceRecipe, SceneMapEntry,
};

use crate::{Result, ServerError};

/// One effect library reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryEntry {
    /// Provider name to resolve at assembly time.
    pub name: String,
}

/// One effect name bound to its library.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectEntry {
    /// Effect name used in recipes.
    pub name: String,
    /// Library providing it.
    pub library: String,
}

/// One chain recipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainEntry {
    /// Recipe name.
    pub name: String,
    /// Effects in processing order.
    pub apply: Vec<String>,
}

/// One (scene, mode, device) → recipe mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneMapTomlEntry {
    /// Scene wire name.
    pub scene: EffectScene,
    /// Mode wire name.
    pub mode: EffectMode,
    /// Device wire name.
    pub device: DeviceType,
    /// Recipe to build for the triple.
    pub chain: String,
}

/// One capture-side (scene, mode) → recipe mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhanceSceneMapEntry {
    /// Scene wire name.
    pub scene: EffectScene,
    /// Mode wire name.
    pub mode: EffectMode,
    /// Recipe to build for the pair.
    pub chain: String,
}

/// The whole boot configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Effect libraries to register.
    #[serde(default, rename = "library")]
    pub libraries: Vec<LibraryEntry>,
    /// Effect bindings.
    #[serde(default, rename = "effect")]
    pub effects: Vec<EffectEntry>,
    /// Playback chain recipes.
    #[serde(default, rename = "chain")]
    pub chains: Vec<ChainEntry>,
    /// Playback scene map.
    #[serde(default, rename = "scene-map")]
    pub scene_map: Vec<SceneMapTomlEntry>,
    /// Capture chain recipes.
    #[serde(default, rename = "enhance-chain")]
    pub enhance_chains: Vec<ChainEntry>,
    /// Capture scene map.
    #[serde(default, rename = "enhance-scene-map")]
    pub enhance_scene_map: Vec<EnhanceSceneMapEntry>,
}

impl ServiceConfig {
    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ServerError::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    fn resolve_libraries(
        &self,
        providers: &HashMap<String, Arc<dyn EffectLibrary>>,
    ) -> Vec<LibraryRegistration> {
        self.libraries
            .iter()
            .filter_map(|entry| match providers.get(&entry.name) {
                Some(library) => Some(LibraryRegistration {
                    name: entry.name.clone(),
                    library: Arc::clone(library),
                }),
                None => {
                    warn!(library = %entry.name, "no provider for configured library, dropping");
                    None
                }
            })
            .collect()
    }

    fn effect_bindings(&self) -> Vec<EffectBinding> {
        self.effects
            .iter()
            .map(|entry| EffectBinding {
                effect_name: entry.name.clone(),
                library_name: entry.library.clone(),
            })
            .collect()
    }

    /// Lower into the playback manager's init input, resolving library
    /// names against `providers`.
    pub fn chain_manager_config(
        &self,
        providers: &HashMap<String, Arc<dyn EffectLibrary>>,
    ) -> ChainManagerConfig {
        ChainManagerConfig {
            libraries: self.resolve_libraries(providers),
            effects: self.effect_bindings(),
            chains: self
                .chains
                .iter()
                .map(|entry| ChainRecipe {
                    name: entry.name.clone(),
                    apply: entry.apply.clone(),
                })
                .collect(),
            scene_map: self
                .scene_map
                .iter()
                .map(|entry| SceneMapEntry {
                    scene: entry.scene,
                    mode: entry.mode,
                    device: entry.device,
                    chain_name: entry.chain.clone(),
                })
                .collect(),
        }
    }

    /// Lower into the capture manager's init input.
    pub fn enhance_manager_config(
        &self,
        providers: &HashMap<String, Arc<dyn EffectLibrary>>,
    ) -> EnhanceManagerConfig {
        EnhanceManagerConfig {
            libraries: self.resolve_libraries(providers),
            effects: self.effect_bindings(),
            chains: self
                .enhance_chains
                .iter()
                .map(|entry| ChainRecipe {
                    name: entry.name.clone(),
                    apply: entry.apply.clone(),
                })
                .collect(),
            scene_map: self
                .enhance_scene_map
                .iter()
                .map(|entry| EnhanceRecipe {
                    scene: entry.scene,
                    mode: entry.mode,
                    chain_name: entry.chain.clone(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auricle_effect::{BUNDLED_LIBRARY_NAME, BundledLibrary};

    const SAMPLE: &str = r#"
        [[library]]
        name = "libbundled"

        [[effect]]
        name = "scene_gain"
        library = "libbundled"

        [[chain]]
        name = "music_effect_chain"
        apply = ["scene_gain"]

        [[scene-map]]
        scene = "SCENE_MUSIC"
        mode = "EFFECT_DEFAULT"
        device = "DEVICE_TYPE_SPEAKER"
        chain = "music_effect_chain"

        [[enhance-chain]]
        name = "record_enhance_chain"
        apply = ["scene_gain"]

        [[enhance-scene-map]]
        scene = "SCENE_SPEECH"
        mode = "EFFECT_DEFAULT"
        chain = "record_enhance_chain"
    "#;

    fn providers() -> HashMap<String, Arc<dyn EffectLibrary>> {
        let mut map: HashMap<String, Arc<dyn EffectLibrary>> = HashMap::new();
        map.insert(BUNDLED_LIBRARY_NAME.to_string(), BundledLibrary::new());
        map
    }

    #[test]
    fn parses_sample_document() {
        let config = ServiceConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.libraries.len(), 1);
        assert_eq!(config.effects.len(), 1);
        assert_eq!(config.scene_map[0].scene, EffectScene::Music);
        assert_eq!(config.scene_map[0].device, DeviceType::Speaker);
        assert_eq!(config.enhance_scene_map[0].scene, EffectScene::Speech);
    }

    #[test]
    fn lowers_to_manager_config() {
        let config = ServiceConfig::from_toml(SAMPLE).unwrap();
        let lowered = config.chain_manager_config(&providers());
        assert_eq!(lowered.libraries.len(), 1);
        assert_eq!(lowered.chains[0].apply, vec!["scene_gain".to_string()]);
        assert_eq!(lowered.scene_map[0].chain_name, "music_effect_chain");
    }

    #[test]
    fn unknown_provider_is_dropped_not_fatal() {
        let config = ServiceConfig::from_toml(
            r#"
            [[library]]
            name = "libvendor_dsp"
            "#,
        )
        .unwrap();
        let lowered = config.chain_manager_config(&providers());
        assert!(lowered.libraries.is_empty());
    }

    #[test]
    fn invalid_scene_rejected() {
        let result = ServiceConfig::from_toml(
            r#"
            [[scene-map]]
            scene = "SCENE_PODCAST"
            mode = "EFFECT_DEFAULT"
            device = "DEVICE_TYPE_SPEAKER"
            chain = "x"
            "#,
        );
        assert!(result.is_err());
    }
}
