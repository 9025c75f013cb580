//! Cross-module tests for the chain manager lifecycle.

use std::sync::Arc;

use auricle_core::{BufferAttr, ChannelLayout, DeviceType, EffectMode, EffectScene};
use auricle_effect::{BUNDLED_LIBRARY_NAME, BundledLibrary, EffectBinding, LibraryRegistration};
use auricle_engine::{
    ChainKey, ChainManagerConfig, ChainRecipe, EffectChainManager, HeadTracker, NullPostureSensor,
    SceneMapEntry, SessionEffectInfo, SpatializationState,
};
use auricle_hal::HdiParamProxy;

use proptest::prelude::*;

fn boot_manager() -> EffectChainManager {
    let config = ChainManagerConfig {
        libraries: vec![LibraryRegistration {
            name: BUNDLED_LIBRARY_NAME.to_string(),
            library: BundledLibrary::new(),
        }],
        effects: vec![
            EffectBinding {
                effect_name: "passthrough".to_string(),
                library_name: BUNDLED_LIBRARY_NAME.to_string(),
            },
            EffectBinding {
                effect_name: "scene_gain".to_string(),
                library_name: BUNDLED_LIBRARY_NAME.to_string(),
            },
        ],
        chains: vec![
            ChainRecipe {
                name: "music_effect_chain".to_string(),
                apply: vec!["scene_gain".to_string()],
            },
            ChainRecipe {
                name: "game_effect_chain".to_string(),
                apply: vec!["passthrough".to_string(), "scene_gain".to_string()],
            },
        ],
        scene_map: vec![
            SceneMapEntry {
                scene: EffectScene::Music,
                mode: EffectMode::Default,
                device: DeviceType::Speaker,
                chain_name: "music_effect_chain".to_string(),
            },
            SceneMapEntry {
                scene: EffectScene::Game,
                mode: EffectMode::Default,
                device: DeviceType::Speaker,
                chain_name: "game_effect_chain".to_string(),
            },
            SceneMapEntry {
                scene: EffectScene::Music,
                mode: EffectMode::Default,
                device: DeviceType::WiredHeadset,
                chain_name: "music_effect_chain".to_string(),
            },
        ],
    };
    let manager = EffectChainManager::new(
        HdiParamProxy::disconnected(),
        HeadTracker::new(Arc::new(NullPostureSensor::default())),
    );
    manager.init(&config);
    manager
}

#[test]
fn full_playback_bring_up() {
    let manager = boot_manager();
    manager
        .set_output_device_sink(DeviceType::Speaker, "Speaker")
        .unwrap();
    assert!(manager.check_and_add_session_id("1"));
    manager
        .session_info_add("1", SessionEffectInfo::stereo(EffectScene::Music, 10))
        .unwrap();
    manager.create_chain(EffectScene::Music).unwrap();
    manager.effect_volume_update("1", 10).unwrap();

    let mut attr = BufferAttr::new(480, 2, 2);
    attr.buf_in.fill(1.0);
    manager.apply_chain(EffectScene::Music, &mut attr).unwrap();
    assert!(attr.buf_out.iter().all(|&s| (s - 0.1).abs() < 1e-6));
    assert!(manager.get_latency("1") > 0);
}

#[test]
fn spatialization_cycle_restores_chain_set() {
    let manager = boot_manager();
    manager.create_chain(EffectScene::Music).unwrap();
    manager.create_chain(EffectScene::Music).unwrap();
    manager.create_chain(EffectScene::Game).unwrap();
    let before = manager.refcounts();

    manager
        .update_spatialization_state(SpatializationState {
            spatialization_enabled: true,
            head_tracking_enabled: false,
        })
        .unwrap();
    assert!(manager.chain_keys().is_empty());

    manager
        .update_spatialization_state(SpatializationState::default())
        .unwrap();
    assert_eq!(manager.refcounts(), before);
    assert_eq!(manager.chain_keys().len(), 2);
}

#[test]
fn device_change_transfers_refcount_sum() {
    let manager = boot_manager();
    manager.create_chain(EffectScene::Music).unwrap();
    manager.create_chain(EffectScene::Music).unwrap();
    manager.create_chain(EffectScene::Game).unwrap();
    let sum_before: i32 = manager.refcounts().values().sum();

    manager
        .set_output_device_sink(DeviceType::WiredHeadset, "Speaker")
        .unwrap();

    let refcounts = manager.refcounts();
    let sum_after: i32 = refcounts.values().sum();
    assert_eq!(sum_before, sum_after);
    assert!(refcounts.keys().all(|k| k.device == DeviceType::WiredHeadset));
}

#[test]
fn head_tracking_toggle_survives_without_sensor_hardware() {
    let manager = boot_manager();
    manager.create_chain(EffectScene::Music).unwrap();
    manager
        .update_spatialization_state(SpatializationState {
            spatialization_enabled: false,
            head_tracking_enabled: true,
        })
        .unwrap();
    assert!(manager.spatialization_state().head_tracking_enabled);
    manager
        .update_spatialization_state(SpatializationState::default())
        .unwrap();
    assert!(!manager.spatialization_state().head_tracking_enabled);
}

#[test]
fn multichannel_election_defaults_to_stereo() {
    let manager = boot_manager();
    manager
        .session_info_add("9", SessionEffectInfo::stereo(EffectScene::Music, 5))
        .unwrap();
    let (channels, layout) = manager.return_effect_channel_info(EffectScene::Music);
    assert_eq!(channels, 2);
    assert_eq!(layout, ChannelLayout::STEREO);

    let (mch_channels, mch_layout) = manager.return_multichannel_info();
    assert_eq!(mch_channels, 6);
    assert_eq!(mch_layout, ChannelLayout::CH_5POINT1);
}

#[test]
fn multichannel_election_picks_wide_hvs_input() {
    let manager = boot_manager();
    // A2DP offload: device is A2DP, sink still the speaker path
    manager
        .set_output_device_sink(DeviceType::BluetoothA2dp, "Speaker")
        .unwrap();
    assert!(manager.check_a2dp_offload());

    let info = SessionEffectInfo {
        scene: EffectScene::Movie,
        mode: EffectMode::Default,
        channels: 8,
        layout: ChannelLayout::CH_7POINT1,
        spatialization_enabled: false,
        volume: 30,
    };
    manager.session_info_add("11", info).unwrap();
    // no AP chain for movie on a2dp: the wide HVS input wins the election
    let (channels, layout) = manager.return_multichannel_info();
    assert_eq!(channels, 8);
    assert_eq!(layout, ChannelLayout::CH_7POINT1);
}

mod recording {
    //! A library whose handles record every SET_PARAM payload.

    use std::sync::{Arc, Mutex};

    use auricle_effect::{
        AudioBuffer, AudioBufferMut, CommandReply, EFFECT_ABI_VERSION, EffectCommand,
        EffectDescriptor, EffectError, EffectHandle, EffectLibrary, EffectParams,
        LibraryDescriptor,
    };

    pub struct RecordingLibrary {
        desc: LibraryDescriptor,
        pub params: Arc<Mutex<Vec<EffectParams>>>,
    }

    impl RecordingLibrary {
        pub fn new(name: &str) -> Arc<RecordingLibrary> {
            Arc::new(RecordingLibrary {
                desc: LibraryDescriptor {
                    name: name.to_string(),
                    implementor: "tests".to_string(),
                    api_version: EFFECT_ABI_VERSION,
                },
                params: Arc::new(Mutex::new(Vec::new())),
            })
        }
    }

    struct RecordingHandle {
        params: Arc<Mutex<Vec<EffectParams>>>,
    }

    impl EffectHandle for RecordingHandle {
        fn command(
            &mut self,
            command: EffectCommand<'_>,
        ) -> Result<CommandReply, EffectError> {
            if let EffectCommand::SetParam(params) = command {
                self.params.lock().unwrap().push(*params);
            }
            Ok(CommandReply { latency_us: 100 })
        }
        fn process(
            &mut self,
            _: AudioBuffer<'_>,
            _: AudioBufferMut<'_>,
        ) -> Result<(), EffectError> {
            Ok(())
        }
    }

    impl EffectLibrary for RecordingLibrary {
        fn descriptor(&self) -> &LibraryDescriptor {
            &self.desc
        }
        fn create_effect(
            &self,
            _: &EffectDescriptor,
        ) -> Result<Box<dyn EffectHandle>, EffectError> {
            Ok(Box::new(RecordingHandle {
                params: Arc::clone(&self.params),
            }))
        }
    }
}

#[test]
fn rotation_appears_in_set_param_payload() {
    let library = recording::RecordingLibrary::new("librec");
    let config = ChainManagerConfig {
        libraries: vec![LibraryRegistration {
            name: "librec".to_string(),
            library: library.clone(),
        }],
        effects: vec![EffectBinding {
            effect_name: "spatializer".to_string(),
            library_name: "librec".to_string(),
        }],
        chains: vec![ChainRecipe {
            name: "default_chain".to_string(),
            apply: vec!["spatializer".to_string()],
        }],
        scene_map: [EffectScene::Music, EffectScene::Game]
            .iter()
            .map(|&scene| SceneMapEntry {
                scene,
                mode: EffectMode::Default,
                device: DeviceType::Speaker,
                chain_name: "default_chain".to_string(),
            })
            .collect(),
    };
    let manager = EffectChainManager::new(
        HdiParamProxy::disconnected(),
        HeadTracker::new(Arc::new(NullPostureSensor::default())),
    );
    manager.init(&config);

    for (id, scene) in [("1", EffectScene::Music), ("2", EffectScene::Game)] {
        manager
            .session_info_add(id, SessionEffectInfo::stereo(scene, 30))
            .unwrap();
        manager.create_chain(scene).unwrap();
    }
    library.params.lock().unwrap().clear();

    manager.effect_rotation_update(90).unwrap();

    let params = library.params.lock().unwrap();
    // one SET_PARAM per live scene chain, each carrying the new rotation
    assert_eq!(params.len(), 2);
    assert!(params.iter().all(|p| p.rotation == 90));
    let scenes: Vec<EffectScene> = params.iter().map(|p| p.scene).collect();
    assert!(scenes.contains(&EffectScene::Music));
    assert!(scenes.contains(&EffectScene::Game));
}

proptest! {
    /// Any interleaving of create/release keeps refcount > 0 iff the
    /// chain is live, and never goes negative.
    #[test]
    fn refcount_invariant_under_random_ops(ops in proptest::collection::vec(0u8..4, 1..60)) {
        let manager = boot_manager();
        let scenes = [EffectScene::Music, EffectScene::Game];
        let mut expected: std::collections::HashMap<EffectScene, i32> =
            std::collections::HashMap::new();

        for op in ops {
            let scene = scenes[(op % 2) as usize];
            if op < 2 {
                manager.create_chain(scene).unwrap();
                *expected.entry(scene).or_insert(0) += 1;
            } else {
                manager.release_chain(scene).unwrap();
                let count = expected.entry(scene).or_insert(0);
                *count = (*count - 1).max(0);
            }

            let refcounts = manager.refcounts();
            let keys = manager.chain_keys();
            for scene in scenes {
                let key = ChainKey { scene, device: DeviceType::Speaker };
                let live = keys.contains(&key);
                let count = refcounts.get(&key).copied().unwrap_or(0);
                prop_assert_eq!(live, count > 0);
                prop_assert_eq!(count, expected.get(&scene).copied().unwrap_or(0));
            }
        }
    }

    /// Session add/delete keeps the two session maps consistent.
    #[test]
    fn session_maps_stay_consistent(ids in proptest::collection::vec(0u8..6, 1..40)) {
        let manager = boot_manager();
        let mut live: std::collections::HashSet<String> = std::collections::HashSet::new();

        for id in ids {
            let name = format!("s{}", id % 3);
            let scene = if id % 2 == 0 { EffectScene::Music } else { EffectScene::Game };
            if id < 3 {
                let added = manager
                    .session_info_add(&name, SessionEffectInfo::stereo(scene, u32::from(id)))
                    .is_ok();
                if added {
                    live.insert(name);
                }
            } else if live.remove(&name) {
                // scene must match the stored record for delete to work;
                // try both and require exactly one to succeed
                let a = manager.session_info_delete(EffectScene::Music, &name).is_ok();
                let b = manager.session_info_delete(EffectScene::Game, &name).is_ok();
                prop_assert!(a ^ b);
            }
        }
    }
}
