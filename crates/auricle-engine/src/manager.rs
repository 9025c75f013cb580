//! The effect chain manager.
//!
//! Owns every playback chain, keyed by (scene, device), and the session
//! registry that drives per-scene parameter elections. All public
//! operations lock one mutex over the whole state; internals are free
//! functions over `&mut ManagerState` so operations can compose without
//! re-entrant locking. Chains are handed out as `Arc`s so the hot path
//! applies them after dropping the manager lock.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use auricle_core::{
    BufferAttr, ChannelLayout, DEFAULT_FRAME_LEN, DeviceType, EffectMode, EffectScene, RateGate,
};
use auricle_effect::{
    AudioEffectProcInfo, EffectBinding, EffectChain, EffectRegistry, LibraryRegistration,
};
use auricle_hal::{HdiCommand, HdiParamProxy};

use crate::head_tracker::{HeadTracker, SpatializerEngine};
use crate::param_sink::ParamSink;
use crate::rotation::EffectRotation;
use crate::session::{SessionEffectInfo, SessionId};
use crate::volume::EffectVolume;
use crate::{EngineError, Result};

/// Identity of one playback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainKey {
    /// Scene the chain processes.
    pub scene: EffectScene,
    /// Device the chain was built for.
    pub device: DeviceType,
}

/// One chain recipe: an ordered list of effect names.
#[derive(Debug, Clone)]
pub struct ChainRecipe {
    /// Recipe name referenced by the scene map.
    pub name: String,
    /// Effects to instantiate, in processing order.
    pub apply: Vec<String>,
}

/// Maps (scene, mode, device) onto a recipe name.
#[derive(Debug, Clone)]
pub struct SceneMapEntry {
    /// Scene.
    pub scene: EffectScene,
    /// Mode within the scene.
    pub mode: EffectMode,
    /// Device the mapping applies to.
    pub device: DeviceType,
    /// Recipe to build.
    pub chain_name: String,
}

/// Boot input for [`EffectChainManager::init`].
#[derive(Debug, Clone, Default)]
pub struct ChainManagerConfig {
    /// Libraries to register.
    pub libraries: Vec<LibraryRegistration>,
    /// Effect name → library bindings.
    pub effects: Vec<EffectBinding>,
    /// Chain recipes.
    pub chains: Vec<ChainRecipe>,
    /// (scene, mode, device) → recipe mappings.
    pub scene_map: Vec<SceneMapEntry>,
}

/// Spatialization flags pushed by the policy server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpatializationState {
    /// 3D rendering requested.
    pub spatialization_enabled: bool,
    /// IMU-driven head tracking requested.
    pub head_tracking_enabled: bool,
}

struct ManagerState {
    registry: Option<EffectRegistry>,
    chain_recipes: HashMap<String, Vec<String>>,
    scene_map: HashMap<(EffectScene, EffectMode, DeviceType), String>,
    chains: HashMap<ChainKey, Arc<EffectChain>>,
    refcount: HashMap<ChainKey, i32>,
    backup_refcounts: HashMap<ChainKey, i32>,
    session_ids: BTreeSet<SessionId>,
    sessions: HashMap<SessionId, SessionEffectInfo>,
    scene_to_sessions: HashMap<EffectScene, BTreeSet<SessionId>>,
    device: DeviceType,
    device_sink_name: String,
    frame_len: usize,
    initialized: bool,
    spatialization_enabled: bool,
    head_tracking_enabled: bool,
    offload_enabled: bool,
    param_sink: ParamSink,
    volume: EffectVolume,
    rotation: EffectRotation,
}

impl Default for ManagerState {
    fn default() -> Self {
        ManagerState {
            registry: None,
            chain_recipes: HashMap::new(),
            scene_map: HashMap::new(),
            chains: HashMap::new(),
            refcount: HashMap::new(),
            backup_refcounts: HashMap::new(),
            session_ids: BTreeSet::new(),
            sessions: HashMap::new(),
            scene_to_sessions: HashMap::new(),
            device: DeviceType::Speaker,
            device_sink_name: "Speaker".to_string(),
            frame_len: DEFAULT_FRAME_LEN,
            initialized: false,
            spatialization_enabled: false,
            head_tracking_enabled: false,
            offload_enabled: false,
            param_sink: ParamSink::Ap,
            volume: EffectVolume::new(),
            rotation: EffectRotation::new(),
        }
    }
}

/// Process-wide manager for playback effect chains.
pub struct EffectChainManager {
    state: Mutex<ManagerState>,
    hdi: HdiParamProxy,
    head_tracker: Arc<HeadTracker>,
    log_gate: RateGate<(&'static str, ChainKey)>,
}

impl EffectChainManager {
    /// Manager over the given HDI proxy and head tracker. `init` must be
    /// called before chains can be built.
    pub fn new(hdi: HdiParamProxy, head_tracker: Arc<HeadTracker>) -> Self {
        EffectChainManager {
            state: Mutex::new(ManagerState::default()),
            hdi,
            head_tracker,
            log_gate: RateGate::new(Duration::from_secs(1)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load libraries, recipes, and the scene map. Idempotent: a second
    /// call replaces the maps but keeps existing chains alive.
    pub fn init(&self, config: &ChainManagerConfig) {
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
            .map(|entry| {
                (
                    (entry.scene, entry.mode, entry.device),
                    entry.chain_name.clone(),
                )
            })
            .collect();
        state.initialized = true;
        info!(
            recipes = state.chain_recipes.len(),
            mappings = state.scene_map.len(),
            "effect chain manager initialized"
        );
        drop(state);

        // Seed the DSP routing mode; nothing depends on this succeeding.
        if let Err(err) = self.hdi.update(HdiCommand::BluetoothMode(1)) {
            warn!(%err, "seeding hdi bluetooth mode failed");
        }
    }

    /// Register a session id. False if it was already present.
    pub fn check_and_add_session_id(&self, session_id: &str) -> bool {
        self.lock().session_ids.insert(session_id.to_string())
    }

    /// Deregister a session id. False if it was not present.
    pub fn check_and_remove_session_id(&self, session_id: &str) -> bool {
        self.lock().session_ids.remove(session_id)
    }

    /// Create (or refcount) the chain for `scene` on the current device.
    pub fn create_chain(&self, scene: EffectScene) -> Result<()> {
        let mut state = self.lock();
        if !state.initialized {
            return Err(EngineError::NotInitialized);
        }
        if state.offload_enabled {
            let key = ChainKey {
                scene,
                device: state.device,
            };
            *state.backup_refcounts.entry(key).or_insert(0) += 1;
            return Ok(());
        }
        create_chain_raw(&mut state, scene, &self.head_tracker)
    }

    /// Release one reference to `scene`'s chain; the chain is destroyed
    /// when the count reaches zero.
    pub fn release_chain(&self, scene: EffectScene) -> Result<()> {
        let mut state = self.lock();
        if !state.initialized {
            return Err(EngineError::NotInitialized);
        }
        let key = ChainKey {
            scene,
            device: state.device,
        };
        if state.offload_enabled {
            if let Some(count) = state.backup_refcounts.get_mut(&key) {
                *count -= 1;
                if *count <= 0 {
                    state.backup_refcounts.remove(&key);
                }
            }
            return Ok(());
        }
        release_chain_raw(&mut state, key);
        Ok(())
    }

    /// Rebuild `scene`'s chain from the recipe selected by `mode`.
    pub fn set_chain(&self, scene: EffectScene, mode: EffectMode) -> Result<()> {
        let mut state = self.lock();
        set_chain_raw(&mut state, scene, mode)
    }

    /// Run the scene's chain over `attr`. With no chain under the key the
    /// input is copied through and an error returned; output continues.
    pub fn apply_chain(&self, scene: EffectScene, attr: &mut BufferAttr) -> Result<()> {
        let (chain, proc_info) = {
            let state = self.lock();
            let key = ChainKey {
                scene,
                device: state.device,
            };
            match state.chains.get(&key) {
                Some(chain) => (
                    Arc::clone(chain),
                    AudioEffectProcInfo {
                        head_tracking_enabled: state.head_tracking_enabled,
                        offload_enabled: state.offload_enabled,
                    },
                ),
                None => {
                    let len = (attr.frame_len * attr.num_chan_in as usize)
                        .min(attr.buf_in.len())
                        .min(attr.buf_out.len());
                    attr.buf_out[..len].copy_from_slice(&attr.buf_in[..len]);
                    if self.log_gate.allow(("apply-missing", key)) {
                        debug!(%scene, device = %key.device, "no chain for key, passing through");
                    }
                    return Err(EngineError::MissingChain {
                        scene,
                        device: key.device,
                    });
                }
            }
        };
        chain.apply(&mut attr.buf_in, &mut attr.buf_out, attr.frame_len, proc_info);
        Ok(())
    }

    /// True when an applicable, non-empty AP chain exists for the triple.
    pub fn exist_chain(
        &self,
        scene: EffectScene,
        mode: EffectMode,
        spatialization_enabled: bool,
    ) -> bool {
        let state = self.lock();
        exist_chain_raw(&state, scene, mode, spatialization_enabled)
    }

    /// Apply a spatialization/head-tracking transition.
    pub fn update_spatialization_state(&self, new: SpatializationState) -> Result<()> {
        let mut state = self.lock();
        info!(
            spatialization = new.spatialization_enabled,
            head_tracking = new.head_tracking_enabled,
            was_spatialization = state.spatialization_enabled,
            was_head_tracking = state.head_tracking_enabled,
            "spatialization state update"
        );
        if state.spatialization_enabled != new.spatialization_enabled {
            state.spatialization_enabled = new.spatialization_enabled;
            if state.spatialization_enabled {
                match self.hdi.update(HdiCommand::Init) {
                    Ok(()) => {
                        info!("hdi init succeeded, offload spatialization entered");
                        state.offload_enabled = true;
                        delete_all_chains(&mut state);
                    }
                    Err(err) => {
                        warn!(%err, "hdi init failed, staying on the AP path");
                        state.offload_enabled = false;
                    }
                }
            } else {
                if let Err(err) = self.hdi.update(HdiCommand::Destroy) {
                    warn!(%err, "hdi destroy failed");
                }
                state.offload_enabled = false;
                recover_all_chains(&mut state, &self.head_tracker);
            }
            state.param_sink = ParamSink::select(state.offload_enabled);
        }
        if state.head_tracking_enabled != new.head_tracking_enabled {
            state.head_tracking_enabled = new.head_tracking_enabled;
            self.update_sensor_state(&mut state);
        }
        Ok(())
    }

    fn update_sensor_state(&self, state: &mut ManagerState) {
        if let Err(err) = self
            .hdi
            .update(HdiCommand::HeadMode(state.head_tracking_enabled))
        {
            warn!(%err, "setting hdi head mode failed");
        }

        if state.head_tracking_enabled {
            let engine = if state.offload_enabled {
                SpatializerEngine::Dsp
            } else {
                SpatializerEngine::Arm
            };
            if let Err(err) = self.head_tracker.configure(engine) {
                warn!(%err, "configuring head tracking sensor failed");
            }
            if let Err(err) = self.head_tracker.activate() {
                warn!(%err, "activating head tracking sensor failed");
            }
            return;
        }

        if state.offload_enabled {
            return;
        }

        if let Err(err) = self.head_tracker.deactivate() {
            warn!(%err, "deactivating head tracking sensor failed");
        }
        for chain in state.chains.values() {
            chain.set_head_tracking_disabled();
        }
    }

    /// Session volume changed; push along the selected parameter path.
    pub fn effect_volume_update(&self, session_id: &str, volume: u32) -> Result<()> {
        let mut state = self.lock();
        if let Some(info) = state.sessions.get_mut(session_id) {
            info.volume = volume;
        }
        match state.param_sink {
            ParamSink::Dsp => self.dsp_volume_update(&mut state),
            ParamSink::Ap => self.ap_volume_update(&mut state),
        }
    }

    fn dsp_volume_update(&self, state: &mut ManagerState) -> Result<()> {
        let max = state
            .sessions
            .values()
            .map(|info| info.volume)
            .max()
            .unwrap_or(0);
        if state.volume.dsp_volume() != max {
            state.volume.set_dsp_volume(max);
            info!(volume = max, "pushing volume to dsp");
            self.hdi.update(HdiCommand::Volume(max))?;
        }
        Ok(())
    }

    fn ap_volume_update(&self, state: &mut ManagerState) -> Result<()> {
        let scenes: Vec<EffectScene> = state.scene_to_sessions.keys().copied().collect();
        for scene in scenes {
            let max = state
                .scene_to_sessions
                .get(&scene)
                .map(|sessions| {
                    sessions
                        .iter()
                        .filter_map(|id| state.sessions.get(id))
                        .map(|info| info.volume)
                        .max()
                        .unwrap_or(0)
                })
                .unwrap_or(0);
            if state.volume.ap_volume(scene) == max {
                continue;
            }
            state.volume.set_ap_volume(scene, max);
            let key = ChainKey {
                scene,
                device: state.device,
            };
            let chain = state
                .chains
                .get(&key)
                .ok_or(EngineError::MissingChain {
                    scene,
                    device: key.device,
                })?
                .clone();
            chain.set_effect_param(state.rotation.rotation(), max)?;
            debug!(%scene, latency_us = chain.latency_us(), "scene volume applied");
        }
        Ok(())
    }

    /// Display rotation changed; push along the selected parameter path.
    pub fn effect_rotation_update(&self, rotation: u32) -> Result<()> {
        let mut state = self.lock();
        if state.rotation.rotation() == rotation {
            return Ok(());
        }
        debug!(
            rotation,
            previous = state.rotation.rotation(),
            "rotation update"
        );
        match state.param_sink {
            ParamSink::Dsp => {
                state.rotation.set_rotation(rotation);
                self.hdi.update(HdiCommand::Rotation(rotation))?;
                Ok(())
            }
            ParamSink::Ap => {
                state.rotation.set_rotation(rotation);
                let scenes: Vec<EffectScene> = state.scene_to_sessions.keys().copied().collect();
                for scene in scenes {
                    let key = ChainKey {
                        scene,
                        device: state.device,
                    };
                    let chain = state
                        .chains
                        .get(&key)
                        .ok_or(EngineError::MissingChain {
                            scene,
                            device: key.device,
                        })?
                        .clone();
                    chain.set_effect_param(rotation, state.volume.ap_volume(scene))?;
                }
                Ok(())
            }
        }
    }

    /// Move every chain to a new output device, preserving modes,
    /// refcounts, and I/O configurations.
    pub fn set_output_device_sink(&self, device: DeviceType, sink_name: &str) -> Result<()> {
        let mut state = self.lock();
        if !state.initialized {
            state.device = device;
            state.device_sink_name = sink_name.to_string();
            info!(%device, sink_name, "device cached before init");
            return Ok(());
        }
        state.device_sink_name = sink_name.to_string();
        if state.device == device {
            return Ok(());
        }
        info!(from = %state.device, to = %device, "output device change");
        state.device = device;

        let old_keys: Vec<ChainKey> = state.chains.keys().copied().collect();
        for old_key in old_keys {
            let new_key = ChainKey {
                scene: old_key.scene,
                device,
            };
            if let Some(count) = state.refcount.remove(&old_key) {
                state.refcount.insert(new_key, count);
            }
            let (mode, io_config) = match state.chains.remove(&old_key) {
                Some(old_chain) => {
                    let saved = old_chain.store_info();
                    old_chain.release();
                    saved
                }
                None => (EffectMode::Default, auricle_effect::IoConfig::default()),
            };
            let posture: Arc<dyn auricle_effect::PostureProvider> = self.head_tracker.clone();
            let chain = Arc::new(EffectChain::new(old_key.scene, posture));
            state.chains.insert(new_key, chain);
            if let Err(err) = set_chain_raw(&mut state, old_key.scene, mode) {
                warn!(scene = %old_key.scene, %err, "rebuilding chain after device change failed");
            }
            if let Some(chain) = state.chains.get(&new_key) {
                let _ = chain
                    .update_multichannel_io_config(io_config.input.channels, io_config.input.layout);
            }
        }
        Ok(())
    }

    /// Record a session's effect info; replaces a changed record. Fails
    /// with [`EngineError::NoChange`] when nothing differs.
    pub fn session_info_add(&self, session_id: &str, info: SessionEffectInfo) -> Result<()> {
        let mut state = self.lock();
        match state.sessions.get(session_id) {
            None => {
                state
                    .scene_to_sessions
                    .entry(info.scene)
                    .or_default()
                    .insert(session_id.to_string());
                state.sessions.insert(session_id.to_string(), info);
                Ok(())
            }
            Some(existing)
                if existing.mode != info.mode
                    || existing.spatialization_enabled != info.spatialization_enabled
                    || existing.volume != info.volume =>
            {
                state.sessions.insert(session_id.to_string(), info);
                Ok(())
            }
            Some(_) => Err(EngineError::NoChange),
        }
    }

    /// Unlink a session from its scene bucket and drop its record.
    pub fn session_info_delete(&self, scene: EffectScene, session_id: &str) -> Result<()> {
        let mut state = self.lock();
        let bucket = state
            .scene_to_sessions
            .get_mut(&scene)
            .ok_or_else(|| EngineError::UnknownSession(session_id.to_string()))?;
        if !bucket.remove(session_id) {
            return Err(EngineError::UnknownSession(session_id.to_string()));
        }
        if bucket.is_empty() {
            state.scene_to_sessions.remove(&scene);
        }
        if state.sessions.remove(session_id).is_none() {
            return Err(EngineError::UnknownSession(session_id.to_string()));
        }
        Ok(())
    }

    /// Input channel election for `scene`: the widest session that may
    /// legitimately reach the chain unmixed; stereo otherwise.
    pub fn return_effect_channel_info(&self, scene: EffectScene) -> (u32, ChannelLayout) {
        let state = self.lock();
        return_effect_channel_info_raw(&state, scene)
    }

    /// Channel election for the multichannel branch.
    pub fn return_multichannel_info(&self) -> (u32, ChannelLayout) {
        let state = self.lock();
        let mut channels = auricle_core::MULTICHANNEL_NUM_CHANNELS;
        let mut layout = ChannelLayout::CH_5POINT1;
        for sessions in state.scene_to_sessions.values() {
            for id in sessions {
                let Some(info) = state.sessions.get(id) else {
                    continue;
                };
                let scene = info.scene;
                let candidate = info.channels > auricle_core::DEFAULT_CHANNELS
                    && !exist_chain_raw(&state, scene, info.mode, info.spatialization_enabled)
                    && info.layout.is_hvs_supported();
                let (c, l) = if candidate {
                    (info.channels, info.layout)
                } else {
                    (
                        auricle_core::MULTICHANNEL_NUM_CHANNELS,
                        ChannelLayout::CH_5POINT1,
                    )
                };
                if c >= channels {
                    channels = c;
                    layout = l;
                }
            }
        }
        (channels, layout)
    }

    /// True when A2DP offload routes multichannel content around the AP
    /// chains: the device is A2DP while audio still flows to the speaker
    /// sink.
    pub fn check_a2dp_offload(&self) -> bool {
        let state = self.lock();
        state.device == DeviceType::BluetoothA2dp && state.device_sink_name == "Speaker"
    }

    /// Re-elect the chain's input channel configuration from its live
    /// sessions and push it into the chain.
    pub fn update_multichannel_config(&self, scene: EffectScene) -> Result<()> {
        let state = self.lock();
        let key = ChainKey {
            scene,
            device: state.device,
        };
        let chain = state
            .chains
            .get(&key)
            .ok_or(EngineError::MissingChain {
                scene,
                device: key.device,
            })?
            .clone();
        let (channels, layout) = return_effect_channel_info_raw(&state, scene);
        drop(state);
        chain.update_multichannel_io_config(channels, layout)?;
        Ok(())
    }

    /// Re-enable every handle of `scene`'s chain.
    pub fn init_chain(&self, scene: EffectScene) -> Result<()> {
        let state = self.lock();
        if !state.initialized {
            return Err(EngineError::NotInitialized);
        }
        let key = ChainKey {
            scene,
            device: state.device,
        };
        if let Some(chain) = state.chains.get(&key) {
            let chain = Arc::clone(chain);
            drop(state);
            chain.reenable();
        }
        Ok(())
    }

    /// Push the DSP bypass flag and room mode.
    pub fn set_hdi_param(
        &self,
        scene: EffectScene,
        mode: EffectMode,
        enabled: bool,
    ) -> Result<()> {
        {
            let state = self.lock();
            if !state.initialized {
                return Err(EngineError::NotInitialized);
            }
        }
        self.hdi.update(HdiCommand::Bypass(!enabled))?;
        self.hdi.update(HdiCommand::RoomMode {
            scene: scene.as_i32(),
            mode: mode.as_i32(),
        })?;
        Ok(())
    }

    /// Chain latency attributed to a session, zero when the session is
    /// offloaded, unprocessed, or unspatializable on A2DP.
    pub fn get_latency(&self, session_id: &str) -> u32 {
        let state = self.lock();
        if state.offload_enabled {
            return 0;
        }
        let Some(info) = state.sessions.get(session_id) else {
            debug!(session_id, "latency queried for unknown session");
            return 0;
        };
        if info.mode == EffectMode::None {
            return 0;
        }
        if !info.spatialization_enabled && state.device == DeviceType::BluetoothA2dp {
            return 0;
        }
        let key = ChainKey {
            scene: info.scene,
            device: state.device,
        };
        state
            .chains
            .get(&key)
            .map(|chain| chain.latency_us())
            .unwrap_or(0)
    }

    /// Current output device.
    pub fn device_type(&self) -> DeviceType {
        self.lock().device
    }

    /// Current sink name.
    pub fn device_sink_name(&self) -> String {
        self.lock().device_sink_name.clone()
    }

    /// Frames per render tick.
    pub fn frame_len(&self) -> usize {
        self.lock().frame_len
    }

    /// Set frames per render tick.
    pub fn set_frame_len(&self, frame_len: usize) {
        self.lock().frame_len = frame_len;
    }

    /// True while DSP offload is active.
    pub fn offload_enabled(&self) -> bool {
        self.lock().offload_enabled
    }

    /// Latest spatialization flags.
    pub fn spatialization_state(&self) -> SpatializationState {
        let state = self.lock();
        SpatializationState {
            spatialization_enabled: state.spatialization_enabled,
            head_tracking_enabled: state.head_tracking_enabled,
        }
    }

    /// Refcount snapshot, for observability and tests.
    pub fn refcounts(&self) -> HashMap<ChainKey, i32> {
        self.lock().refcount.clone()
    }

    /// Backup refcount snapshot held while offload is active.
    pub fn backup_refcounts(&self) -> HashMap<ChainKey, i32> {
        self.lock().backup_refcounts.clone()
    }

    /// Live chain keys.
    pub fn chain_keys(&self) -> Vec<ChainKey> {
        let mut keys: Vec<ChainKey> = self.lock().chains.keys().copied().collect();
        keys.sort();
        keys
    }

    /// Look up a live chain.
    pub fn chain(&self, scene: EffectScene) -> Option<Arc<EffectChain>> {
        let state = self.lock();
        let key = ChainKey {
            scene,
            device: state.device,
        };
        state.chains.get(&key).cloned()
    }
}

impl std::fmt::Debug for EffectChainManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("EffectChainManager")
            .field("initialized", &state.initialized)
            .field("device", &state.device)
            .field("chains", &state.chains.len())
            .field("sessions", &state.sessions.len())
            .field("offload_enabled", &state.offload_enabled)
            .finish()
    }
}

fn create_chain_raw(
    state: &mut ManagerState,
    scene: EffectScene,
    head_tracker: &Arc<HeadTracker>,
) -> Result<()> {
    let key = ChainKey {
        scene,
        device: state.device,
    };
    if state.chains.contains_key(&key) {
        let count = state.refcount.get(&key).copied().unwrap_or(0);
        if count < 1 {
            // A live chain without references is a bookkeeping bug;
            // discard it rather than resurrect it.
            if let Some(chain) = state.chains.remove(&key) {
                chain.release();
            }
            state.refcount.remove(&key);
            warn!(%scene, "discarded chain with dead refcount");
            return Err(EngineError::StaleChain(scene));
        }
        *state.refcount.entry(key).or_insert(0) += 1;
        return Ok(());
    }

    let posture: Arc<dyn auricle_effect::PostureProvider> = head_tracker.clone();
    let chain = Arc::new(EffectChain::new(scene, posture));
    state.chains.insert(key, chain);
    state.refcount.insert(key, 1);
    set_chain_raw(state, scene, EffectMode::Default)
}

fn release_chain_raw(state: &mut ManagerState, key: ChainKey) {
    if !state.chains.contains_key(&key) {
        state.refcount.remove(&key);
        return;
    }
    let count = state.refcount.get(&key).copied().unwrap_or(0);
    if count > 1 {
        state.refcount.insert(key, count - 1);
        return;
    }
    if let Some(chain) = state.chains.remove(&key) {
        chain.release();
    }
    state.refcount.remove(&key);
}

fn set_chain_raw(state: &mut ManagerState, scene: EffectScene, mode: EffectMode) -> Result<()> {
    let key = ChainKey {
        scene,
        device: state.device,
    };
    let chain = state
        .chains
        .get(&key)
        .ok_or(EngineError::MissingChain {
            scene,
            device: key.device,
        })?
        .clone();

    let chain_name = match state.scene_map.get(&(scene, mode, state.device)) {
        Some(name) => name.clone(),
        None => {
            warn!(%scene, %mode, device = %state.device,
                "no recipe mapping for key, falling back to bypass");
            EffectMode::None.wire_name().to_string()
        }
    };
    let effects = match state.chain_recipes.get(&chain_name) {
        Some(effects) => effects.clone(),
        None => {
            if chain_name != EffectMode::None.wire_name() {
                warn!(chain_name = %chain_name, "recipe does not exist, falling back to bypass");
            }
            Vec::new()
        }
    };

    chain.set_mode(mode);
    chain.release();

    let registry = state.registry.as_ref().ok_or(EngineError::NotInitialized)?;
    let rotation = state.rotation.rotation();
    let volume = state.volume.ap_volume(scene);
    for effect in &effects {
        match registry.create_effect(effect) {
            Ok((handle, library)) => {
                // add_effect_handle releases the handle itself on failure
                let _ = chain.add_effect_handle(handle, library, rotation, volume);
            }
            Err(err) => {
                warn!(effect = %effect, %err, "creating effect failed, skipping");
            }
        }
    }

    if chain.is_empty() {
        info!(%scene, %mode, "chain is empty, frames will pass through");
    }
    info!(%scene, latency_us = chain.latency_us(), "chain latency published");
    Ok(())
}

fn exist_chain_raw(
    state: &ManagerState,
    scene: EffectScene,
    mode: EffectMode,
    spatialization_enabled: bool,
) -> bool {
    if !state.initialized || !state.device.is_set() || state.offload_enabled {
        return false;
    }
    if !spatialization_enabled && state.device == DeviceType::BluetoothA2dp {
        return false;
    }
    if !state.scene_map.contains_key(&(scene, mode, state.device)) {
        return false;
    }
    let key = ChainKey {
        scene,
        device: state.device,
    };
    state
        .chains
        .get(&key)
        .is_some_and(|chain| !chain.is_empty())
}

fn return_effect_channel_info_raw(
    state: &ManagerState,
    scene: EffectScene,
) -> (u32, ChannelLayout) {
    let mut channels = auricle_core::DEFAULT_CHANNELS;
    let mut layout = ChannelLayout::STEREO;
    let Some(sessions) = state.scene_to_sessions.get(&scene) else {
        return (channels, layout);
    };
    for id in sessions {
        let Some(info) = state.sessions.get(id) else {
            continue;
        };
        let wide_allowed = state.device == DeviceType::BluetoothA2dp
            && exist_chain_raw(state, scene, info.mode, info.spatialization_enabled)
            && info.layout.is_hvs_supported();
        let (c, l) = if wide_allowed {
            (info.channels, info.layout)
        } else {
            (auricle_core::DEFAULT_CHANNELS, ChannelLayout::STEREO)
        };
        if c >= channels {
            channels = c;
            layout = l;
        }
    }
    (channels, layout)
}

fn delete_all_chains(state: &mut ManagerState) {
    state.backup_refcounts = state.refcount.clone();
    let backup: Vec<(ChainKey, i32)> = state
        .backup_refcounts
        .iter()
        .map(|(k, v)| (*k, *v))
        .collect();
    for (key, count) in backup {
        for _ in 0..count {
            release_chain_raw(state, key);
        }
    }
}

fn recover_all_chains(state: &mut ManagerState, head_tracker: &Arc<HeadTracker>) {
    let backup: Vec<(ChainKey, i32)> = state
        .backup_refcounts
        .iter()
        .map(|(k, v)| (*k, *v))
        .collect();
    for (key, count) in backup {
        for _ in 0..count {
            if let Err(err) = create_chain_raw(state, key.scene, head_tracker) {
                warn!(scene = %key.scene, %err, "recovering chain failed");
            }
        }
    }
    state.backup_refcounts.clear();
}
