//! Per-(scene, device) effect chain.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use auricle_core::{ChannelLayout, EffectMode, EffectScene, HeadPosture};

use crate::abi::{
    AudioBuffer, AudioBufferMut, ConfigPayload, EffectCommand, EffectHandle, EffectParams,
    IoConfig, Pcm, PcmMut,
};
use crate::library::EffectLibrary;
use crate::Result;

/// Snapshot source for head-tracking orientation.
///
/// The chain reads one posture per handle per tick on the render thread,
/// so implementations must be wait-free.
pub trait PostureProvider: Send + Sync {
    /// Latest orientation sample.
    fn posture(&self) -> HeadPosture;
}

/// Posture provider that always returns the same sample. Used where no
/// sensor is wired up.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedPosture(pub HeadPosture);

impl PostureProvider for FixedPosture {
    fn posture(&self) -> HeadPosture {
        self.0
    }
}

/// Per-apply flags the manager snapshots for the chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct AudioEffectProcInfo {
    /// Head tracking currently enabled.
    pub head_tracking_enabled: bool,
    /// DSP offload currently enabled.
    pub offload_enabled: bool,
}

struct ChainEntry {
    handle: Box<dyn EffectHandle>,
    library: Arc<dyn EffectLibrary>,
}

struct ChainState {
    mode: EffectMode,
    entries: Vec<ChainEntry>,
    io_config: IoConfig,
    latency_us: u32,
}

/// Ordered list of effect handles for one (scene, device) pair.
///
/// The chain serializes reload (add/release/param) against the per-tick
/// apply with an interior lock. An empty chain is legal and degrades to a
/// buffer copy.
pub struct EffectChain {
    scene: EffectScene,
    posture: Arc<dyn PostureProvider>,
    state: Mutex<ChainState>,
}

impl EffectChain {
    /// New empty chain for `scene` with the default I/O configuration
    /// (48 kHz stereo float).
    pub fn new(scene: EffectScene, posture: Arc<dyn PostureProvider>) -> Self {
        EffectChain {
            scene,
            posture,
            state: Mutex::new(ChainState {
                mode: EffectMode::Default,
                entries: Vec::new(),
                io_config: IoConfig::default(),
                latency_us: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Scene this chain processes.
    pub fn scene(&self) -> EffectScene {
        self.scene
    }

    /// Current effect mode label.
    pub fn mode(&self) -> EffectMode {
        self.lock().mode
    }

    /// Record the mode label. This only drives which recipe the manager
    /// picks the next time it rebuilds the chain.
    pub fn set_mode(&self, mode: EffectMode) {
        self.lock().mode = mode;
    }

    /// True when the chain holds no handles.
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Accumulated handle latency in microseconds.
    pub fn latency_us(&self) -> u32 {
        self.lock().latency_us
    }

    /// Copy of the chain's I/O configuration.
    pub fn io_config(&self) -> IoConfig {
        self.lock().io_config
    }

    /// Overwrite one side of the I/O configuration without notifying
    /// handles. Used while assembling a chain before handles exist.
    pub fn set_io_spec(&self, is_input: bool, sample_rate: u32, channels: u32) {
        let mut state = self.lock();
        let spec = if is_input {
            &mut state.io_config.input
        } else {
            &mut state.io_config.output
        };
        spec.sample_rate = sample_rate;
        spec.channels = channels;
    }

    /// Mode and I/O configuration, captured before tearing a chain down so
    /// its successor on a new device can be rebuilt alike.
    pub fn store_info(&self) -> (EffectMode, IoConfig) {
        let state = self.lock();
        (state.mode, state.io_config)
    }

    /// Run INIT, ENABLE, SET_CONFIG, and SET_PARAM on a freshly created
    /// handle, then append it.
    ///
    /// If any command fails the handle is returned to its library and the
    /// chain is left unchanged; the caller skips to the next effect in the
    /// recipe. On success the handle's reported latency joins the chain
    /// latency.
    pub fn add_effect_handle(
        &self,
        mut handle: Box<dyn EffectHandle>,
        library: Arc<dyn EffectLibrary>,
        rotation: u32,
        volume: u32,
    ) -> Result<()> {
        let mut state = self.lock();
        let io_config = state.io_config;
        let params = EffectParams {
            scene: self.scene,
            mode: state.mode,
            rotation,
            volume,
        };

        let setup = [
            EffectCommand::Init(&io_config),
            EffectCommand::Enable(&io_config),
            EffectCommand::SetConfig(ConfigPayload::Io(&io_config)),
        ];
        for command in setup {
            let name = command.name();
            if let Err(err) = handle.command(command) {
                warn!(scene = %self.scene, mode = %params.mode, command = name, %err,
                    "effect setup command failed, skipping handle");
                library.release_effect(handle);
                return Err(err);
            }
        }
        match handle.command(EffectCommand::SetParam(&params)) {
            Ok(reply) => {
                state.latency_us += reply.latency_us;
                state.entries.push(ChainEntry { handle, library });
                Ok(())
            }
            Err(err) => {
                warn!(scene = %self.scene, mode = %params.mode, %err,
                    "effect SET_PARAM failed, skipping handle");
                library.release_effect(handle);
                Err(err)
            }
        }
    }

    /// Re-send SET_PARAM to every handle with the current rotation and
    /// scene volume, re-accumulating latency from the replies.
    pub fn set_effect_param(&self, rotation: u32, volume: u32) -> Result<()> {
        let mut state = self.lock();
        let params = EffectParams {
            scene: self.scene,
            mode: state.mode,
            rotation,
            volume,
        };
        state.latency_us = 0;
        let mut latency = 0;
        for entry in &mut state.entries {
            let reply = entry.handle.command(EffectCommand::SetParam(&params))?;
            latency += reply.latency_us;
        }
        state.latency_us = latency;
        Ok(())
    }

    /// Re-send ENABLE to every handle. Used after a device move brings a
    /// rebuilt chain back into service.
    pub fn reenable(&self) {
        let mut state = self.lock();
        let io_config = state.io_config;
        for entry in &mut state.entries {
            if let Err(err) = entry.handle.command(EffectCommand::Enable(&io_config)) {
                warn!(scene = %self.scene, %err, "effect re-enable failed");
                return;
            }
        }
    }

    /// Process one buffer through the chain.
    ///
    /// The in/out raw pointers ping-pong across handles so no scratch
    /// buffer is needed; the parity of *successful* process calls decides
    /// which buffer holds the result, and a final copy guarantees it lands
    /// in `buf_out`. A handle that fails to process is bypassed for this
    /// frame only.
    pub fn apply(
        &self,
        buf_in: &mut [f32],
        buf_out: &mut [f32],
        frame_len: usize,
        proc_info: AudioEffectProcInfo,
    ) {
        if frame_len == 0 {
            return;
        }

        let mut state = self.lock();
        let out_channels = state.io_config.output.channels as usize;
        let copy_len = (frame_len * out_channels).min(buf_in.len()).min(buf_out.len());

        if state.entries.is_empty() {
            buf_out[..copy_len].copy_from_slice(&buf_in[..copy_len]);
            return;
        }

        let send_imu = proc_info.head_tracking_enabled && !proc_info.offload_enabled;
        let imu = self.posture.posture();

        let mut count: usize = 0;
        for entry in &mut state.entries {
            if send_imu {
                // IMU refresh is best-effort; a deaf handle still processes.
                let _ = entry.handle.command(EffectCommand::SetImu(&imu));
            }
            let result = if count % 2 == 0 {
                entry.handle.process(
                    AudioBuffer {
                        frame_len,
                        pcm: Pcm::F32(buf_in),
                    },
                    AudioBufferMut {
                        frame_len,
                        pcm: PcmMut::F32(buf_out),
                    },
                )
            } else {
                entry.handle.process(
                    AudioBuffer {
                        frame_len,
                        pcm: Pcm::F32(buf_out),
                    },
                    AudioBufferMut {
                        frame_len,
                        pcm: PcmMut::F32(buf_in),
                    },
                )
            };
            match result {
                Ok(()) => count += 1,
                Err(err) => {
                    debug!(scene = %self.scene, %err, "effect process failed, bypassing handle");
                }
            }
        }

        // After an odd number of successes the result sits in buf_out
        // already; an even count (including zero) leaves it in buf_in.
        if count % 2 == 0 {
            buf_out[..copy_len].copy_from_slice(&buf_in[..copy_len]);
        }
    }

    /// Update the input channel configuration for multichannel content and
    /// broadcast SET_CONFIG to every handle.
    ///
    /// A no-op when the configuration is unchanged. On handle failure the
    /// first error is reported but the broadcast continues; the chain is
    /// degraded and will be rebuilt on the next mode change.
    pub fn update_multichannel_io_config(
        &self,
        channels: u32,
        layout: ChannelLayout,
    ) -> Result<()> {
        let mut state = self.lock();
        if state.io_config.input.channels == channels && state.io_config.input.layout == layout {
            return Ok(());
        }
        state.io_config.input.channels = channels;
        state.io_config.input.layout = layout;
        let io_config = state.io_config;

        let mut first_err = None;
        for entry in &mut state.entries {
            if let Err(err) = entry
                .handle
                .command(EffectCommand::SetConfig(ConfigPayload::Io(&io_config)))
            {
                warn!(scene = %self.scene, %err, "multichannel SET_CONFIG failed");
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Push the identity posture into every handle, flushing rotation
    /// state before tracking might be re-enabled by a later session.
    pub fn set_head_tracking_disabled(&self) {
        let mut state = self.lock();
        if state.entries.is_empty() {
            return;
        }
        let imu = HeadPosture::IDENTITY;
        for entry in &mut state.entries {
            if entry.handle.command(EffectCommand::SetImu(&imu)).is_err() {
                warn!(scene = %self.scene, "resetting head tracking state failed");
            }
        }
    }

    /// Return every handle to its library and clear the chain. Safe to
    /// call more than once.
    pub fn release(&self) {
        let mut state = self.lock();
        for entry in state.entries.drain(..) {
            entry.library.release_effect(entry.handle);
        }
        state.latency_us = 0;
    }
}

impl Drop for EffectChain {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for EffectChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("EffectChain")
            .field("scene", &self.scene)
            .field("mode", &state.mode)
            .field("handles", &state.entries.len())
            .field("latency_us", &state.latency_us)
            .finish()
    }
}
