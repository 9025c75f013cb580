//! The scene mixer.

use std::sync::Arc;

use tracing::trace;

use auricle_core::{
    BufferAttr, DEFAULT_OUT_CHANNELS, EffectScene, SampleFormat, SceneBucket,
};
use auricle_engine::EffectChainManager;

use crate::capture::CaptureTap;
use crate::input::{SinkInput, SinkInputInfo};
use crate::resample::StreamSpec;

/// Output accumulator clamp bound.
const CLAMP: f32 = 0.99;

/// Per-tick classification of the live inputs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputCounts {
    /// Inputs mixed on the primary branch.
    pub primary: usize,
    /// Inputs rendered by the offload branch.
    pub offload: usize,
    /// Inputs split off to the multichannel branch.
    pub multichannel: usize,
}

/// Partitions sink inputs into scene buckets, runs each bucket through
/// its chain, and produces the sink's output frame.
pub struct SceneMixer {
    manager: Arc<EffectChainManager>,
    inputs: Vec<SinkInput>,
    sink_rate: u32,
    sink_channels: u32,
    sink_format: SampleFormat,
    attr: BufferAttr,
    mix_buf: Vec<f32>,
    peek_buf: Vec<f32>,
    accum: Vec<f32>,
    cap_buf: Vec<f32>,
    monitor: Option<CaptureTap>,
}

impl SceneMixer {
    /// Mixer producing `sink_channels` `sink_format` audio at
    /// `sink_rate` for the chain manager's current device.
    pub fn new(
        manager: Arc<EffectChainManager>,
        sink_rate: u32,
        sink_channels: u32,
        sink_format: SampleFormat,
    ) -> Self {
        SceneMixer {
            manager,
            inputs: Vec::new(),
            sink_rate,
            sink_channels,
            sink_format,
            attr: BufferAttr::default(),
            mix_buf: Vec::new(),
            peek_buf: Vec::new(),
            accum: Vec::new(),
            cap_buf: Vec::new(),
            monitor: None,
        }
    }

    /// Attach a stream.
    pub fn add_input(&mut self, input: SinkInput) {
        self.inputs.push(input);
    }

    /// Detach a stream by session id.
    pub fn remove_input(&mut self, session_id: &str) -> bool {
        let before = self.inputs.len();
        self.inputs.retain(|input| input.info.session_id != session_id);
        self.inputs.len() != before
    }

    /// Cork or uncork a stream. This only updates the mixer's view; the
    /// sink's input-state notification drives the per-branch reactions
    /// (the offload engine's cork rewind in particular).
    pub fn set_input_running(&mut self, session_id: &str, running: bool) -> bool {
        for input in &mut self.inputs {
            if input.info.session_id == session_id {
                input.info.running = running;
                return true;
            }
        }
        false
    }

    /// Properties of an attached stream.
    pub fn input_info(&self, session_id: &str) -> Option<&SinkInputInfo> {
        self.inputs
            .iter()
            .find(|input| input.info.session_id == session_id)
            .map(|input| &input.info)
    }

    /// Number of attached streams.
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Attach the inner-capture tap.
    pub fn set_monitor(&mut self, tap: CaptureTap) {
        self.monitor = Some(tap);
    }

    /// True when a monitor is attached and enabled.
    pub fn monitor_active(&self) -> bool {
        self.monitor.as_ref().is_some_and(CaptureTap::is_enabled)
    }

    /// Classify the running inputs across the three render branches.
    pub fn classify(&self) -> InputCounts {
        let a2dp_offload = self.manager.check_a2dp_offload();
        let mut counts = InputCounts::default();
        for input in &self.inputs {
            let info = &input.info;
            if !info.running {
                continue;
            }
            if info.offload {
                counts.offload += 1;
            } else if self.is_multichannel(info, a2dp_offload) {
                counts.multichannel += 1;
            } else {
                counts.primary += 1;
            }
        }
        counts
    }

    fn is_multichannel(&self, info: &SinkInputInfo, a2dp_offload: bool) -> bool {
        a2dp_offload
            && info.channels > DEFAULT_OUT_CHANNELS
            && !self
                .manager
                .exist_chain(info.scene, info.mode, info.spatialization_enabled)
    }

    /// Render one primary tick: partition, mix, process, accumulate,
    /// clamp, convert. Returns bytes written into `out`.
    pub fn render_primary(&mut self, frame_len: usize, out: &mut [u8]) -> usize {
        let out_samples = frame_len * DEFAULT_OUT_CHANNELS as usize;
        self.accum.clear();
        self.accum.resize(out_samples, 0.0);
        self.cap_buf.clear();
        self.cap_buf.resize(out_samples, 0.0);

        let a2dp_offload = self.manager.check_a2dp_offload();

        for bucket in SceneBucket::ALL {
            let (channels, _layout) = match bucket.scene() {
                Some(scene) => self.manager.return_effect_channel_info(scene),
                None => (DEFAULT_OUT_CHANNELS, auricle_core::ChannelLayout::STEREO),
            };
            let members: Vec<usize> = self
                .inputs
                .iter()
                .enumerate()
                .filter(|(_, input)| {
                    let info = &input.info;
                    if !info.running || info.offload {
                        return false;
                    }
                    if self.is_multichannel(info, a2dp_offload) {
                        return false;
                    }
                    let exists = self.manager.exist_chain(
                        info.scene,
                        info.mode,
                        info.spatialization_enabled,
                    );
                    match bucket {
                        SceneBucket::Scene(scene) => info.scene == scene && exists,
                        SceneBucket::Bypass => !exists,
                    }
                })
                .map(|(index, _)| index)
                .collect();
            if members.is_empty() {
                continue;
            }
            trace!(%bucket, inputs = members.len(), channels, "mixing bucket");

            let mix_samples = frame_len * channels as usize;
            self.mix_buf.clear();
            self.mix_buf.resize(mix_samples, 0.0);
            self.peek_buf.resize(mix_samples, 0.0);
            let target = StreamSpec {
                sample_rate: self.sink_rate,
                channels,
            };
            for index in members {
                self.inputs[index].peek(frame_len, target, &mut self.peek_buf);
                for (acc, sample) in self.mix_buf.iter_mut().zip(&self.peek_buf) {
                    *acc += sample;
                }
            }

            // the capture tap hears the mix before any chain touches it
            accumulate_stereo(&self.mix_buf, channels, &mut self.cap_buf);

            self.attr.reshape(frame_len, channels);
            self.attr.buf_in.copy_from_slice(&self.mix_buf);
            match bucket.scene() {
                Some(scene) => {
                    // a missing chain already degraded to a copy inside
                    let _ = self.manager.apply_chain(scene, &mut self.attr);
                }
                None => {
                    self.attr.buf_out.copy_from_slice(&self.attr.buf_in[..out_samples]);
                }
            }
            for (acc, sample) in self.accum.iter_mut().zip(&self.attr.buf_out) {
                *acc += sample;
            }
        }

        for sample in &mut self.accum {
            *sample = sample.clamp(-CLAMP, CLAMP);
        }

        if let Some(monitor) = &mut self.monitor {
            monitor.push(&self.cap_buf);
        }

        let bytes = out_samples * self.sink_format.bytes_per_sample();
        let n = bytes.min(out.len());
        self.sink_format
            .convert_from_float(&self.accum, &mut out[..n]);
        n
    }

    /// Render one multichannel tick. Returns bytes written, zero when
    /// the branch is inactive.
    pub fn render_multichannel(&mut self, frame_len: usize, out: &mut [u8]) -> usize {
        if !self.manager.check_a2dp_offload() {
            return 0;
        }
        let (channels, layout) = self.manager.return_multichannel_info();
        let mix_samples = frame_len * channels as usize;
        self.mix_buf.clear();
        self.mix_buf.resize(mix_samples, 0.0);
        self.peek_buf.resize(mix_samples, 0.0);

        let target = StreamSpec {
            sample_rate: self.sink_rate,
            channels,
        };
        let member_indices: Vec<usize> = self
            .inputs
            .iter()
            .enumerate()
            .filter(|(_, input)| {
                let info = &input.info;
                info.running && !info.offload && self.is_multichannel(info, true)
            })
            .map(|(index, _)| index)
            .collect();
        for index in member_indices {
            self.inputs[index].peek(frame_len, target, &mut self.peek_buf);
            for (acc, sample) in self.mix_buf.iter_mut().zip(&self.peek_buf) {
                *acc += sample;
            }
        }

        trace!(channels, %layout, "multichannel branch rendered");
        for sample in &mut self.mix_buf {
            *sample = sample.clamp(-CLAMP, CLAMP);
        }
        let bytes = mix_samples * self.sink_format.bytes_per_sample();
        let n = bytes.min(out.len());
        self.sink_format
            .convert_from_float(&self.mix_buf, &mut out[..n]);
        n
    }

    /// Elect the (scene, mode, effect-enabled) triple the DSP room-mode
    /// should follow: the properties of the newest session, newest
    /// meaning the highest numeric session id.
    pub fn elect_hdi_param(
        &self,
    ) -> Option<(EffectScene, auricle_core::EffectMode, bool)> {
        let mut best: Option<(i64, EffectScene, auricle_core::EffectMode, bool)> = None;
        for input in &self.inputs {
            let info = &input.info;
            let Ok(id) = info.session_id.parse::<i64>() else {
                continue;
            };
            let effect_enabled = info.spatialization_enabled
                && info.mode == auricle_core::EffectMode::Default;
            if best.is_none_or(|(bid, ..)| id > bid) {
                best = Some((id, info.scene, info.mode, effect_enabled));
            }
        }
        best.map(|(_, scene, mode, enabled)| (scene, mode, enabled))
    }

    /// Sink channel count this mixer produces on the primary branch.
    pub fn sink_channels(&self) -> u32 {
        self.sink_channels
    }

    /// Sink sample format.
    pub fn sink_format(&self) -> SampleFormat {
        self.sink_format
    }

    /// The chain manager backing this mixer.
    pub fn manager(&self) -> &Arc<EffectChainManager> {
        &self.manager
    }
}

/// Fold an interleaved `channels`-wide buffer into a stereo accumulator.
fn accumulate_stereo(src: &[f32], channels: u32, dst: &mut [f32]) {
    let ch = channels as usize;
    if ch == 0 {
        return;
    }
    for (frame, chunk) in src.chunks_exact(ch).enumerate() {
        let left = chunk[0];
        let right = if ch > 1 { chunk[1] } else { chunk[0] };
        if frame * 2 + 1 < dst.len() {
            dst[frame * 2] += left;
            dst[frame * 2 + 1] += right;
        }
    }
}

impl std::fmt::Debug for SceneMixer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneMixer")
            .field("inputs", &self.inputs.len())
            .field("sink_rate", &self.sink_rate)
            .field("sink_channels", &self.sink_channels)
            .field("sink_format", &self.sink_format)
            .finish_non_exhaustive()
    }
}
