//! The command/process ABI every effect handle implements.

use auricle_core::{
    ChannelLayout, DEFAULT_SAMPLE_RATE, EffectMode, EffectScene, HeadPosture, SampleFormat,
};

use crate::EffectError;

/// One side of a chain's I/O configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoSpec {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u32,
    /// Channel layout mask.
    pub layout: ChannelLayout,
    /// Sample format.
    pub format: SampleFormat,
}

impl Default for IoSpec {
    fn default() -> Self {
        IoSpec {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: 2,
            layout: ChannelLayout::STEREO,
            format: SampleFormat::F32,
        }
    }
}

/// Input and output configuration of a chain, pushed to every handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoConfig {
    /// Spec of buffers fed into the chain.
    pub input: IoSpec,
    /// Spec of buffers the chain produces.
    pub output: IoSpec,
}

/// Payload of the SET_PARAM command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectParams {
    /// Scene the chain belongs to.
    pub scene: EffectScene,
    /// Current effect mode.
    pub mode: EffectMode,
    /// Display rotation in degrees (0/90/180/270).
    pub rotation: u32,
    /// System volume for the scene, 0..=100 steps.
    pub volume: u32,
}

/// Numeric stream parameters for capture (enhance) effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataDescription {
    /// Frame duration in milliseconds.
    pub frame_length_ms: u32,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Bytes per PCM sample.
    pub bytes_per_sample: u32,
    /// Microphone channel count.
    pub mic_count: u32,
    /// AEC reference channel count.
    pub ref_count: u32,
    /// Output channel count.
    pub out_count: u32,
}

/// What a SET_CONFIG command carries: playback chains push the chain
/// [`IoConfig`]; enhance chains push a [`DataDescription`].
#[derive(Debug, Clone, Copy)]
pub enum ConfigPayload<'a> {
    /// Playback chain I/O configuration.
    Io(&'a IoConfig),
    /// Capture stream description.
    Data(&'a DataDescription),
}

/// Control command sent to an effect handle.
#[derive(Debug, Clone, Copy)]
pub enum EffectCommand<'a> {
    /// First command after creation; carries the chain I/O config.
    Init(&'a IoConfig),
    /// Enable processing.
    Enable(&'a IoConfig),
    /// (Re)configure the stream.
    SetConfig(ConfigPayload<'a>),
    /// Scene/mode/rotation/volume parameter block.
    SetParam(&'a EffectParams),
    /// Head-tracking orientation sample.
    SetImu(&'a HeadPosture),
}

impl EffectCommand<'_> {
    /// Command name for diagnostics.
    pub const fn name(&self) -> &'static str {
        match self {
            EffectCommand::Init(_) => "INIT",
            EffectCommand::Enable(_) => "ENABLE",
            EffectCommand::SetConfig(_) => "SET_CONFIG",
            EffectCommand::SetParam(_) => "SET_PARAM",
            EffectCommand::SetImu(_) => "SET_IMU",
        }
    }
}

/// Reply to a control command.
///
/// Only SET_PARAM produces a meaningful value: the handle's processing
/// latency, accumulated into the chain latency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandReply {
    /// Handle-reported latency in microseconds.
    pub latency_us: u32,
}

/// Read-only PCM passed to `process`.
#[derive(Debug, Clone, Copy)]
pub enum Pcm<'a> {
    /// Interleaved float samples.
    F32(&'a [f32]),
    /// Raw PCM bytes (capture path).
    Bytes(&'a [u8]),
}

/// Writable PCM passed to `process`.
#[derive(Debug)]
pub enum PcmMut<'a> {
    /// Interleaved float samples.
    F32(&'a mut [f32]),
    /// Raw PCM bytes (capture path).
    Bytes(&'a mut [u8]),
}

/// Input buffer view with its frame length.
#[derive(Debug, Clone, Copy)]
pub struct AudioBuffer<'a> {
    /// Frames per channel in this buffer.
    pub frame_len: usize,
    /// The samples.
    pub pcm: Pcm<'a>,
}

/// Output buffer view with its frame length.
#[derive(Debug)]
pub struct AudioBufferMut<'a> {
    /// Frames per channel in this buffer.
    pub frame_len: usize,
    /// The samples.
    pub pcm: PcmMut<'a>,
}

/// An opaque effect instance.
///
/// Handles belong to exactly one chain and are returned to their library
/// when the chain is released. Implementations must be prepared for
/// `process` to be called with either PCM encoding and reject the one
/// they do not support with [`EffectError::UnsupportedBuffer`].
pub trait EffectHandle: Send {
    /// Execute a control command.
    fn command(&mut self, command: EffectCommand<'_>) -> Result<CommandReply, EffectError>;

    /// Process one buffer of audio.
    fn process(
        &mut self,
        input: AudioBuffer<'_>,
        output: AudioBufferMut<'_>,
    ) -> Result<(), EffectError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_io_config_is_stereo_float_48k() {
        let cfg = IoConfig::default();
        assert_eq!(cfg.input.sample_rate, 48_000);
        assert_eq!(cfg.input.channels, 2);
        assert_eq!(cfg.input.format, SampleFormat::F32);
        assert_eq!(cfg.input.layout, ChannelLayout::STEREO);
        assert_eq!(cfg.input, cfg.output);
    }

    #[test]
    fn command_names() {
        let cfg = IoConfig::default();
        assert_eq!(EffectCommand::Init(&cfg).name(), "INIT");
        assert_eq!(
            EffectCommand::SetConfig(ConfigPayload::Io(&cfg)).name(),
            "SET_CONFIG"
        );
        assert_eq!(
            EffectCommand::SetImu(&HeadPosture::IDENTITY).name(),
            "SET_IMU"
        );
    }
}
