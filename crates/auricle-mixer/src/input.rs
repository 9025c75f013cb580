//! Sink inputs as the mixer sees them.

use auricle_core::{ChannelLayout, EffectMode, EffectScene};

use crate::resample::{StreamResampler, StreamSpec};

/// Pull interface for one stream's PCM.
///
/// Returns samples written; anything short of the request means the
/// stream underran and the remainder is treated as silence.
pub trait PcmSource: Send {
    /// Fill `buf` with interleaved samples at the input's native spec.
    fn pull(&mut self, buf: &mut [f32]) -> usize;
}

/// Source producing silence forever.
#[derive(Debug, Default)]
pub struct SilenceSource;

impl PcmSource for SilenceSource {
    fn pull(&mut self, buf: &mut [f32]) -> usize {
        buf.fill(0.0);
        buf.len()
    }
}

/// Source draining a prepared sample vector, then silence.
#[derive(Debug)]
pub struct VecSource {
    samples: Vec<f32>,
    pos: usize,
}

impl VecSource {
    /// Source over `samples`.
    pub fn new(samples: Vec<f32>) -> Self {
        VecSource { samples, pos: 0 }
    }
}

impl PcmSource for VecSource {
    fn pull(&mut self, buf: &mut [f32]) -> usize {
        let available = self.samples.len() - self.pos;
        let n = buf.len().min(available);
        buf[..n].copy_from_slice(&self.samples[self.pos..self.pos + n]);
        buf[n..].fill(0.0);
        self.pos += n;
        n
    }
}

/// Stream properties the partitioning logic reads every tick.
#[derive(Debug, Clone)]
pub struct SinkInputInfo {
    /// Session id of the stream.
    pub session_id: String,
    /// Scene assigned by the policy layer.
    pub scene: EffectScene,
    /// Effect mode of the stream.
    pub mode: EffectMode,
    /// Spatialization requested.
    pub spatialization_enabled: bool,
    /// Stream is offloaded (rendered by the offload branch, not mixed).
    pub offload: bool,
    /// Native sample rate.
    pub sample_rate: u32,
    /// Native channel count.
    pub channels: u32,
    /// Native channel layout.
    pub layout: ChannelLayout,
    /// Stream is producing audio (uncorked).
    pub running: bool,
}

/// One mixable stream: its properties, its PCM source, and the converter
/// to whatever spec its bucket currently needs.
pub struct SinkInput {
    /// Stream properties.
    pub info: SinkInputInfo,
    source: Box<dyn PcmSource>,
    resampler: Option<StreamResampler>,
    pull_buf: Vec<f32>,
}

impl SinkInput {
    /// Input over `source` with the given properties.
    pub fn new(info: SinkInputInfo, source: Box<dyn PcmSource>) -> Self {
        SinkInput {
            info,
            source,
            resampler: None,
            pull_buf: Vec::new(),
        }
    }

    /// Pull `frame_len` frames converted to `target`, writing into `out`
    /// (`frame_len * target.channels` samples). The resampler is rebuilt
    /// whenever the target or native spec changed since the last tick.
    pub fn peek(&mut self, frame_len: usize, target: StreamSpec, out: &mut [f32]) {
        let native = StreamSpec {
            sample_rate: self.info.sample_rate,
            channels: self.info.channels,
        };
        let rebuild = match &self.resampler {
            Some(rs) => rs.input_spec() != native || rs.output_spec() != target,
            None => true,
        };
        if rebuild {
            self.resampler = Some(StreamResampler::new(native, target));
        }
        let Some(resampler) = self.resampler.as_mut() else {
            return;
        };

        let needed = resampler.frames_needed(frame_len) * native.channels as usize;
        self.pull_buf.resize(needed, 0.0);
        let pulled = self.source.pull(&mut self.pull_buf);
        self.pull_buf[pulled..].fill(0.0);
        resampler.process(&self.pull_buf, out);
    }
}

impl std::fmt::Debug for SinkInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkInput")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(channels: u32) -> SinkInputInfo {
        SinkInputInfo {
            session_id: "t".to_string(),
            scene: EffectScene::Music,
            mode: EffectMode::Default,
            spatialization_enabled: false,
            offload: false,
            sample_rate: 48_000,
            channels,
            layout: ChannelLayout::default_for_channels(channels),
            running: true,
        }
    }

    #[test]
    fn peek_converts_to_target_channels() {
        let mut input = SinkInput::new(info(1), Box::new(VecSource::new(vec![0.5; 4])));
        let target = StreamSpec {
            sample_rate: 48_000,
            channels: 2,
        };
        let mut out = [0.0f32; 8];
        input.peek(4, target, &mut out);
        assert_eq!(out, [0.5; 8]);
    }

    #[test]
    fn exhausted_source_yields_silence() {
        let mut input = SinkInput::new(info(2), Box::new(VecSource::new(vec![1.0; 4])));
        let target = StreamSpec {
            sample_rate: 48_000,
            channels: 2,
        };
        let mut out = [9.0f32; 8];
        input.peek(4, target, &mut out);
        assert_eq!(&out[..4], &[1.0; 4]);
        assert_eq!(&out[4..], &[0.0; 4]);
    }

    #[test]
    fn resampler_rebuilds_on_target_change() {
        let mut input = SinkInput::new(info(2), Box::new(SilenceSource));
        let mut out2 = [0.0f32; 4];
        let mut out6 = [0.0f32; 12];
        input.peek(
            2,
            StreamSpec {
                sample_rate: 48_000,
                channels: 2,
            },
            &mut out2,
        );
        input.peek(
            2,
            StreamSpec {
                sample_rate: 48_000,
                channels: 6,
            },
            &mut out6,
        );
        assert_eq!(out6, [0.0; 12]);
    }
}
