//! Scene-aware mixing for the primary and multichannel render branches.
//!
//! Each render tick the [`SceneMixer`] peeks every live sink input,
//! partitions them into per-scene buckets, mixes each bucket at the
//! channel count its chain expects, runs the chain through the
//! [`auricle_engine::EffectChainManager`], and accumulates the results
//! into one output frame, clamped and converted to the sink's native
//! format. A lock-free tap duplicates the pre-effect mix for the
//! inner-capture monitor.

mod capture;
mod input;
mod mixer;
mod resample;

pub use capture::{CaptureMonitor, CaptureTap, inner_capture_pair};
pub use input::{PcmSource, SilenceSource, SinkInput, SinkInputInfo, VecSource};
pub use mixer::{InputCounts, SceneMixer};
pub use resample::{StreamResampler, StreamSpec};
