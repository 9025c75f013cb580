//! Shared types for the Auricle audio-effect pipeline.
//!
//! This crate holds the static catalog every other crate agrees on:
//!
//! - **Scenes and modes**: [`EffectScene`], [`EffectMode`], and the
//!   [`SceneBucket`] partitioning set used by the mixer
//! - **Devices**: [`DeviceType`] with its wire names
//! - **Channel layouts**: [`ChannelLayout`] bitmasks and the spatializer
//!   gate set [`HVS_SUPPORTED_LAYOUTS`]
//! - **Sample formats**: [`SampleFormat`] plus float conversion helpers
//! - **Buffer descriptors**: [`BufferAttr`] and [`EnhanceBufferAttr`]
//! - **Head posture**: [`HeadPosture`] IMU snapshots
//!
//! Nothing here allocates on the render path; the conversion helpers
//! operate on caller-provided slices.

mod buffer;
mod device;
mod format;
mod layout;
mod posture;
mod rate_gate;
mod scene;

pub use buffer::{BufferAttr, EnhanceBufferAttr};
pub use device::DeviceType;
pub use format::SampleFormat;
pub use layout::{ChannelLayout, ChannelPosition, HVS_SUPPORTED_LAYOUTS};
pub use posture::HeadPosture;
pub use rate_gate::RateGate;
pub use scene::{EffectMode, EffectScene, SceneBucket};

/// Sample rate every chain is configured with unless told otherwise.
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// Frames per render tick at the default sink configuration.
pub const DEFAULT_FRAME_LEN: usize = 1440;

/// Channel count of the stereo AP processing path.
pub const DEFAULT_CHANNELS: u32 = 2;

/// Upper bound on input channels a chain may be configured with.
/// Temp buffers are sized for this.
pub const MAX_IN_CHANNELS: u32 = 16;

/// Output channel count of AP effect chains.
pub const DEFAULT_OUT_CHANNELS: u32 = 2;

/// Channel count of the multichannel render branch.
pub const MULTICHANNEL_NUM_CHANNELS: u32 = 6;
