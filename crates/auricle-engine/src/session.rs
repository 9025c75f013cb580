//! Per-session effect bookkeeping.

use auricle_core::{ChannelLayout, EffectMode, EffectScene};

/// Opaque session identifier handed in by the policy server.
pub type SessionId = String;

/// What the manager knows about one active playback session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEffectInfo {
    /// Scene the session plays under.
    pub scene: EffectScene,
    /// Effect mode requested for the session.
    pub mode: EffectMode,
    /// Stream channel count.
    pub channels: u32,
    /// Stream channel layout.
    pub layout: ChannelLayout,
    /// Whether spatialization is requested for this stream.
    pub spatialization_enabled: bool,
    /// System volume step for the stream, 0..=100.
    pub volume: u32,
}

impl SessionEffectInfo {
    /// Stereo default-mode session at the given volume.
    pub fn stereo(scene: EffectScene, volume: u32) -> Self {
        SessionEffectInfo {
            scene,
            mode: EffectMode::Default,
            channels: 2,
            layout: ChannelLayout::STEREO,
            spatialization_enabled: false,
            volume,
        }
    }
}
