//! Chain lifecycle management for the Auricle effect pipeline.
//!
//! The [`EffectChainManager`] owns every playback effect chain, keyed by
//! (scene, device), with refcounted reuse across sessions. It reacts to
//! device moves, spatialization/offload transitions, head-tracking state,
//! volume, and rotation, pushing parameters either into the AP chains or
//! down to the DSP through the HDI proxy. The [`EnhanceChainManager`] is
//! the capture-side mirror.

mod enhance_manager;
mod head_tracker;
mod manager;
mod param_sink;
mod rotation;
mod session;
mod volume;

pub use enhance_manager::{EnhanceChainManager, EnhanceManagerConfig, EnhanceRecipe};
pub use head_tracker::{
    HeadTracker, NullPostureSensor, PostureListener, PostureSensor, SpatializerEngine,
};
pub use manager::{
    ChainKey, ChainManagerConfig, ChainRecipe, EffectChainManager, SceneMapEntry,
    SpatializationState,
};
pub use rotation::EffectRotation;
pub use session::{SessionEffectInfo, SessionId};
pub use volume::EffectVolume;

use thiserror::Error;

/// Errors surfaced by the chain managers.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Operation requires `init` first.
    #[error("chain manager has not been initialized")]
    NotInitialized,

    /// No output device has been selected.
    #[error("no output device is set")]
    DeviceUnset,

    /// No chain exists under the requested key.
    #[error("no effect chain for scene {scene} on device {device}")]
    MissingChain {
        /// Scene requested.
        scene: auricle_core::EffectScene,
        /// Device the scene was keyed with.
        device: auricle_core::DeviceType,
    },

    /// The session id is not registered.
    #[error("session '{0}' is not registered")]
    UnknownSession(String),

    /// Session info matched the stored record exactly.
    #[error("session info unchanged")]
    NoChange,

    /// A chain existed with a dead refcount and was discarded.
    #[error("stale chain for scene {0} was discarded")]
    StaleChain(auricle_core::EffectScene),

    /// Duplicate enhance chain for a key that already has one.
    #[error("enhance chain already exists for '{0}'")]
    DuplicateEnhanceChain(String),

    /// Error bubbled up from the effect layer.
    #[error(transparent)]
    Effect(#[from] auricle_effect::EffectError),

    /// Error bubbled up from the HAL layer.
    #[error(transparent)]
    Hal(#[from] auricle_hal::HalError),

    /// Head-tracking sensor operation failed.
    #[error("sensor operation failed: {0}")]
    Sensor(String),
}

/// Convenience result alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
