//! Effect libraries, the registry, and per-scene processing chains.
//!
//! An *effect library* is a registered provider of opaque effect handles.
//! Each handle speaks a two-call ABI: `command` for control (init, enable,
//! configure, parameters, IMU data) and `process` for audio. The
//! [`EffectRegistry`] resolves effect names to libraries; an
//! [`EffectChain`] owns an ordered list of handles for one playback scene,
//! and an [`EnhanceChain`] does the same for capture.
//!
//! Failure policy throughout: a handle that rejects a command or a process
//! call is skipped, never fatal. The chain always produces audio, degraded
//! to pass-through in the worst case.

mod abi;
mod builtin;
mod chain;
mod enhance;
mod library;
mod registry;

pub use abi::{
    AudioBuffer, AudioBufferMut, CommandReply, ConfigPayload, DataDescription, EffectCommand,
    EffectHandle, EffectParams, IoConfig, IoSpec, Pcm, PcmMut,
};
pub use builtin::{BUNDLED_LIBRARY_NAME, BundledLibrary};
pub use chain::{AudioEffectProcInfo, EffectChain, FixedPosture, PostureProvider};
pub use enhance::EnhanceChain;
pub use library::{
    EFFECT_ABI_VERSION, EffectBinding, EffectDescriptor, EffectLibrary, LibraryDescriptor,
    LibraryRegistration,
};
pub use registry::EffectRegistry;

use thiserror::Error;

/// Errors surfaced by the effect layer.
#[derive(Debug, Error)]
pub enum EffectError {
    /// No library registered under this name.
    #[error("library '{0}' is not registered")]
    UnknownLibrary(String),

    /// No effect bound under this name.
    #[error("effect '{0}' is not registered")]
    UnknownEffect(String),

    /// The library refused to create the effect instance.
    #[error("creating effect '{effect}' from library '{library}' failed: {reason}")]
    Creation {
        /// Effect name requested.
        effect: String,
        /// Library asked to create it.
        library: String,
        /// Library-reported reason.
        reason: String,
    },

    /// A handle rejected a control command.
    #[error("effect command {command} rejected: {reason}")]
    Command {
        /// Command name.
        command: &'static str,
        /// Handle-reported reason.
        reason: String,
    },

    /// A handle rejected a process call.
    #[error("effect process failed: {0}")]
    Process(String),

    /// The handle does not understand the buffer encoding it was given.
    #[error("unsupported buffer encoding for this effect")]
    UnsupportedBuffer,

    /// The chain has no handles to run.
    #[error("effect chain is empty")]
    EmptyChain,
}

/// Convenience result alias for effect operations.
pub type Result<T> = std::result::Result<T, EffectError>;
