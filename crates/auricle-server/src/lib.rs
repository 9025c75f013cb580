//! Service assembly for the Auricle effect pipeline.
//!
//! The [`AudioEffectService`] is the context object owning the playback
//! and capture chain managers. Boot inputs arrive as a
//! [`ServiceConfig`] (parseable from TOML); the [`adapter`] module is
//! the thin wrapper surface the native module loader calls into.

pub mod adapter;
mod config;
mod service;

pub use config::{
    ChainEntry, EffectEntry, EnhanceSceneMapEntry, LibraryEntry, SceneMapTomlEntry, ServiceConfig,
};
pub use service::AudioEffectService;

use thiserror::Error;

/// Errors surfaced while assembling or driving the service.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Reading the configuration file failed.
    #[error("failed to read config '{path}': {source}")]
    ReadConfig {
        /// Path that could not be read.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Parsing the configuration failed.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The service was used before `install`.
    #[error("audio effect service is not installed")]
    NotInstalled,

    /// Error bubbled up from the engine.
    #[error(transparent)]
    Engine(#[from] auricle_engine::EngineError),
}

/// Convenience result alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
