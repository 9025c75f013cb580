//! Hardware abstraction for Auricle's render and capture paths.
//!
//! A [`SinkAdapter`] is a uniform facade over the concrete sink backends,
//! selected by [`DeviceClass`]. The set of device classes is closed, so
//! dispatch is by tagged variant rather than trait objects. The
//! [`HdiParamProxy`] speaks the fixed-length command protocol of the DSP
//! effect processor.

mod adapter;
mod file;
mod hdi_param;
mod null;
mod running_lock;
mod source;

pub use adapter::{
    DeviceClass, RenderCallback, RenderCallbackType, SinkAdapter, SinkAttr, SinkBackend,
};
pub use file::FileSink;
pub use hdi_param::{
    GET_HDI_BUFFER_LEN, HdiCommand, HdiEffectControl, HdiParamProxy, SEND_HDI_COMMAND_LEN,
};
pub use null::NullSink;
pub use running_lock::OffloadRunningLock;
pub use source::{CaptureSourceAdapter, SourceAttr};

use thiserror::Error;

/// Errors surfaced by the HAL layer.
#[derive(Debug, Error)]
pub enum HalError {
    /// Operation requires `init` first.
    #[error("adapter is not initialized")]
    NotInitialized,

    /// Operation requires `start` first.
    #[error("adapter is not started")]
    NotStarted,

    /// The backend rejected a render call.
    #[error("render failed: {0}")]
    Render(String),

    /// WAV backend error.
    #[error("wav backend error: {0}")]
    Wav(#[from] hound::Error),

    /// Filesystem error from the file backend.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An HDI command was rejected.
    #[error("hdi command failed: {0}")]
    Hdi(String),

    /// The device class does not support this operation.
    #[error("operation unsupported for device class {0:?}")]
    Unsupported(DeviceClass),
}

/// Convenience result alias for HAL operations.
pub type Result<T> = std::result::Result<T, HalError>;
