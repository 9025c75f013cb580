//! Capture source facade for the enhance path.

use auricle_core::SampleFormat;

use crate::{HalError, Result};

/// Static attributes a capture source is opened with.
#[derive(Debug, Clone)]
pub struct SourceAttr {
    /// Adapter instance name.
    pub adapter_name: String,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Microphone channel count.
    pub channels: u32,
    /// PCM sample format.
    pub format: SampleFormat,
}

impl Default for SourceAttr {
    fn default() -> Self {
        SourceAttr {
            adapter_name: "primary_mic".to_string(),
            sample_rate: 16_000,
            channels: 2,
            format: SampleFormat::S16,
        }
    }
}

/// Minimal mic-source facade.
///
/// The null backend produces silence; it exists so the enhance pipeline
/// has a source to pull from in demos and tests.
#[derive(Debug)]
pub struct CaptureSourceAdapter {
    attr: Option<SourceAttr>,
    started: bool,
    frames_captured: u64,
}

impl CaptureSourceAdapter {
    /// New, uninitialized source.
    pub fn new() -> Self {
        CaptureSourceAdapter {
            attr: None,
            started: false,
            frames_captured: 0,
        }
    }

    /// Bind attributes.
    pub fn init(&mut self, attr: &SourceAttr) -> Result<()> {
        self.attr = Some(attr.clone());
        Ok(())
    }

    /// Start capturing.
    pub fn start(&mut self) -> Result<()> {
        if self.attr.is_none() {
            return Err(HalError::NotInitialized);
        }
        self.started = true;
        Ok(())
    }

    /// Fill `buf` with one capture frame. Returns bytes produced.
    pub fn capture_frame(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.started {
            return Err(HalError::NotStarted);
        }
        buf.fill(0);
        if let Some(attr) = &self.attr {
            let frame_bytes = attr.channels as usize * attr.format.bytes_per_sample();
            if frame_bytes > 0 {
                self.frames_captured += (buf.len() / frame_bytes) as u64;
            }
        }
        Ok(buf.len())
    }

    /// Stop capturing.
    pub fn stop(&mut self) -> Result<()> {
        self.started = false;
        Ok(())
    }

    /// Total frames produced since start.
    pub fn frames_captured(&self) -> u64 {
        self.frames_captured
    }
}

impl Default for CaptureSourceAdapter {
    fn default() -> Self {
        CaptureSourceAdapter::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_requires_start() {
        let mut source = CaptureSourceAdapter::new();
        let mut buf = [1u8; 64];
        assert!(source.capture_frame(&mut buf).is_err());
        source.init(&SourceAttr::default()).unwrap();
        source.start().unwrap();
        assert_eq!(source.capture_frame(&mut buf).unwrap(), 64);
        assert!(buf.iter().all(|&b| b == 0));
        // stereo s16: 4 bytes per frame
        assert_eq!(source.frames_captured(), 16);
    }
}
