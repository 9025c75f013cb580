//! WAV-writing sink backend.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use auricle_core::SampleFormat;

use crate::{HalError, Result};

/// Sink backend that writes rendered PCM into a WAV file.
///
/// Accepts S16 and F32 PCM; the WAV spec mirrors the sink attributes the
/// adapter was initialized with. Used by the offline render path and by
/// tests that want to inspect what reached the "hardware".
pub struct FileSink {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    format: SampleFormat,
    total_written: u64,
}

impl FileSink {
    /// Create the output file and write the WAV header.
    pub fn create(
        path: &Path,
        sample_rate: u32,
        channels: u16,
        format: SampleFormat,
    ) -> Result<Self> {
        let spec = match format {
            SampleFormat::S16 => hound::WavSpec {
                channels,
                sample_rate,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            },
            SampleFormat::F32 => hound::WavSpec {
                channels,
                sample_rate,
                bits_per_sample: 32,
                sample_format: hound::SampleFormat::Float,
            },
            other => {
                return Err(HalError::Render(format!(
                    "file sink does not accept {other:?} PCM"
                )));
            }
        };
        let writer = hound::WavWriter::create(path, spec)?;
        Ok(FileSink {
            writer: Some(writer),
            format,
            total_written: 0,
        })
    }

    /// Append one chunk of interleaved PCM bytes.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        let writer = self.writer.as_mut().ok_or(HalError::NotInitialized)?;
        match self.format {
            SampleFormat::S16 => {
                for pair in data.chunks_exact(2) {
                    writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
                }
            }
            SampleFormat::F32 => {
                for quad in data.chunks_exact(4) {
                    writer.write_sample(f32::from_le_bytes([quad[0], quad[1], quad[2], quad[3]]))?;
                }
            }
            _ => return Err(HalError::Render("unsupported format".to_string())),
        }
        self.total_written += data.len() as u64;
        Ok(data.len())
    }

    /// Total bytes written so far.
    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    /// Finalize the WAV header. Further writes fail.
    pub fn finalize(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
        }
        Ok(())
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(err) = writer.finalize() {
                tracing::warn!(%err, "finalizing wav sink on drop failed");
            }
        }
    }
}

impl std::fmt::Debug for FileSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSink")
            .field("format", &self.format)
            .field("total_written", &self.total_written)
            .finish_non_exhaustive()
    }
}
