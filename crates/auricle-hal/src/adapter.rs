//! The sink adapter facade.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use auricle_core::{DeviceType, EffectScene, SampleFormat};

use crate::file::FileSink;
use crate::null::NullSink;
use crate::running_lock::OffloadRunningLock;
use crate::{HalError, Result};

/// Device class a sink adapter serves. The set is closed; the facade
/// dispatches on it directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    /// Main mixed output.
    Primary,
    /// Compressed/DSP offload path.
    Offload,
    /// Bluetooth A2DP.
    A2dp,
    /// USB audio.
    Usb,
    /// Remote (distributed) sink.
    Remote,
    /// Multichannel speaker branch.
    MultiChannel,
}

impl DeviceClass {
    /// Name used in thread names and logs.
    pub const fn name(self) -> &'static str {
        match self {
            DeviceClass::Primary => "primary",
            DeviceClass::Offload => "offload",
            DeviceClass::A2dp => "a2dp",
            DeviceClass::Usb => "usb",
            DeviceClass::Remote => "remote",
            DeviceClass::MultiChannel => "multichannel",
        }
    }
}

/// Static attributes a sink is initialized with.
#[derive(Debug, Clone)]
pub struct SinkAttr {
    /// Adapter instance name.
    pub adapter_name: String,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u32,
    /// PCM sample format.
    pub format: SampleFormat,
    /// Device the sink routes to.
    pub device_type: DeviceType,
}

impl SinkAttr {
    /// Bytes per second at these attributes.
    pub fn byte_rate(&self) -> u64 {
        u64::from(self.sample_rate)
            * u64::from(self.channels)
            * self.format.bytes_per_sample() as u64
    }

    /// Bytes for `ms` milliseconds of audio.
    pub fn bytes_for_ms(&self, ms: u64) -> usize {
        (self.byte_rate() * ms / 1000) as usize
    }
}

impl Default for SinkAttr {
    fn default() -> Self {
        SinkAttr {
            adapter_name: "primary".to_string(),
            sample_rate: auricle_core::DEFAULT_SAMPLE_RATE,
            channels: 2,
            format: SampleFormat::F32,
            device_type: DeviceType::Speaker,
        }
    }
}

/// Events a sink reports back to its driver thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderCallbackType {
    /// A previously full non-blocking write path has space again.
    NonblockWriteCompleted,
    /// Drain finished.
    DrainCompleted,
    /// Flush finished.
    FlushCompleted,
    /// Device cache filled.
    RenderFull,
    /// Unrecoverable device error.
    ErrorOccur,
}

/// Callback registered by the sink's driver thread.
pub type RenderCallback = Arc<dyn Fn(RenderCallbackType) + Send + Sync>;

/// Concrete backend behind an adapter.
#[derive(Debug)]
pub enum SinkBackend {
    /// Timed discard with a bounded device cache.
    Null(NullSink),
    /// WAV file writer.
    File(FileSink),
}

/// Uniform facade over the concrete sink backends.
///
/// One adapter per device class per sink instance. All operations are
/// `&mut self`; each adapter is owned by exactly one writer thread.
pub struct SinkAdapter {
    class: DeviceClass,
    backend: SinkBackend,
    attr: Option<SinkAttr>,
    started: bool,
    paused: bool,
    muted: bool,
    volume: (f32, f32),
    buffer_size_ms: u64,
    callback: Option<RenderCallback>,
    running_lock: OffloadRunningLock,
    parameters: HashMap<String, String>,
    was_full: bool,
}

impl SinkAdapter {
    /// Adapter for `class` over the given backend.
    pub fn new(class: DeviceClass, backend: SinkBackend) -> Self {
        SinkAdapter {
            class,
            backend,
            attr: None,
            started: false,
            paused: false,
            muted: false,
            volume: (1.0, 1.0),
            buffer_size_ms: 0,
            callback: None,
            running_lock: OffloadRunningLock::new(),
            parameters: HashMap::new(),
            was_full: false,
        }
    }

    /// Device class of this adapter.
    pub fn class(&self) -> DeviceClass {
        self.class
    }

    /// Attributes, once initialized.
    pub fn attr(&self) -> Option<&SinkAttr> {
        self.attr.as_ref()
    }

    /// Bind attributes. Must precede `start`.
    pub fn init(&mut self, attr: &SinkAttr) -> Result<()> {
        info!(class = self.class.name(), adapter = %attr.adapter_name,
            rate = attr.sample_rate, channels = attr.channels, "sink adapter init");
        self.attr = Some(attr.clone());
        Ok(())
    }

    /// Drop attributes and stop.
    pub fn deinit(&mut self) {
        self.started = false;
        self.attr = None;
        if let SinkBackend::File(file) = &mut self.backend {
            if let Err(err) = file.finalize() {
                warn!(%err, "finalizing file sink failed");
            }
        }
    }

    /// True after a successful `start`.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Start rendering.
    pub fn start(&mut self) -> Result<()> {
        if self.attr.is_none() {
            return Err(HalError::NotInitialized);
        }
        self.started = true;
        self.paused = false;
        debug!(class = self.class.name(), "sink adapter started");
        Ok(())
    }

    /// Stop rendering.
    pub fn stop(&mut self) -> Result<()> {
        self.started = false;
        Ok(())
    }

    /// Pause without releasing the device.
    pub fn pause(&mut self) -> Result<()> {
        self.paused = true;
        Ok(())
    }

    /// Resume after pause.
    pub fn resume(&mut self) -> Result<()> {
        self.paused = false;
        Ok(())
    }

    /// Discard queued audio.
    pub fn flush(&mut self) -> Result<()> {
        if let SinkBackend::Null(null) = &mut self.backend {
            null.clear();
        }
        self.fire(RenderCallbackType::FlushCompleted);
        Ok(())
    }

    /// Write one chunk. Returns bytes accepted.
    ///
    /// Interpretation of 0 is class-specific, as with the real HDI: the
    /// offload path reads it as "device cache full, retry after the
    /// write-completed callback"; the primary writer treats it as failure.
    pub fn render_frame(&mut self, data: &[u8]) -> Result<usize> {
        if !self.started {
            return Err(HalError::NotStarted);
        }
        if data.is_empty() {
            return Ok(0);
        }
        let result = match &mut self.backend {
            SinkBackend::Null(null) => Ok(null.write(data)),
            SinkBackend::File(file) => file.write(data),
        };
        if matches!(result, Ok(0)) {
            self.was_full = true;
            self.fire(RenderCallbackType::RenderFull);
        }
        result
    }

    /// Let the backend drain by elapsed time and fire the non-blocking
    /// write-completed callback if a full cache opened up. Driver threads
    /// call this when they wake without a message.
    pub fn pump(&mut self) {
        let capacity = self.capacity_bytes();
        let opened = match &mut self.backend {
            SinkBackend::Null(null) => self.was_full && null.cached_bytes() < capacity,
            SinkBackend::File(_) => false,
        };
        if opened {
            self.was_full = false;
            self.fire(RenderCallbackType::NonblockWriteCompleted);
        }
    }

    /// Simulate the hardware consuming `bytes` (tests and virtual-time
    /// runs). Fires the write-completed callback on a full→writable edge.
    pub fn consume(&mut self, bytes: usize) {
        let opened = match &mut self.backend {
            SinkBackend::Null(null) => null.consume(bytes) || self.was_full,
            SinkBackend::File(_) => false,
        };
        if opened {
            self.was_full = false;
            self.fire(RenderCallbackType::NonblockWriteCompleted);
        }
    }

    fn capacity_bytes(&self) -> usize {
        match (&self.attr, self.buffer_size_ms) {
            (Some(attr), ms) if ms > 0 => attr.bytes_for_ms(ms),
            _ => usize::MAX,
        }
    }

    /// Device-side latency in microseconds: queued audio plus a small
    /// class-specific base.
    pub fn latency_us(&mut self) -> u64 {
        let base = match self.class {
            DeviceClass::Offload => 40_000,
            DeviceClass::A2dp => 120_000,
            _ => 10_000,
        };
        let queued = match (&mut self.backend, &self.attr) {
            (SinkBackend::Null(null), Some(attr)) if attr.byte_rate() > 0 => {
                null.cached_bytes() as u64 * 1_000_000 / attr.byte_rate()
            }
            _ => 0,
        };
        base + queued
    }

    /// Frames the device has consumed, with a wall-clock stamp.
    pub fn presentation_position(&mut self) -> Result<(u64, u64, u32)> {
        let attr = self.attr.as_ref().ok_or(HalError::NotInitialized)?;
        let frame_bytes = u64::from(attr.channels) * attr.format.bytes_per_sample() as u64;
        let consumed = match &mut self.backend {
            SinkBackend::Null(null) => null.consumed_bytes(),
            SinkBackend::File(file) => file.total_written(),
        };
        let frames = if frame_bytes > 0 { consumed / frame_bytes } else { 0 };
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Ok((frames, now.as_secs(), now.subsec_nanos()))
    }

    /// Set channel volumes.
    pub fn set_volume(&mut self, left: f32, right: f32) -> Result<()> {
        self.volume = (left, right);
        Ok(())
    }

    /// Current channel volumes.
    pub fn volume(&self) -> (f32, f32) {
        self.volume
    }

    /// Mute or unmute.
    pub fn set_mute(&mut self, mute: bool) -> Result<()> {
        self.muted = mute;
        Ok(())
    }

    /// Current mute state.
    pub fn mute(&self) -> bool {
        self.muted
    }

    /// Tell the device which audio scene and routing it serves.
    pub fn set_audio_scene(&mut self, scene: EffectScene, device: DeviceType) -> Result<()> {
        debug!(class = self.class.name(), %scene, %device, "set audio scene");
        Ok(())
    }

    /// Reroute the sink to another device.
    pub fn set_output_route(&mut self, device: DeviceType) -> Result<()> {
        debug!(class = self.class.name(), %device, "set output route");
        Ok(())
    }

    /// Resize the device cache. Only meaningful for the offload class.
    pub fn set_buffer_size_ms(&mut self, ms: u64) -> Result<()> {
        self.buffer_size_ms = ms;
        let capacity = self.capacity_bytes();
        if let SinkBackend::Null(null) = &mut self.backend {
            if capacity != usize::MAX {
                null.set_capacity(capacity);
            }
        }
        Ok(())
    }

    /// Register the driver-thread callback.
    pub fn register_callback(&mut self, callback: RenderCallback) {
        self.callback = Some(callback);
    }

    fn fire(&self, event: RenderCallbackType) {
        if let Some(cb) = &self.callback {
            cb(event);
        }
    }

    /// The offload wake lock. Rejected for other classes.
    pub fn running_lock(&mut self) -> Result<&mut OffloadRunningLock> {
        if self.class != DeviceClass::Offload {
            return Err(HalError::Unsupported(self.class));
        }
        Ok(&mut self.running_lock)
    }

    /// Set an extended parameter.
    pub fn set_audio_parameter(&mut self, key: &str, condition: &str, value: &str) {
        self.parameters
            .insert(format!("{key}#{condition}"), value.to_string());
    }

    /// Read back an extended parameter.
    pub fn get_audio_parameter(&self, key: &str, condition: &str) -> Option<&str> {
        self.parameters
            .get(&format!("{key}#{condition}"))
            .map(String::as_str)
    }
}

impl std::fmt::Debug for SinkAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkAdapter")
            .field("class", &self.class)
            .field("started", &self.started)
            .field("attr", &self.attr)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn offload_adapter(capacity: usize) -> SinkAdapter {
        let mut adapter = SinkAdapter::new(
            DeviceClass::Offload,
            SinkBackend::Null(NullSink::manual(capacity)),
        );
        adapter.init(&SinkAttr::default()).unwrap();
        adapter.start().unwrap();
        adapter
    }

    #[test]
    fn render_before_start_fails() {
        let mut adapter = SinkAdapter::new(
            DeviceClass::Primary,
            SinkBackend::Null(NullSink::manual(1024)),
        );
        adapter.init(&SinkAttr::default()).unwrap();
        assert!(matches!(
            adapter.render_frame(&[0u8; 4]),
            Err(HalError::NotStarted)
        ));
    }

    #[test]
    fn full_cache_reports_zero_and_fires_callback_on_consume() {
        let mut adapter = offload_adapter(8);
        let events: Arc<Mutex<Vec<RenderCallbackType>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_events = events.clone();
        adapter.register_callback(Arc::new(move |event| {
            sink_events.lock().unwrap().push(event);
        }));

        assert_eq!(adapter.render_frame(&[0u8; 8]).unwrap(), 8);
        assert_eq!(adapter.render_frame(&[0u8; 8]).unwrap(), 0);
        assert_eq!(
            events.lock().unwrap().as_slice(),
            &[RenderCallbackType::RenderFull]
        );

        adapter.consume(8);
        assert!(
            events
                .lock()
                .unwrap()
                .contains(&RenderCallbackType::NonblockWriteCompleted)
        );
        assert_eq!(adapter.render_frame(&[0u8; 8]).unwrap(), 8);
    }

    #[test]
    fn running_lock_only_on_offload() {
        let mut primary = SinkAdapter::new(
            DeviceClass::Primary,
            SinkBackend::Null(NullSink::manual(16)),
        );
        assert!(primary.running_lock().is_err());
        let mut offload = offload_adapter(16);
        assert!(offload.running_lock().is_ok());
    }

    #[test]
    fn presentation_position_counts_consumed_frames() {
        let mut adapter = offload_adapter(1024);
        // stereo f32: 8 bytes per frame
        adapter.render_frame(&[0u8; 80]).unwrap();
        adapter.consume(40);
        let (frames, _, _) = adapter.presentation_position().unwrap();
        assert_eq!(frames, 5);
    }

    #[test]
    fn audio_parameters_round_trip() {
        let mut adapter = offload_adapter(16);
        adapter.set_audio_parameter("flag", "render", "1");
        assert_eq!(adapter.get_audio_parameter("flag", "render"), Some("1"));
        assert_eq!(adapter.get_audio_parameter("flag", "capture"), None);
    }

    #[test]
    fn callback_count_not_required_for_flush() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut adapter = offload_adapter(16);
        let c = counter.clone();
        adapter.register_callback(Arc::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        adapter.flush().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
