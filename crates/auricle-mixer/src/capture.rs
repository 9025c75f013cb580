//! Inner-capture (loopback) tap.
//!
//! The mixer pushes the pre-effect stereo mix into a lock-free ring; the
//! monitor side drains it on its own thread. The tap sees what the apps
//! produced, not what the device chain made of it, so captures are
//! independent of the output device.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Producer half, owned by the mixer.
pub struct CaptureTap {
    producer: rtrb::Producer<f32>,
    enabled: Arc<AtomicBool>,
    dropped: u64,
}

impl CaptureTap {
    /// True while a monitor wants data.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Push one tick of pre-effect samples; silently drops what the ring
    /// cannot hold (the monitor is lossy by design).
    pub fn push(&mut self, samples: &[f32]) {
        if !self.is_enabled() {
            return;
        }
        for &sample in samples {
            if self.producer.push(sample).is_err() {
                self.dropped += 1;
            }
        }
    }

    /// Samples dropped because the monitor fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl std::fmt::Debug for CaptureTap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureTap")
            .field("enabled", &self.is_enabled())
            .field("dropped", &self.dropped)
            .finish_non_exhaustive()
    }
}

/// Consumer half, owned by the monitor source.
pub struct CaptureMonitor {
    consumer: rtrb::Consumer<f32>,
    enabled: Arc<AtomicBool>,
}

impl CaptureMonitor {
    /// Start or stop the tap.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// True while enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Drain up to `buf.len()` samples; returns how many were read.
    pub fn read(&mut self, buf: &mut [f32]) -> usize {
        let mut read = 0;
        while read < buf.len() {
            match self.consumer.pop() {
                Ok(sample) => {
                    buf[read] = sample;
                    read += 1;
                }
                Err(_) => break,
            }
        }
        read
    }
}

impl std::fmt::Debug for CaptureMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureMonitor")
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

/// Build a tap/monitor pair over a ring of `capacity` samples.
pub fn inner_capture_pair(capacity: usize) -> (CaptureTap, CaptureMonitor) {
    let (producer, consumer) = rtrb::RingBuffer::new(capacity);
    let enabled = Arc::new(AtomicBool::new(false));
    (
        CaptureTap {
            producer,
            enabled: Arc::clone(&enabled),
            dropped: 0,
        },
        CaptureMonitor { consumer, enabled },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_tap_drops_nothing_and_passes_nothing() {
        let (mut tap, mut monitor) = inner_capture_pair(16);
        tap.push(&[1.0, 2.0]);
        let mut buf = [0.0f32; 4];
        assert_eq!(monitor.read(&mut buf), 0);
        assert_eq!(tap.dropped(), 0);
    }

    #[test]
    fn enabled_tap_round_trips_samples() {
        let (mut tap, mut monitor) = inner_capture_pair(16);
        monitor.set_enabled(true);
        tap.push(&[0.1, 0.2, 0.3]);
        let mut buf = [0.0f32; 3];
        assert_eq!(monitor.read(&mut buf), 3);
        assert_eq!(buf, [0.1, 0.2, 0.3]);
    }

    #[test]
    fn overflow_counts_dropped_samples() {
        let (mut tap, monitor) = inner_capture_pair(2);
        monitor.set_enabled(true);
        tap.push(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(tap.dropped(), 2);
    }
}
