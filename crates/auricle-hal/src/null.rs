//! Null sink backend: a timed discard with a bounded device cache.
//!
//! Models the piece of HDI behavior the render threads depend on: the
//! device holds a bounded amount of queued audio and drains it in real
//! time. A write that does not fit reports "full" (written = 0 with no
//! error), which is what drives the offload WAIT_CONSUME state.

use std::time::Instant;

/// How the cache drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainMode {
    /// Drain according to wall-clock time and the configured byte rate.
    RealTime,
    /// Drain only when [`NullSink::consume`] is called (tests).
    Manual,
}

/// Discarding sink with a bounded, draining cache.
#[derive(Debug)]
pub struct NullSink {
    capacity_bytes: usize,
    cached_bytes: usize,
    byte_rate: u64,
    drain_mode: DrainMode,
    last_drain: Instant,
    total_written: u64,
}

impl NullSink {
    /// Sink draining `byte_rate` bytes per second out of a cache of
    /// `capacity_bytes`.
    pub fn new(capacity_bytes: usize, byte_rate: u64) -> Self {
        NullSink {
            capacity_bytes,
            cached_bytes: 0,
            byte_rate,
            drain_mode: DrainMode::RealTime,
            last_drain: Instant::now(),
            total_written: 0,
        }
    }

    /// Sink that only drains when told to; used by tests to script the
    /// full/consumed cycle deterministically.
    pub fn manual(capacity_bytes: usize) -> Self {
        NullSink {
            capacity_bytes,
            cached_bytes: 0,
            byte_rate: 0,
            drain_mode: DrainMode::Manual,
            last_drain: Instant::now(),
            total_written: 0,
        }
    }

    /// Resize the cache (SetBufferSize).
    pub fn set_capacity(&mut self, capacity_bytes: usize) {
        self.capacity_bytes = capacity_bytes;
    }

    fn drain_elapsed(&mut self) {
        if self.drain_mode != DrainMode::RealTime || self.byte_rate == 0 {
            return;
        }
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_drain);
        let drained = (elapsed.as_secs_f64() * self.byte_rate as f64) as usize;
        if drained > 0 {
            self.cached_bytes = self.cached_bytes.saturating_sub(drained);
            self.last_drain = now;
        }
    }

    /// Accept a chunk. Returns bytes accepted; 0 means the cache is full.
    /// A chunk is taken whole or not at all, as the offload HDI does.
    pub fn write(&mut self, data: &[u8]) -> usize {
        self.drain_elapsed();
        if self.cached_bytes + data.len() > self.capacity_bytes {
            return 0;
        }
        self.cached_bytes += data.len();
        self.total_written += data.len() as u64;
        data.len()
    }

    /// Drop `bytes` from the cache, as if the hardware consumed them.
    /// Returns true if the cache transitioned from full-ish to writable.
    pub fn consume(&mut self, bytes: usize) -> bool {
        let was_full = self.cached_bytes >= self.capacity_bytes;
        self.cached_bytes = self.cached_bytes.saturating_sub(bytes);
        was_full && self.cached_bytes < self.capacity_bytes
    }

    /// Bytes sitting in the cache right now.
    pub fn cached_bytes(&mut self) -> usize {
        self.drain_elapsed();
        self.cached_bytes
    }

    /// Total bytes ever accepted.
    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    /// Bytes the hardware has consumed so far.
    pub fn consumed_bytes(&mut self) -> u64 {
        self.drain_elapsed();
        self.total_written - self.cached_bytes as u64
    }

    /// Empty the cache (Flush).
    pub fn clear(&mut self) {
        self.cached_bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_sink_reports_full() {
        let mut sink = NullSink::manual(8);
        assert_eq!(sink.write(&[0u8; 8]), 8);
        assert_eq!(sink.write(&[0u8; 1]), 0);
        assert!(sink.consume(4));
        assert_eq!(sink.write(&[0u8; 4]), 4);
    }

    #[test]
    fn chunks_are_all_or_nothing() {
        let mut sink = NullSink::manual(10);
        assert_eq!(sink.write(&[0u8; 6]), 6);
        // 4 bytes free, 6-byte chunk does not fit
        assert_eq!(sink.write(&[0u8; 6]), 0);
        assert_eq!(sink.cached_bytes(), 6);
    }

    #[test]
    fn consumed_bytes_tracks_drain() {
        let mut sink = NullSink::manual(100);
        sink.write(&[0u8; 40]);
        sink.consume(15);
        assert_eq!(sink.consumed_bytes(), 15);
        assert_eq!(sink.total_written(), 40);
    }

    #[test]
    fn clear_empties_cache() {
        let mut sink = NullSink::manual(16);
        sink.write(&[0u8; 16]);
        sink.clear();
        assert_eq!(sink.cached_bytes(), 0);
        assert_eq!(sink.write(&[0u8; 16]), 16);
    }
}
