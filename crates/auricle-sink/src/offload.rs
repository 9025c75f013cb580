//! The offload render engine.
//!
//! Event-driven branch feeding the offload HAL sink. A three-state
//! machine governs it: `NeedData` writes chunks until the device cache
//! is full, `WaitConsume` parks until the HAL's write-completed callback
//! posts a message, and `Flushing` covers the cork rewind: when the
//! offload stream pauses, seconds of pre-written audio may still sit in
//! the device, so the engine flushes the device cache, hands the
//! unplayed span back to its source for replay, and resets its position
//! accounting before accepting data again. The per-policy prewrite
//! target bounds how much audio is cached in the device: a couple hundred
//! milliseconds for foreground streams, several seconds for background
//! ones so the AP can sleep between bursts.

use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use auricle_hal::SinkAdapter;

use crate::msgq::{MsgReceiver, OffloadMsg, RecvOutcome};
use crate::sink::SinkRunState;

/// Offload machine states, stored in the shared `hdistate` atomic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffloadState {
    /// The device wants more audio.
    NeedData = 0,
    /// The device cache is full; wait for the drain callback.
    WaitConsume = 1,
    /// A cork rewind is discarding the device cache; writes are held
    /// off until the reset completes.
    Flushing = 2,
}

impl OffloadState {
    fn from_i32(value: i32) -> OffloadState {
        match value {
            1 => OffloadState::WaitConsume,
            2 => OffloadState::Flushing,
            _ => OffloadState::NeedData,
        }
    }
}

/// Stream policy for the offload cache target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffloadPolicyState {
    /// Audible foreground stream: keep the cache short.
    ActiveForeground,
    /// Background stream: cache seconds of audio so the AP can idle.
    InactiveBackground,
}

impl OffloadPolicyState {
    /// Target device-cache duration for this policy.
    pub fn cache_target(self) -> Duration {
        match self {
            OffloadPolicyState::ActiveForeground => Duration::from_millis(200),
            OffloadPolicyState::InactiveBackground => Duration::from_secs(7),
        }
    }
}

/// Provider of offload PCM, pulled by the engine.
pub trait OffloadSource: Send {
    /// Append up to `max_bytes` into `out`; return bytes appended. Zero
    /// means no data is available right now.
    fn pull(&mut self, max_bytes: usize, out: &mut Vec<u8>) -> usize;

    /// A cork rewind discarded `unplayed` of already-pulled audio from
    /// the device cache. Sources that can replay should rewind their
    /// read position by that much; the default forfeits the span.
    fn rewind(&mut self, unplayed: Duration) {
        let _ = unplayed;
    }
}

/// Source producing silence forever.
#[derive(Debug, Default)]
pub struct SilentSource;

impl OffloadSource for SilentSource {
    fn pull(&mut self, max_bytes: usize, out: &mut Vec<u8>) -> usize {
        out.resize(out.len() + max_bytes, 0);
        max_bytes
    }
}

/// Duration of one offload write chunk.
const FRAME: Duration = Duration::from_millis(40);

/// Presentation-position resyncs are throttled to this interval.
const POSITION_RESYNC: Duration = Duration::from_millis(300);

/// The offload branch engine. One per sink; driven by its message queue
/// and by timeouts.
pub struct OffloadEngine {
    adapter: Arc<Mutex<SinkAdapter>>,
    source: Box<dyn OffloadSource>,
    hdistate: Arc<AtomicI32>,
    run_state: Arc<AtomicU8>,
    policy: OffloadPolicyState,
    byte_rate: u64,
    /// Duration of audio written since the first write.
    position: Duration,
    /// Device-side position at the last resync.
    hdi_position: Duration,
    hdi_position_at: Instant,
    first_write_done: bool,
    scratch: Vec<u8>,
}

impl OffloadEngine {
    /// Engine over `adapter`, pulling from `source`.
    pub fn new(
        adapter: Arc<Mutex<SinkAdapter>>,
        source: Box<dyn OffloadSource>,
        hdistate: Arc<AtomicI32>,
        run_state: Arc<AtomicU8>,
        byte_rate: u64,
    ) -> Self {
        OffloadEngine {
            adapter,
            source,
            hdistate,
            run_state,
            policy: OffloadPolicyState::ActiveForeground,
            byte_rate,
            position: Duration::ZERO,
            hdi_position: Duration::ZERO,
            hdi_position_at: Instant::now(),
            first_write_done: false,
            scratch: Vec::new(),
        }
    }

    /// Current machine state.
    pub fn state(&self) -> OffloadState {
        OffloadState::from_i32(self.hdistate.load(Ordering::Acquire))
    }

    fn set_state(&self, state: OffloadState) {
        self.hdistate.store(state as i32, Ordering::Release);
    }

    /// Change the cache policy, resizing the device cache to match.
    pub fn set_policy(&mut self, policy: OffloadPolicyState) {
        if self.policy != policy {
            debug!(?policy, "offload cache policy changed");
            self.policy = policy;
            let mut adapter = self.adapter.lock().unwrap_or_else(PoisonError::into_inner);
            let target_ms = policy.cache_target().as_millis() as u64;
            if let Err(err) = adapter.set_buffer_size_ms(target_ms) {
                warn!(%err, "resizing offload cache failed");
            }
        }
    }

    /// Audio written minus what the device has played, by the engine's
    /// local clock.
    pub fn cached(&self) -> Duration {
        let played = self.hdi_position + self.hdi_position_at.elapsed();
        self.position.saturating_sub(played.min(self.position))
    }

    fn frame_bytes(&self) -> usize {
        (self.byte_rate * FRAME.as_millis() as u64 / 1000) as usize
    }

    /// Handle one message (or a timeout as `None`). Returns how long the
    /// caller should wait before the next step when nothing wakes it.
    pub fn step(&mut self, msg: Option<OffloadMsg>) -> Duration {
        match msg {
            Some(OffloadMsg::Quit) => Duration::ZERO,
            Some(OffloadMsg::Corked) => {
                self.rewind_and_flush();
                FRAME
            }
            Some(OffloadMsg::WriteCompleted) => {
                if self.state() == OffloadState::WaitConsume {
                    self.set_state(OffloadState::NeedData);
                    self.resync_position(true);
                }
                self.try_write()
            }
            Some(OffloadMsg::Wake) | None => {
                {
                    // let the null backend drain and fire callbacks
                    let mut adapter =
                        self.adapter.lock().unwrap_or_else(PoisonError::into_inner);
                    adapter.pump();
                }
                self.resync_position(false);
                self.try_write()
            }
        }
    }

    /// The stream corked: discard what is still queued in the device,
    /// give the unplayed span back to the source, and reset. While this
    /// runs the machine sits in [`OffloadState::Flushing`] so no write
    /// races the flush.
    pub fn rewind_and_flush(&mut self) {
        self.set_state(OffloadState::Flushing);
        self.resync_position(true);
        let unplayed = self.cached();
        {
            let mut adapter = self.adapter.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(err) = adapter.flush() {
                warn!(%err, "flushing offload sink failed");
            }
        }
        if !unplayed.is_zero() {
            debug!(?unplayed, "cork rewind, returning unplayed audio to the source");
            self.source.rewind(unplayed);
        }
        self.reset();
    }

    /// Clear position accounting and return to `NeedData`.
    fn reset(&mut self) {
        self.position = Duration::ZERO;
        self.hdi_position = Duration::ZERO;
        self.hdi_position_at = Instant::now();
        self.first_write_done = false;
        self.set_state(OffloadState::NeedData);
    }

    fn resync_position(&mut self, force: bool) {
        if !force && self.hdi_position_at.elapsed() < POSITION_RESYNC {
            return;
        }
        let mut adapter = self.adapter.lock().unwrap_or_else(PoisonError::into_inner);
        if let Ok((frames, _, _)) = adapter.presentation_position() {
            if let Some(attr) = adapter.attr() {
                let frame_bytes =
                    u64::from(attr.channels) * attr.format.bytes_per_sample() as u64;
                let played_bytes = frames * frame_bytes;
                if self.byte_rate > 0 {
                    self.hdi_position =
                        Duration::from_micros(played_bytes * 1_000_000 / self.byte_rate);
                    self.hdi_position_at = Instant::now();
                }
            }
        }
    }

    fn try_write(&mut self) -> Duration {
        let running =
            SinkRunState::from_u8(self.run_state.load(Ordering::Acquire)) == SinkRunState::Running;
        if !running {
            // suspended sink keeps no wake lock
            let mut adapter = self.adapter.lock().unwrap_or_else(PoisonError::into_inner);
            if let Ok(lock) = adapter.running_lock() {
                lock.unlock();
            }
            return FRAME;
        }
        if self.state() != OffloadState::NeedData {
            return FRAME;
        }
        let target = self.policy.cache_target();
        let cached = self.cached();
        if cached >= target {
            // cache satisfied; come back when a frame's worth drained
            return FRAME;
        }

        let max = self.frame_bytes();
        self.scratch.clear();
        let pulled = self.source.pull(max, &mut self.scratch);
        if pulled == 0 {
            return FRAME;
        }

        let mut adapter = self.adapter.lock().unwrap_or_else(PoisonError::into_inner);
        if !adapter.is_started() {
            if let Err(err) = adapter.start() {
                warn!(%err, "starting offload sink failed");
                return FRAME;
            }
        }
        match adapter.render_frame(&self.scratch) {
            Ok(0) => {
                debug!("offload hdi full, waiting for consume");
                self.set_state(OffloadState::WaitConsume);
                FRAME
            }
            Ok(written) => {
                if !self.first_write_done {
                    self.first_write_done = true;
                    self.hdi_position = Duration::ZERO;
                    self.hdi_position_at = Instant::now();
                    if let Ok(lock) = adapter.running_lock() {
                        lock.lock();
                    }
                }
                if self.byte_rate > 0 {
                    self.position +=
                        Duration::from_micros(written as u64 * 1_000_000 / self.byte_rate);
                }
                // keep writing promptly while below target
                Duration::from_millis(1)
            }
            Err(err) => {
                warn!(%err, "offload render failed");
                Duration::from_millis(1)
            }
        }
    }

    /// Release the running lock and stop the sink; called on suspend and
    /// on thread exit.
    pub fn suspend(&mut self) {
        let mut adapter = self.adapter.lock().unwrap_or_else(PoisonError::into_inner);
        if let Ok(lock) = adapter.running_lock() {
            lock.unlock();
        }
        if let Err(err) = adapter.stop() {
            warn!(%err, "stopping offload sink failed");
        }
    }

    /// Thread body: drive the machine from the queue until `Quit`.
    pub fn run(mut self, rx: &MsgReceiver<OffloadMsg>) {
        let mut wait = FRAME;
        loop {
            let msg = match rx.get_timeout(wait) {
                RecvOutcome::Msg(OffloadMsg::Quit) | RecvOutcome::Disconnected => break,
                RecvOutcome::Msg(msg) => Some(msg),
                RecvOutcome::TimedOut => None,
            };
            wait = self.step(msg);
            if wait.is_zero() {
                wait = FRAME;
            }
        }
        rx.drain();
        self.suspend();
    }
}

impl std::fmt::Debug for OffloadEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OffloadEngine")
            .field("state", &self.state())
            .field("policy", &self.policy)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auricle_hal::{DeviceClass, NullSink, SinkAttr, SinkBackend};

    fn offload_adapter(capacity: usize) -> Arc<Mutex<SinkAdapter>> {
        let mut adapter =
            SinkAdapter::new(DeviceClass::Offload, SinkBackend::Null(NullSink::manual(capacity)));
        adapter.init(&SinkAttr::default()).unwrap();
        Arc::new(Mutex::new(adapter))
    }

    fn engine(capacity: usize) -> (OffloadEngine, Arc<Mutex<SinkAdapter>>) {
        engine_with_source(capacity, Box::new(SilentSource))
    }

    fn engine_with_source(
        capacity: usize,
        source: Box<dyn OffloadSource>,
    ) -> (OffloadEngine, Arc<Mutex<SinkAdapter>>) {
        let adapter = offload_adapter(capacity);
        let hdistate = Arc::new(AtomicI32::new(0));
        let run_state = Arc::new(AtomicU8::new(SinkRunState::Running as u8));
        let byte_rate = SinkAttr::default().byte_rate();
        let engine = OffloadEngine::new(adapter.clone(), source, hdistate, run_state, byte_rate);
        (engine, adapter)
    }

    /// Silence source that records the spans handed back by cork rewinds.
    struct RewindRecorder {
        rewinds: Arc<Mutex<Vec<Duration>>>,
    }

    impl OffloadSource for RewindRecorder {
        fn pull(&mut self, max_bytes: usize, out: &mut Vec<u8>) -> usize {
            out.resize(out.len() + max_bytes, 0);
            max_bytes
        }
        fn rewind(&mut self, unplayed: Duration) {
            self.rewinds.lock().unwrap().push(unplayed);
        }
    }

    #[test]
    fn writes_until_device_full_then_waits() {
        // capacity of one frame: the second write hits a full device
        let frame_bytes = (SinkAttr::default().byte_rate() * 40 / 1000) as usize;
        let (mut engine, _adapter) = engine(frame_bytes);

        engine.step(Some(OffloadMsg::Wake));
        assert_eq!(engine.state(), OffloadState::NeedData);
        engine.step(None);
        assert_eq!(engine.state(), OffloadState::WaitConsume);
    }

    #[test]
    fn write_completed_resumes_need_data() {
        let frame_bytes = (SinkAttr::default().byte_rate() * 40 / 1000) as usize;
        let (mut engine, adapter) = engine(frame_bytes);
        engine.step(Some(OffloadMsg::Wake));
        engine.step(None);
        assert_eq!(engine.state(), OffloadState::WaitConsume);

        adapter.lock().unwrap().consume(frame_bytes);
        engine.step(Some(OffloadMsg::WriteCompleted));
        assert_eq!(engine.state(), OffloadState::NeedData);
    }

    #[test]
    fn first_write_takes_running_lock() {
        let (mut engine, adapter) = engine(10 * 1024 * 1024);
        engine.step(Some(OffloadMsg::Wake));
        let mut adapter = adapter.lock().unwrap();
        assert!(adapter.is_started());
        assert!(adapter.running_lock().unwrap().is_held());
    }

    #[test]
    fn suspend_releases_lock_and_stops() {
        let (mut engine, adapter) = engine(10 * 1024 * 1024);
        engine.step(Some(OffloadMsg::Wake));
        engine.suspend();
        let mut adapter = adapter.lock().unwrap();
        assert!(!adapter.is_started());
        assert!(!adapter.running_lock().unwrap().is_held());
    }

    #[test]
    fn cork_flushes_device_cache_and_rewinds_source() {
        let rewinds = Arc::new(Mutex::new(Vec::new()));
        let (mut engine, adapter) = engine_with_source(
            usize::MAX / 2,
            Box::new(RewindRecorder {
                rewinds: rewinds.clone(),
            }),
        );
        // queue a few frames into the device
        for _ in 0..4 {
            engine.step(None);
        }
        assert!(engine.cached() > Duration::ZERO);

        engine.step(Some(OffloadMsg::Corked));
        assert_eq!(engine.state(), OffloadState::NeedData);
        assert_eq!(engine.cached(), Duration::ZERO);
        // device cache emptied: only the class base latency remains
        assert_eq!(adapter.lock().unwrap().latency_us(), 40_000);
        // the unplayed span went back to the source for replay
        let rewinds = rewinds.lock().unwrap();
        assert_eq!(rewinds.len(), 1);
        assert!(rewinds[0] >= Duration::from_millis(120));
    }

    #[test]
    fn cork_while_device_full_unblocks_writes() {
        let frame_bytes = (SinkAttr::default().byte_rate() * 40 / 1000) as usize;
        let (mut engine, _adapter) = engine(frame_bytes);
        engine.step(Some(OffloadMsg::Wake));
        engine.step(None);
        assert_eq!(engine.state(), OffloadState::WaitConsume);

        engine.step(Some(OffloadMsg::Corked));
        assert_eq!(engine.state(), OffloadState::NeedData);
        // flush emptied the device: the next write fits again
        engine.step(None);
        assert_eq!(engine.state(), OffloadState::NeedData);
        assert!(engine.cached() > Duration::ZERO);
    }

    #[test]
    fn flushing_gate_holds_writes() {
        let (mut engine, _adapter) = engine(usize::MAX / 2);
        engine.hdistate.store(OffloadState::Flushing as i32, Ordering::Release);
        let cached_before = engine.cached();
        engine.step(None);
        // no write happened while the flush gate was up
        assert_eq!(engine.cached(), cached_before);
        assert_eq!(engine.state(), OffloadState::Flushing);
    }

    #[test]
    fn cache_target_bounds_writes() {
        let (mut engine, _adapter) = engine(usize::MAX / 2);
        // drive enough steps to fill the 200ms foreground target
        for _ in 0..16 {
            engine.step(None);
        }
        assert!(engine.cached() <= Duration::from_millis(240));
        // background policy allows far more
        engine.set_policy(OffloadPolicyState::InactiveBackground);
        for _ in 0..32 {
            engine.step(None);
        }
        assert!(engine.cached() > Duration::from_millis(240));
    }
}
