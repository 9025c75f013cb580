//! Sink assembly: threads, queues, and teardown.

use std::sync::atomic::{AtomicI32, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{info, warn};

use auricle_core::SampleFormat;
use auricle_engine::EffectChainManager;
use auricle_hal::{RenderCallbackType, SinkAdapter, SinkAttr};
use auricle_mixer::SceneMixer;

use crate::bus::{BusCtx, run_bus};
use crate::msgq::{MsgSender, OffloadMsg, TimerMsg, WriterMsg, message_queue};
use crate::multichannel::{MultiChannelCtx, run_multichannel};
use crate::offload::{OffloadEngine, OffloadSource};
use crate::primary::{PrimaryCtx, run_primary};
use crate::wake::WakeBudget;
use crate::writer::run_writer;

/// Run state of the whole sink instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkRunState {
    /// Nothing renders.
    Suspended = 0,
    /// Open but no stream is audible; renders only for a monitor.
    Idle = 1,
    /// Streams are audible.
    Running = 2,
}

impl SinkRunState {
    pub(crate) fn from_u8(value: u8) -> SinkRunState {
        match value {
            2 => SinkRunState::Running,
            1 => SinkRunState::Idle,
            _ => SinkRunState::Suspended,
        }
    }
}

/// Static configuration of one sink instance.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Sink name, used in thread names.
    pub name: String,
    /// Frames per render tick.
    pub frame_len: usize,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Primary branch channel count.
    pub channels: u32,
    /// PCM format at the HAL boundary.
    pub format: SampleFormat,
    /// Bus sleep when no deadline is pending.
    pub idle_wake: Duration,
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig {
            name: "hdi-sink".to_string(),
            frame_len: 960,
            sample_rate: auricle_core::DEFAULT_SAMPLE_RATE,
            channels: 2,
            format: SampleFormat::F32,
            idle_wake: Duration::from_millis(20),
        }
    }
}

impl SinkConfig {
    fn block(&self) -> Duration {
        Duration::from_micros(self.frame_len as u64 * 1_000_000 / u64::from(self.sample_rate))
    }
}

/// One sink instance: its threads, queues, and shared flags.
///
/// Construction starts every thread; [`shutdown`](HdiSink::shutdown)
/// stops them in order: bus first, then timers, then writers, then the
/// join pass.
pub struct HdiSink {
    config: SinkConfig,
    mixer: Arc<Mutex<SceneMixer>>,
    run_state: Arc<AtomicU8>,
    budget: Arc<WakeBudget>,
    bus_tx: MsgSender<TimerMsg>,
    primary_tx: MsgSender<TimerMsg>,
    offload_tx: Option<MsgSender<OffloadMsg>>,
    multichannel_tx: Option<MsgSender<TimerMsg>>,
    primary_writer_tx: MsgSender<WriterMsg>,
    multichannel_writer_tx: Option<MsgSender<WriterMsg>>,
    bytes_dropped: Arc<AtomicU64>,
    threads: Vec<JoinHandle<()>>,
}

impl HdiSink {
    /// Build the sink and start its threads.
    ///
    /// `offload` carries the offload HAL adapter and the source feeding
    /// it; `multichannel` the adapter of the multichannel branch. Either
    /// may be absent.
    pub fn new(
        config: SinkConfig,
        manager: Arc<EffectChainManager>,
        mixer: Arc<Mutex<SceneMixer>>,
        mut primary_adapter: SinkAdapter,
        offload: Option<(SinkAdapter, Box<dyn OffloadSource>)>,
        multichannel_adapter: Option<SinkAdapter>,
    ) -> Self {
        let attr = SinkAttr {
            adapter_name: config.name.clone(),
            sample_rate: config.sample_rate,
            channels: config.channels,
            format: config.format,
            device_type: manager.device_type(),
        };
        if let Err(err) = primary_adapter.init(&attr) {
            warn!(%err, "initializing primary adapter failed");
        }
        let primary_adapter = Arc::new(Mutex::new(primary_adapter));

        let run_state = Arc::new(AtomicU8::new(SinkRunState::Suspended as u8));
        let budget = Arc::new(WakeBudget::new());
        let bytes_dropped = Arc::new(AtomicU64::new(0));
        let mut threads = Vec::new();

        // primary writer
        let (primary_writer_tx, primary_writer_rx) = message_queue();
        let primary_dflag = Arc::new(AtomicI32::new(0));
        let primary_write_time = Arc::new(AtomicU64::new(0));
        {
            let adapter = Arc::clone(&primary_adapter);
            let dflag = Arc::clone(&primary_dflag);
            let write_time = Arc::clone(&primary_write_time);
            let dropped = Arc::clone(&bytes_dropped);
            threads.push(spawn_thread(&config.name, "write-hdi", move || {
                run_writer(adapter, &primary_writer_rx, &dflag, &write_time, &dropped);
            }));
        }

        // primary timer
        let (primary_tx, primary_rx) = message_queue();
        {
            let ctx = PrimaryCtx {
                mixer: Arc::clone(&mixer),
                adapter: Arc::clone(&primary_adapter),
                writer_tx: primary_writer_tx.clone(),
                run_state: Arc::clone(&run_state),
                dflag: primary_dflag,
                write_time_us: primary_write_time,
                budget: Arc::clone(&budget),
                frame_len: config.frame_len,
                block: config.block(),
                frame_bytes: config.frame_len
                    * config.channels as usize
                    * config.format.bytes_per_sample(),
            };
            threads.push(spawn_thread(&config.name, "timer-primary", move || {
                run_primary(ctx, &primary_rx);
            }));
        }

        // offload branch
        let offload_tx = offload.map(|(mut adapter, source)| {
            let offload_attr = SinkAttr {
                adapter_name: format!("{}-offload", config.name),
                ..attr.clone()
            };
            if let Err(err) = adapter.init(&offload_attr) {
                warn!(%err, "initializing offload adapter failed");
            }
            let byte_rate = offload_attr.byte_rate();
            let (tx, rx) = message_queue();
            // the HAL callback only converts the event to a message
            let callback_tx = tx.clone();
            adapter.register_callback(Arc::new(move |event| {
                if event == RenderCallbackType::NonblockWriteCompleted {
                    callback_tx.post(OffloadMsg::WriteCompleted);
                }
            }));
            let adapter = Arc::new(Mutex::new(adapter));
            let hdistate = Arc::new(AtomicI32::new(0));
            let engine =
                OffloadEngine::new(adapter, source, hdistate, Arc::clone(&run_state), byte_rate);
            threads.push(spawn_thread(&config.name, "timer-offload", move || {
                engine.run(&rx);
            }));
            tx
        });

        // multichannel branch
        let mut multichannel_writer_tx = None;
        let multichannel_tx = multichannel_adapter.map(|mut adapter| {
            let mch_attr = SinkAttr {
                adapter_name: format!("{}-multichannel", config.name),
                channels: auricle_core::MULTICHANNEL_NUM_CHANNELS,
                ..attr.clone()
            };
            if let Err(err) = adapter.init(&mch_attr) {
                warn!(%err, "initializing multichannel adapter failed");
            }
            let adapter = Arc::new(Mutex::new(adapter));
            let dflag = Arc::new(AtomicI32::new(0));
            let write_time = Arc::new(AtomicU64::new(0));

            let (writer_tx, writer_rx) = message_queue();
            {
                let adapter = Arc::clone(&adapter);
                let dflag = Arc::clone(&dflag);
                let write_time = Arc::clone(&write_time);
                let dropped = Arc::clone(&bytes_dropped);
                threads.push(spawn_thread(&config.name, "write-hdi-mch", move || {
                    run_writer(adapter, &writer_rx, &dflag, &write_time, &dropped);
                }));
            }

            let (tx, rx) = message_queue();
            let ctx = MultiChannelCtx {
                mixer: Arc::clone(&mixer),
                adapter,
                writer_tx: writer_tx.clone(),
                run_state: Arc::clone(&run_state),
                dflag,
                budget: Arc::clone(&budget),
                frame_len: config.frame_len,
                block: config.block(),
                max_frame_bytes: config.frame_len
                    * auricle_core::MAX_IN_CHANNELS as usize
                    * config.format.bytes_per_sample(),
            };
            threads.push(spawn_thread(&config.name, "timer-mch", move || {
                run_multichannel(ctx, &rx);
            }));
            multichannel_writer_tx = Some(writer_tx);
            tx
        });

        // the bus, last: it drives everything above
        let (bus_tx, bus_rx) = message_queue();
        {
            let ctx = BusCtx {
                mixer: Arc::clone(&mixer),
                manager,
                budget: Arc::clone(&budget),
                run_state: Arc::clone(&run_state),
                primary_tx: primary_tx.clone(),
                offload_tx: offload_tx.clone(),
                multichannel_tx: multichannel_tx.clone(),
                idle_wake: config.idle_wake,
            };
            threads.push(spawn_thread(&config.name, "timer-bus", move || {
                run_bus(ctx, &bus_rx);
            }));
        }

        info!(name = %config.name, threads = threads.len(), "hdi sink started");
        HdiSink {
            config,
            mixer,
            run_state,
            budget,
            bus_tx,
            primary_tx,
            offload_tx,
            multichannel_tx,
            primary_writer_tx,
            multichannel_writer_tx,
            bytes_dropped,
            threads,
        }
    }

    /// Change the sink run state.
    pub fn set_run_state(&self, state: SinkRunState) {
        self.run_state.store(state as u8, Ordering::Release);
        self.kick();
    }

    /// Current run state.
    pub fn run_state(&self) -> SinkRunState {
        SinkRunState::from_u8(self.run_state.load(Ordering::Acquire))
    }

    /// Wake the bus immediately.
    pub fn kick(&self) {
        self.bus_tx.post(TimerMsg::Wake);
    }

    /// A stream was corked or uncorked. Updates the mixer's view and,
    /// for an offload stream pausing, tells the offload engine to rewind
    /// and flush the audio still cached in the device. Returns false
    /// when no input with this session id is attached.
    pub fn notify_input_state(&self, session_id: &str, running: bool) -> bool {
        let corked_offload = {
            let mut mixer = self.mixer.lock().unwrap_or_else(PoisonError::into_inner);
            let was_offload_running = mixer
                .input_info(session_id)
                .is_some_and(|info| info.offload && info.running);
            if !mixer.set_input_running(session_id, running) {
                return false;
            }
            was_offload_running && !running
        };
        if corked_offload {
            if let Some(tx) = &self.offload_tx {
                tx.post(OffloadMsg::Corked);
            }
        }
        self.kick();
        true
    }

    /// Bytes dropped by the writers since start.
    pub fn bytes_dropped(&self) -> u64 {
        self.bytes_dropped.load(Ordering::Relaxed)
    }

    /// Sink configuration.
    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    /// Shared wake budget (timers owned elsewhere may propose deadlines).
    pub fn budget(&self) -> &Arc<WakeBudget> {
        &self.budget
    }

    /// Stop every thread: bus, then timers, then writers, then join.
    pub fn shutdown(mut self) {
        self.bus_tx.post(TimerMsg::Quit);
        self.primary_tx.post(TimerMsg::Quit);
        if let Some(tx) = &self.offload_tx {
            tx.post(OffloadMsg::Quit);
        }
        if let Some(tx) = &self.multichannel_tx {
            tx.post(TimerMsg::Quit);
        }
        self.primary_writer_tx.post(WriterMsg::Quit);
        if let Some(tx) = &self.multichannel_writer_tx {
            tx.post(WriterMsg::Quit);
        }
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("sink thread panicked during shutdown");
            }
        }
        info!(name = %self.config.name, "hdi sink shut down");
    }
}

impl std::fmt::Debug for HdiSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HdiSink")
            .field("name", &self.config.name)
            .field("run_state", &self.run_state())
            .field("threads", &self.threads.len())
            .finish_non_exhaustive()
    }
}

fn spawn_thread(
    sink_name: &str,
    role: &str,
    body: impl FnOnce() + Send + 'static,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("{sink_name}-{role}"))
        .spawn(body)
        .unwrap_or_else(|err| {
            // spawning can only fail on resource exhaustion at boot
            panic!("failed to spawn sink thread: {err}")
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offload::SilentSource;
    use auricle_engine::{EffectChainManager, HeadTracker, NullPostureSensor};
    use auricle_hal::{DeviceClass, HdiParamProxy, NullSink, SinkBackend};
    use auricle_mixer::{SinkInput, SinkInputInfo, VecSource};

    fn null_adapter(class: DeviceClass) -> SinkAdapter {
        SinkAdapter::new(class, SinkBackend::Null(NullSink::manual(1 << 22)))
    }

    fn build_sink() -> (HdiSink, Arc<Mutex<SceneMixer>>) {
        let manager = Arc::new(EffectChainManager::new(
            HdiParamProxy::disconnected(),
            HeadTracker::new(Arc::new(NullPostureSensor::default())),
        ));
        manager.init(&Default::default());
        let mixer = Arc::new(Mutex::new(SceneMixer::new(
            Arc::clone(&manager),
            48_000,
            2,
            SampleFormat::F32,
        )));
        let config = SinkConfig {
            idle_wake: Duration::from_millis(2),
            frame_len: 128,
            ..SinkConfig::default()
        };
        let sink = HdiSink::new(
            config,
            manager,
            Arc::clone(&mixer),
            null_adapter(DeviceClass::Primary),
            Some((null_adapter(DeviceClass::Offload), Box::new(SilentSource))),
            Some(null_adapter(DeviceClass::MultiChannel)),
        );
        (sink, mixer)
    }

    #[test]
    fn starts_and_shuts_down_cleanly() {
        let (sink, _mixer) = build_sink();
        assert_eq!(sink.run_state(), SinkRunState::Suspended);
        sink.shutdown();
    }

    #[test]
    fn notify_input_state_tracks_cork_transitions() {
        let (sink, mixer) = build_sink();
        mixer.lock().unwrap().add_input(SinkInput::new(
            SinkInputInfo {
                session_id: "off1".to_string(),
                scene: auricle_core::EffectScene::Music,
                mode: auricle_core::EffectMode::Default,
                spatialization_enabled: true,
                offload: true,
                sample_rate: 48_000,
                channels: 2,
                layout: auricle_core::ChannelLayout::STEREO,
                running: true,
            },
            Box::new(VecSource::new(vec![0.0; 64])),
        ));

        // corking the offload stream posts the rewind to the engine
        assert!(sink.notify_input_state("off1", false));
        assert!(!mixer.lock().unwrap().input_info("off1").unwrap().running);
        // uncork and unknown-session paths
        assert!(sink.notify_input_state("off1", true));
        assert!(!sink.notify_input_state("unknown", false));
        sink.shutdown();
    }

    #[test]
    fn renders_while_running() {
        let (sink, mixer) = build_sink();
        mixer.lock().unwrap().add_input(SinkInput::new(
            SinkInputInfo {
                session_id: "1".to_string(),
                scene: auricle_core::EffectScene::Music,
                mode: auricle_core::EffectMode::Default,
                spatialization_enabled: false,
                offload: false,
                sample_rate: 48_000,
                channels: 2,
                layout: auricle_core::ChannelLayout::STEREO,
                running: true,
            },
            Box::new(VecSource::new(vec![0.3; 1 << 16])),
        ));
        sink.set_run_state(SinkRunState::Running);
        std::thread::sleep(Duration::from_millis(50));
        sink.set_run_state(SinkRunState::Suspended);
        sink.shutdown();
    }
}
