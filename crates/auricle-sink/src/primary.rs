//! Primary render timer thread.

use std::sync::atomic::{AtomicI32, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use auricle_hal::SinkAdapter;
use auricle_mixer::SceneMixer;

use crate::chunk::MemChunk;
use crate::msgq::{MsgReceiver, MsgSender, TimerMsg, WriterMsg};
use crate::sink::SinkRunState;
use crate::wake::WakeBudget;

pub(crate) struct PrimaryCtx {
    pub mixer: Arc<Mutex<SceneMixer>>,
    pub adapter: Arc<Mutex<SinkAdapter>>,
    pub writer_tx: MsgSender<WriterMsg>,
    pub run_state: Arc<AtomicU8>,
    pub dflag: Arc<AtomicI32>,
    pub write_time_us: Arc<AtomicU64>,
    pub budget: Arc<WakeBudget>,
    pub frame_len: usize,
    pub block: Duration,
    pub frame_bytes: usize,
}

/// One wake of the primary renderer: render a tick if the sink should be
/// producing audio, post it to the writer, and propose the next wake.
pub(crate) fn primary_tick(ctx: &PrimaryCtx) {
    let now = Instant::now();
    let state = SinkRunState::from_u8(ctx.run_state.load(Ordering::Acquire));

    let (counts, monitor_active) = {
        let mixer = ctx.mixer.lock().unwrap_or_else(PoisonError::into_inner);
        (mixer.classify(), mixer.monitor_active())
    };
    let mut flag = state == SinkRunState::Running
        || (state == SinkRunState::Idle && monitor_active);
    let total = counts.primary + counts.offload + counts.multichannel;
    if total > 0 && !monitor_active {
        flag &= counts.primary > 0;
    }
    if !flag {
        return;
    }

    if ctx.dflag.load(Ordering::Acquire) == 0 {
        ctx.dflag.store(1, Ordering::Release);

        let mut out = vec![0u8; ctx.frame_bytes];
        let written = {
            let mut mixer = ctx.mixer.lock().unwrap_or_else(PoisonError::into_inner);
            mixer.render_primary(ctx.frame_len, &mut out)
        };
        out.truncate(written);

        {
            let mut adapter = ctx.adapter.lock().unwrap_or_else(PoisonError::into_inner);
            if !adapter.is_started() && state == SinkRunState::Running {
                match adapter.start() {
                    Ok(()) => info!(class = adapter.class().name(), "primary hdi started"),
                    Err(err) => warn!(%err, "starting primary hdi failed"),
                }
            }
        }
        ctx.writer_tx.post(WriterMsg::Render(MemChunk::new(out)));
    }

    let elapsed = now.elapsed();
    let mut sleep = ctx.block.saturating_sub(elapsed);
    let write_time = Duration::from_micros(ctx.write_time_us.load(Ordering::Relaxed));
    if !write_time.is_zero() {
        sleep = sleep.min(write_time);
    }
    ctx.budget.propose(Instant::now() + sleep);
}

/// Thread body for the primary timer.
pub(crate) fn run_primary(ctx: PrimaryCtx, rx: &MsgReceiver<TimerMsg>) {
    info!("primary timer thread starting");
    loop {
        match rx.get() {
            Some(TimerMsg::Wake) => primary_tick(&ctx),
            Some(TimerMsg::Quit) | None => break,
        }
    }
    rx.drain();
    info!("primary timer thread shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msgq::message_queue;
    use auricle_core::SampleFormat;
    use auricle_engine::{EffectChainManager, HeadTracker, NullPostureSensor};
    use auricle_hal::{DeviceClass, HdiParamProxy, NullSink, SinkAttr, SinkBackend};
    use auricle_mixer::{SinkInput, SinkInputInfo, VecSource};

    fn ctx() -> (PrimaryCtx, MsgReceiver<WriterMsg>) {
        let manager = Arc::new(EffectChainManager::new(
            HdiParamProxy::disconnected(),
            HeadTracker::new(Arc::new(NullPostureSensor::default())),
        ));
        manager.init(&Default::default());
        let mixer = Arc::new(Mutex::new(SceneMixer::new(
            manager,
            48_000,
            2,
            SampleFormat::F32,
        )));
        let mut adapter = SinkAdapter::new(
            DeviceClass::Primary,
            SinkBackend::Null(NullSink::manual(1 << 20)),
        );
        adapter.init(&SinkAttr::default()).unwrap();
        let (writer_tx, writer_rx) = message_queue();
        let ctx = PrimaryCtx {
            mixer,
            adapter: Arc::new(Mutex::new(adapter)),
            writer_tx,
            run_state: Arc::new(AtomicU8::new(SinkRunState::Running as u8)),
            dflag: Arc::new(AtomicI32::new(0)),
            write_time_us: Arc::new(AtomicU64::new(0)),
            budget: Arc::new(WakeBudget::new()),
            frame_len: 480,
            block: Duration::from_millis(10),
            frame_bytes: 480 * 2 * 4,
        };
        (ctx, writer_rx)
    }

    fn running_input(session: &str) -> SinkInput {
        SinkInput::new(
            SinkInputInfo {
                session_id: session.to_string(),
                scene: auricle_core::EffectScene::Music,
                mode: auricle_core::EffectMode::Default,
                spatialization_enabled: false,
                offload: false,
                sample_rate: 48_000,
                channels: 2,
                layout: auricle_core::ChannelLayout::STEREO,
                running: true,
            },
            Box::new(VecSource::new(vec![0.5; 4096])),
        )
    }

    #[test]
    fn running_sink_renders_and_posts_chunk() {
        let (ctx, writer_rx) = ctx();
        ctx.mixer.lock().unwrap().add_input(running_input("1"));
        primary_tick(&ctx);
        let msg = writer_rx.get().unwrap();
        match msg {
            WriterMsg::Render(chunk) => assert_eq!(chunk.len(), 480 * 2 * 4),
            WriterMsg::Quit => panic!("unexpected quit"),
        }
        assert_eq!(ctx.dflag.load(Ordering::SeqCst), 1);
        assert!(ctx.adapter.lock().unwrap().is_started());
    }

    #[test]
    fn suspended_sink_renders_nothing() {
        let (ctx, writer_rx) = ctx();
        ctx.mixer.lock().unwrap().add_input(running_input("1"));
        ctx.run_state
            .store(SinkRunState::Suspended as u8, Ordering::Release);
        primary_tick(&ctx);
        assert!(writer_rx.drain().is_empty());
    }

    #[test]
    fn pending_write_skips_double_dispatch() {
        let (ctx, writer_rx) = ctx();
        ctx.mixer.lock().unwrap().add_input(running_input("1"));
        ctx.dflag.store(1, Ordering::Release);
        primary_tick(&ctx);
        assert!(writer_rx.drain().is_empty());
    }

    #[test]
    fn idle_sink_renders_only_with_monitor() {
        let (ctx, writer_rx) = ctx();
        ctx.run_state.store(SinkRunState::Idle as u8, Ordering::Release);
        primary_tick(&ctx);
        assert!(writer_rx.drain().is_empty());

        let (tap, monitor) = auricle_mixer::inner_capture_pair(1024);
        monitor.set_enabled(true);
        ctx.mixer.lock().unwrap().set_monitor(tap);
        primary_tick(&ctx);
        assert_eq!(writer_rx.drain().len(), 1);
    }
}
