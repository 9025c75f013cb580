//! Multichannel render timer thread.

use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use auricle_hal::SinkAdapter;
use auricle_mixer::SceneMixer;

use crate::chunk::MemChunk;
use crate::msgq::{MsgReceiver, MsgSender, TimerMsg, WriterMsg};
use crate::sink::SinkRunState;
use crate::wake::WakeBudget;

pub(crate) struct MultiChannelCtx {
    pub mixer: Arc<Mutex<SceneMixer>>,
    pub adapter: Arc<Mutex<SinkAdapter>>,
    pub writer_tx: MsgSender<WriterMsg>,
    pub run_state: Arc<AtomicU8>,
    pub dflag: Arc<AtomicI32>,
    pub budget: Arc<WakeBudget>,
    pub frame_len: usize,
    pub block: Duration,
    pub max_frame_bytes: usize,
}

/// One wake of the multichannel renderer. Only runs while the sink is
/// open and at least one input classifies as multichannel.
pub(crate) fn multichannel_tick(ctx: &MultiChannelCtx) {
    let now = Instant::now();
    let state = SinkRunState::from_u8(ctx.run_state.load(Ordering::Acquire));
    if state == SinkRunState::Suspended {
        return;
    }
    let counts = {
        let mixer = ctx.mixer.lock().unwrap_or_else(PoisonError::into_inner);
        mixer.classify()
    };
    if counts.multichannel == 0 {
        return;
    }

    if ctx.dflag.load(Ordering::Acquire) == 0 {
        ctx.dflag.store(1, Ordering::Release);
        let mut out = vec![0u8; ctx.max_frame_bytes];
        let written = {
            let mut mixer = ctx.mixer.lock().unwrap_or_else(PoisonError::into_inner);
            mixer.render_multichannel(ctx.frame_len, &mut out)
        };
        if written == 0 {
            ctx.dflag.store(0, Ordering::Release);
        } else {
            out.truncate(written);
            {
                let mut adapter = ctx.adapter.lock().unwrap_or_else(PoisonError::into_inner);
                if !adapter.is_started() {
                    match adapter.start() {
                        Ok(()) => info!("multichannel hdi started"),
                        Err(err) => warn!(%err, "starting multichannel hdi failed"),
                    }
                }
            }
            ctx.writer_tx.post(WriterMsg::Render(MemChunk::new(out)));
        }
    }

    let sleep = ctx.block.saturating_sub(now.elapsed());
    ctx.budget.propose(Instant::now() + sleep);
}

/// Thread body for the multichannel timer.
pub(crate) fn run_multichannel(ctx: MultiChannelCtx, rx: &MsgReceiver<TimerMsg>) {
    info!("multichannel timer thread starting");
    loop {
        match rx.get() {
            Some(TimerMsg::Wake) => multichannel_tick(&ctx),
            Some(TimerMsg::Quit) | None => break,
        }
    }
    rx.drain();
    info!("multichannel timer thread shutting down");
}
