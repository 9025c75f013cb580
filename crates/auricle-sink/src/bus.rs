//! The wake bus thread.
//!
//! Single point of timing for the whole sink: sleeps until the earliest
//! proposed deadline, classifies the live inputs, re-elects the DSP
//! room-mode parameters, and wakes the branch timers that have work.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use auricle_core::{EffectMode, EffectScene};
use auricle_engine::EffectChainManager;
use auricle_mixer::SceneMixer;

use crate::msgq::{MsgReceiver, MsgSender, OffloadMsg, RecvOutcome, TimerMsg};
use crate::sink::SinkRunState;
use crate::wake::WakeBudget;

pub(crate) struct BusCtx {
    pub mixer: Arc<Mutex<SceneMixer>>,
    pub manager: Arc<EffectChainManager>,
    pub budget: Arc<WakeBudget>,
    pub run_state: Arc<AtomicU8>,
    pub primary_tx: MsgSender<TimerMsg>,
    pub offload_tx: Option<MsgSender<OffloadMsg>>,
    pub multichannel_tx: Option<MsgSender<TimerMsg>>,
    pub idle_wake: Duration,
}

/// Thread body for the bus.
pub(crate) fn run_bus(ctx: BusCtx, rx: &MsgReceiver<TimerMsg>) {
    info!("timer bus thread starting");
    let mut last_election: Option<(EffectScene, EffectMode, bool)> = None;
    loop {
        let now = Instant::now();
        let sleep = ctx.budget.sleep_for(now, ctx.idle_wake);
        match rx.get_timeout(sleep) {
            RecvOutcome::Msg(TimerMsg::Quit) | RecvOutcome::Disconnected => break,
            RecvOutcome::Msg(TimerMsg::Wake) | RecvOutcome::TimedOut => {}
        }
        ctx.budget.clear_due(Instant::now());

        let (counts, monitor_active, election) = {
            let mixer = ctx.mixer.lock().unwrap_or_else(PoisonError::into_inner);
            (mixer.classify(), mixer.monitor_active(), mixer.elect_hdi_param())
        };

        // push the room-mode election to the DSP only on change
        if election != last_election {
            if let Some((scene, mode, enabled)) = election {
                if let Err(err) = ctx.manager.set_hdi_param(scene, mode, enabled) {
                    debug!(%err, "hdi room-mode update failed");
                }
            }
            last_election = election;
        }

        let state = SinkRunState::from_u8(ctx.run_state.load(Ordering::Acquire));
        if state == SinkRunState::Suspended {
            continue;
        }

        let total = counts.primary + counts.offload + counts.multichannel;
        if counts.primary > 0 || total == 0 || monitor_active {
            ctx.primary_tx.post(TimerMsg::Wake);
        }
        if counts.offload > 0 {
            if let Some(tx) = &ctx.offload_tx {
                tx.post(OffloadMsg::Wake);
            }
        }
        if counts.multichannel > 0 {
            if let Some(tx) = &ctx.multichannel_tx {
                tx.post(TimerMsg::Wake);
            }
        }
    }
    info!("timer bus thread shutting down");
}
