//! The sink threading core.
//!
//! One [`HdiSink`] runs four long-lived threads plus one more when the
//! multichannel branch is enabled:
//!
//! - the **bus** thread owns the shared wake budget, classifies inputs,
//!   and dispatches wake messages to the per-branch timer threads;
//! - the **primary** timer renders a mixed tick through the scene mixer
//!   and posts it to the primary writer;
//! - the **offload** timer runs the NEED_DATA / WAIT_CONSUME / FLUSHING
//!   machine against the offload HAL sink, flushing and rewinding the
//!   device cache when its stream corks;
//! - the **writer** threads consume render messages and push chunks into
//!   their HAL adapters, tolerating partial writes.
//!
//! All cross-thread traffic is typed messages on bounded-latency queues;
//! HAL callbacks never call into the managers directly, they post
//! messages.

mod bus;
mod chunk;
mod msgq;
mod multichannel;
mod offload;
mod primary;
mod sink;
mod wake;
mod writer;

pub use chunk::MemChunk;
pub use msgq::{MsgReceiver, MsgSender, OffloadMsg, RecvOutcome, TimerMsg, WriterMsg, message_queue};
pub use offload::{OffloadEngine, OffloadPolicyState, OffloadSource, OffloadState, SilentSource};
pub use sink::{HdiSink, SinkConfig, SinkRunState};
pub use wake::WakeBudget;
pub use writer::{WriteOutcome, write_chunk};
