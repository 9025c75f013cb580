//! HDI writer threads.

use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::time::Instant;

use tracing::{debug, error, warn};

use auricle_hal::SinkAdapter;

use crate::chunk::MemChunk;
use crate::msgq::{MsgReceiver, WriterMsg};

/// Result of pushing one chunk into a HAL sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Every byte reached the device.
    Complete,
    /// The device refused mid-chunk; the remainder was dropped.
    Dropped {
        /// Bytes that did land before the failure.
        written: usize,
    },
}

/// Push `chunk` into `adapter`, looping over partial writes.
///
/// The loop ends when the chunk is exhausted, when the device writes
/// zero bytes (failure, remainder dropped), or when it reports more
/// bytes than were offered (treated as a device fault: logged, chunk
/// dropped).
pub fn write_chunk(adapter: &mut SinkAdapter, chunk: &MemChunk) -> WriteOutcome {
    let data = chunk.bytes();
    let mut written = 0;
    while written < data.len() {
        let remaining = &data[written..];
        match adapter.render_frame(remaining) {
            Ok(0) => {
                warn!(
                    class = adapter.class().name(),
                    written,
                    total = data.len(),
                    "render write failed, dropping remainder"
                );
                return WriteOutcome::Dropped { written };
            }
            Ok(n) if n > remaining.len() => {
                error!(
                    class = adapter.class().name(),
                    reported = n,
                    offered = remaining.len(),
                    "device reported more bytes than offered, dropping chunk"
                );
                return WriteOutcome::Dropped { written };
            }
            Ok(n) => {
                written += n;
            }
            Err(err) => {
                warn!(class = adapter.class().name(), %err, "render write error");
                return WriteOutcome::Dropped { written };
            }
        }
    }
    WriteOutcome::Complete
}

/// Body of one writer thread: consume render messages until `Quit`,
/// draining leftover chunks on the way out.
///
/// `dflag` is the producer/consumer pairing flag: the timer raises it
/// before posting a chunk, the writer lowers it after rendering, so a
/// tick is never dispatched twice.
pub fn run_writer(
    adapter: Arc<Mutex<SinkAdapter>>,
    rx: &MsgReceiver<WriterMsg>,
    dflag: &AtomicI32,
    write_time_us: &AtomicU64,
    bytes_dropped: &AtomicU64,
) {
    loop {
        let Some(msg) = rx.get() else {
            break;
        };
        match msg {
            WriterMsg::Render(chunk) => {
                let start = Instant::now();
                {
                    let mut adapter = adapter.lock().unwrap_or_else(PoisonError::into_inner);
                    if adapter.is_started() {
                        if let WriteOutcome::Dropped { written } = write_chunk(&mut adapter, &chunk)
                        {
                            bytes_dropped
                                .fetch_add((chunk.len() - written) as u64, Ordering::Relaxed);
                        }
                    } else {
                        debug!(
                            class = adapter.class().name(),
                            "sink not started, skipping render write"
                        );
                        bytes_dropped.fetch_add(chunk.len() as u64, Ordering::Relaxed);
                    }
                }
                if dflag.load(Ordering::Acquire) == 1 {
                    dflag.fetch_sub(1, Ordering::AcqRel);
                }
                write_time_us.store(start.elapsed().as_micros() as u64, Ordering::Relaxed);
            }
            WriterMsg::Quit => break,
        }
    }
    // drop whatever is still queued so no chunk outlives the thread
    let leftover = rx.drain();
    if !leftover.is_empty() {
        debug!(count = leftover.len(), "writer exiting, dropped queued chunks");
    }
}
