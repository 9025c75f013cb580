//! Typed message queues between sink threads.

use std::sync::mpsc;
use std::time::Duration;

use crate::chunk::MemChunk;

/// Messages driving a timer thread.
#[derive(Debug, PartialEq, Eq)]
pub enum TimerMsg {
    /// The bus decided this branch should run a tick.
    Wake,
    /// Shut the thread down.
    Quit,
}

/// Messages driving an HDI writer thread.
#[derive(Debug)]
pub enum WriterMsg {
    /// Render this chunk into the HAL sink.
    Render(MemChunk),
    /// Shut the thread down.
    Quit,
}

/// Messages driving the offload engine thread.
#[derive(Debug, PartialEq, Eq)]
pub enum OffloadMsg {
    /// The bus decided the offload branch should run.
    Wake,
    /// The HAL reported a previously full write path has drained.
    WriteCompleted,
    /// The offload stream paused; rewind and flush the device cache.
    Corked,
    /// Shut the thread down.
    Quit,
}

/// Producer half of a queue. Cloneable; posts never block.
#[derive(Debug)]
pub struct MsgSender<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for MsgSender<T> {
    fn clone(&self) -> Self {
        MsgSender {
            tx: self.tx.clone(),
        }
    }
}

impl<T> MsgSender<T> {
    /// Post a message; false when the consumer is gone.
    pub fn post(&self, msg: T) -> bool {
        self.tx.send(msg).is_ok()
    }
}

/// Outcome of a timed receive.
#[derive(Debug, PartialEq, Eq)]
pub enum RecvOutcome<T> {
    /// A message arrived.
    Msg(T),
    /// The wait elapsed.
    TimedOut,
    /// Every sender is gone; the thread should exit.
    Disconnected,
}

/// Consumer half of a queue; owned by exactly one thread.
#[derive(Debug)]
pub struct MsgReceiver<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> MsgReceiver<T> {
    /// Block until a message arrives. `None` when every sender is gone.
    pub fn get(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// Wait up to `timeout` for a message.
    pub fn get_timeout(&self, timeout: Duration) -> RecvOutcome<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(msg) => RecvOutcome::Msg(msg),
            Err(mpsc::RecvTimeoutError::Timeout) => RecvOutcome::TimedOut,
            Err(mpsc::RecvTimeoutError::Disconnected) => RecvOutcome::Disconnected,
        }
    }

    /// Pull everything queued right now without blocking. Exiting
    /// threads use this to drop pending chunks.
    pub fn drain(&self) -> Vec<T> {
        let mut drained = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            drained.push(msg);
        }
        drained
    }
}

/// Build a queue pair.
pub fn message_queue<T>() -> (MsgSender<T>, MsgReceiver<T>) {
    let (tx, rx) = mpsc::channel();
    (MsgSender { tx }, MsgReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_and_get() {
        let (tx, rx) = message_queue();
        assert!(tx.post(TimerMsg::Wake));
        assert_eq!(rx.get(), Some(TimerMsg::Wake));
    }

    #[test]
    fn timeout_and_disconnect() {
        let (tx, rx) = message_queue::<TimerMsg>();
        assert_eq!(
            rx.get_timeout(Duration::from_millis(1)),
            RecvOutcome::TimedOut
        );
        drop(tx);
        assert_eq!(
            rx.get_timeout(Duration::from_millis(1)),
            RecvOutcome::Disconnected
        );
    }

    #[test]
    fn drain_empties_queue() {
        let (tx, rx) = message_queue();
        tx.post(TimerMsg::Wake);
        tx.post(TimerMsg::Wake);
        assert_eq!(rx.drain().len(), 2);
        assert!(rx.drain().is_empty());
    }
}
