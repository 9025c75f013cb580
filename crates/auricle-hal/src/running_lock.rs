//! Wake lock held while the offload path is streaming.

use tracing::debug;

/// Idempotent wake-lock stand-in for the offload render path.
///
/// Acquired on the first HDI write, released when the sink suspends.
/// Double lock/unlock is harmless.
#[derive(Debug, Default)]
pub struct OffloadRunningLock {
    held: bool,
}

impl OffloadRunningLock {
    /// New, unheld lock.
    pub fn new() -> Self {
        OffloadRunningLock { held: false }
    }

    /// Acquire the lock if not already held.
    pub fn lock(&mut self) {
        if !self.held {
            self.held = true;
            debug!("offload running lock acquired");
        }
    }

    /// Release the lock if held.
    pub fn unlock(&mut self) {
        if self.held {
            self.held = false;
            debug!("offload running lock released");
        }
    }

    /// True while held.
    pub fn is_held(&self) -> bool {
        self.held
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_unlock_idempotent() {
        let mut lock = OffloadRunningLock::new();
        assert!(!lock.is_held());
        lock.lock();
        lock.lock();
        assert!(lock.is_held());
        lock.unlock();
        lock.unlock();
        assert!(!lock.is_held());
    }
}
