//! Rate limiting for repeated log lines.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Admits at most one event per key per period.
///
/// Used to keep per-tick error paths from flooding the log: callers check
/// `allow(key)` before emitting and skip the line when it returns false.
#[derive(Debug)]
pub struct RateGate<K> {
    period: Duration,
    last: Mutex<HashMap<K, Instant>>,
}

impl<K: Eq + Hash + Clone> RateGate<K> {
    /// Gate with the given minimum interval between admitted events.
    pub fn new(period: Duration) -> Self {
        RateGate {
            period,
            last: Mutex::new(HashMap::new()),
        }
    }

    /// True if an event for `key` may be emitted now.
    pub fn allow(&self, key: K) -> bool {
        let now = Instant::now();
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        match last.get(&key) {
            Some(&t) if now.duration_since(t) < self.period => false,
            _ => {
                last.insert(key, now);
                true
            }
        }
    }

    /// Forget all keys, re-admitting everything immediately.
    pub fn reset(&self) {
        self.last.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl<K: Eq + Hash + Clone> Default for RateGate<K> {
    fn default() -> Self {
        RateGate::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_event_admitted_repeat_suppressed() {
        let gate: RateGate<&str> = RateGate::new(Duration::from_secs(60));
        assert!(gate.allow("apply"));
        assert!(!gate.allow("apply"));
        assert!(gate.allow("create"));
    }

    #[test]
    fn zero_period_admits_everything() {
        let gate: RateGate<u32> = RateGate::new(Duration::ZERO);
        assert!(gate.allow(1));
        assert!(gate.allow(1));
    }

    #[test]
    fn reset_readmits() {
        let gate: RateGate<&str> = RateGate::new(Duration::from_secs(60));
        assert!(gate.allow("k"));
        gate.reset();
        assert!(gate.allow("k"));
    }
}
