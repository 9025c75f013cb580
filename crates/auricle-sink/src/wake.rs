//! The shared wake budget.
//!
//! Every timer thread proposes its next wanted wake time; the bus thread
//! sleeps until the earliest of them and clears deadlines it has
//! satisfied. This is the single point deciding when the sink wakes.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Earliest-deadline accumulator shared between the timers and the bus.
#[derive(Debug, Default)]
pub struct WakeBudget {
    deadline: Mutex<Option<Instant>>,
}

impl WakeBudget {
    /// Empty budget; the bus sleeps its idle interval.
    pub fn new() -> Self {
        WakeBudget::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.deadline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Offer a wake time; the budget keeps the earliest outstanding one.
    pub fn propose(&self, when: Instant) {
        let mut deadline = self.lock();
        *deadline = Some(match *deadline {
            Some(current) => current.min(when),
            None => when,
        });
    }

    /// How long the bus should sleep from `now`, bounded by `idle` when
    /// nothing is scheduled. A past deadline yields zero.
    pub fn sleep_for(&self, now: Instant, idle: Duration) -> Duration {
        match *self.lock() {
            Some(deadline) => deadline.saturating_duration_since(now).min(idle),
            None => idle,
        }
    }

    /// Drop the deadline if it is due at `now`; the wake it asked for is
    /// being delivered.
    pub fn clear_due(&self, now: Instant) {
        let mut deadline = self.lock();
        if deadline.is_some_and(|d| d <= now) {
            *deadline = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn earliest_deadline_wins() {
        let budget = WakeBudget::new();
        let now = Instant::now();
        budget.propose(now + Duration::from_millis(50));
        budget.propose(now + Duration::from_millis(10));
        budget.propose(now + Duration::from_millis(30));
        let sleep = budget.sleep_for(now, Duration::from_secs(1));
        assert!(sleep <= Duration::from_millis(10));
    }

    #[test]
    fn idle_bound_applies_without_deadline() {
        let budget = WakeBudget::new();
        assert_eq!(
            budget.sleep_for(Instant::now(), Duration::from_millis(20)),
            Duration::from_millis(20)
        );
    }

    #[test]
    fn due_deadline_clears() {
        let budget = WakeBudget::new();
        let now = Instant::now();
        budget.propose(now);
        budget.clear_due(now + Duration::from_millis(1));
        assert_eq!(
            budget.sleep_for(now, Duration::from_millis(5)),
            Duration::from_millis(5)
        );
    }
}
