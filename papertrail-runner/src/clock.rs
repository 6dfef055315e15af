//! Engine clock: fixed-interval wakeups that drive entry and exit sweeps.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{Interval, MissedTickBehavior};

/// Missed wakeups are skipped, not replayed: a late sweep evaluates the
/// current state once.
#[derive(Debug)]
pub struct EngineClock {
    interval: Interval,
}

impl EngineClock {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }

    /// Wait for the next wakeup and return the wall-clock time of the sweep.
    pub async fn tick(&mut self) -> DateTime<Utc> {
        self.interval.tick().await;
        Utc::now()
    }

    pub fn period(&self) -> Duration {
        self.interval.period()
    }
}
