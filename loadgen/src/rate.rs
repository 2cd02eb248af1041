use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Paces a round over a duration with fixed size bursts.
///
/// Each tick releases at most `quota` operations. Ticks are independent: a
/// tick that falls short does not hand its deficit to the next one, so the
/// configured rate is an average, not a per-tick guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateController {
    round: u64,
    tick_interval: Duration,
    ticks: u64,
    quota: u64,
}

impl RateController {
    pub fn new(round: u64, duration: Duration, tick_interval: Duration) -> Self {
        let ticks = if tick_interval.is_zero() {
            1
        } else {
            (duration.as_nanos() / tick_interval.as_nanos()).max(1) as u64
        };
        // A quota flooring to zero would never release anything
        let quota = (round / ticks).max(1);

        Self {
            round,
            tick_interval,
            ticks,
            quota,
        }
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    // Number of ticks fitting in the configured duration
    pub fn ticks_in_duration(&self) -> u64 {
        self.ticks
    }

    pub fn quota(&self) -> u64 {
        self.quota
    }

    // Operations to release on a tick given how many are already completed
    // (or in flight), never overshooting the round
    pub fn release(&self, completed: u64) -> u64 {
        self.quota.min(self.round.saturating_sub(completed))
    }

    pub fn is_done(&self, completed: u64) -> bool {
        completed >= self.round
    }

    // Ticker firing every interval, the first one an interval from now.
    // A late consumer skips the missed ticks instead of bursting them.
    pub fn ticker(&self) -> Interval {
        let period = self.tick_interval.max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    }
}
