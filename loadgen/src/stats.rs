use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use serde::Serialize;

/// Live counters of one worker, updated from its dispatch tasks.
#[derive(Debug, Default)]
pub struct WorkerStats {
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
    pub ticks: AtomicU64,
}

impl WorkerStats {
    pub fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

/// Final state of a worker run.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerReport {
    pub index: usize,
    pub address: String,
    pub assigned: u64,
    pub initial_sequence: u64,
    pub final_sequence: u64,
    pub gas_limit: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub ticks: u64,
    pub elapsed: Duration,
    pub interrupted: bool,
}

impl WorkerReport {
    pub fn tps(&self) -> f64 {
        rate(self.succeeded, self.elapsed)
    }
}

/// Outcome of a whole run across all workers.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub workers: Vec<WorkerReport>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn total_succeeded(&self) -> u64 {
        self.workers.iter().map(|w| w.succeeded).sum()
    }

    pub fn total_failed(&self) -> u64 {
        self.workers.iter().map(|w| w.failed).sum()
    }

    pub fn interrupted(&self) -> bool {
        self.workers.iter().any(|w| w.interrupted)
    }

    pub fn tps(&self) -> f64 {
        rate(self.total_succeeded(), self.elapsed)
    }
}

fn rate(count: u64, elapsed: Duration) -> f64 {
    if elapsed.as_secs_f64() > 0.0 {
        count as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for w in &self.workers {
            writeln!(
                f,
                "[worker {}] {} | sequence {} -> {} | succeeded: {}/{} | failed: {} | ticks: {} | tps: {:.1}{}",
                w.index,
                w.address,
                w.initial_sequence,
                w.final_sequence,
                w.succeeded,
                w.assigned,
                w.failed,
                w.ticks,
                w.tps(),
                if w.interrupted { " | interrupted" } else { "" }
            )?;
        }
        write!(
            f,
            "time used: {:?} | succeeded: {} | failed: {} | tps: {:.1}",
            self.elapsed,
            self.total_succeeded(),
            self.total_failed(),
            self.tps()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(index: usize, succeeded: u64, failed: u64) -> WorkerReport {
        WorkerReport {
            index,
            address: format!("desmos1worker{}", index),
            assigned: succeeded,
            initial_sequence: 3,
            final_sequence: 3 + succeeded,
            gas_limit: 100_000,
            succeeded,
            failed,
            ticks: 10,
            elapsed: Duration::from_secs(10),
            interrupted: false,
        }
    }

    #[test]
    fn test_run_report_totals() {
        let run = RunReport {
            workers: vec![report(0, 50, 2), report(1, 50, 0)],
            elapsed: Duration::from_secs(10),
        };
        assert_eq!(run.total_succeeded(), 100);
        assert_eq!(run.total_failed(), 2);
        assert!((run.tps() - 10.0).abs() < 1e-9);
        assert!(!run.interrupted());

        let printed = run.to_string();
        assert!(printed.contains("desmos1worker1"));
        assert!(printed.ends_with("tps: 10.0"));
    }

    #[test]
    fn test_rate_with_zero_elapsed() {
        assert_eq!(rate(10, Duration::ZERO), 0.0);
    }
}
