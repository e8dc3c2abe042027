//! Statistics - Scheduler bookkeeping counters
//!
//! Tracks context switches, reaping and queue admissions per core.

use core::sync::atomic::{AtomicU64, Ordering};

/// Per-core scheduler counters
pub struct SchedulerStatistics {
    /// `schedule` calls
    pub total_schedules: AtomicU64,

    /// `schedule` calls that picked a different thread than before
    pub total_switches: AtomicU64,

    /// Threads admitted with `add`
    pub total_added: AtomicU64,

    /// Threads reaped after death
    pub total_reaped: AtomicU64,

    /// Passes that fell back to the idle thread
    pub idle_picks: AtomicU64,
}

impl SchedulerStatistics {
    pub const fn new() -> Self {
        Self {
            total_schedules: AtomicU64::new(0),
            total_switches: AtomicU64::new(0),
            total_added: AtomicU64::new(0),
            total_reaped: AtomicU64::new(0),
            idle_picks: AtomicU64::new(0),
        }
    }

    pub fn record_schedule(&self, switched: bool, idle: bool) {
        self.total_schedules.fetch_add(1, Ordering::Relaxed);
        if switched {
            self.total_switches.fetch_add(1, Ordering::Relaxed);
        }
        if idle {
            self.idle_picks.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_add(&self) {
        self.total_added.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reap(&self) {
        self.total_reaped.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for SchedulerStatistics {
    fn default() -> Self {
        Self::new()
    }
}

/// Scheduler statistics snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    pub core: usize,
    pub run_queue_len: usize,
    pub wait_queue_len: usize,
    pub total_schedules: u64,
    pub total_switches: u64,
    pub total_added: u64,
    pub total_reaped: u64,
    pub idle_picks: u64,
    pub uptime_ms: u64,
    pub load: u64,
}

impl SchedulerStats {
    /// Share of scheduling passes that found real work, in percent
    pub fn busy_rate(&self) -> f32 {
        if self.total_schedules == 0 {
            return 0.0;
        }
        let busy = self.total_schedules - self.idle_picks;
        (busy as f32 / self.total_schedules as f32) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = SchedulerStatistics::new();
        stats.record_schedule(true, false);
        stats.record_schedule(false, true);
        stats.record_add();
        stats.record_reap();
        assert_eq!(stats.total_schedules.load(Ordering::Relaxed), 2);
        assert_eq!(stats.total_switches.load(Ordering::Relaxed), 1);
        assert_eq!(stats.idle_picks.load(Ordering::Relaxed), 1);
        assert_eq!(stats.total_added.load(Ordering::Relaxed), 1);
        assert_eq!(stats.total_reaped.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_busy_rate() {
        let snapshot = SchedulerStats {
            core: 0,
            run_queue_len: 0,
            wait_queue_len: 0,
            total_schedules: 4,
            total_switches: 0,
            total_added: 0,
            total_reaped: 0,
            idle_picks: 1,
            uptime_ms: 0,
            load: 0,
        };
        assert!((snapshot.busy_rate() - 75.0).abs() < 0.01);
    }
}
