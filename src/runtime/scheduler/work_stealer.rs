//! Work stealing for load balancing across worker threads.
//!
//! A worker that runs dry sweeps every peer's deque once, starting at a victim
//! picked by the [`StealStrategy`]. The full sweep is what guarantees that no
//! worker parks while another one still has stealable work.

use std::sync::atomic::{AtomicUsize, Ordering};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::queue::Thief;

/// Statistics about work stealing operations.
#[derive(Debug, Default)]
pub struct StealStats {
    /// Number of successful steals.
    pub steal_successes: AtomicUsize,
    /// Number of sweeps that found nothing.
    pub steal_failures: AtomicUsize,
    /// Total number of sweeps.
    pub total_attempts: AtomicUsize,
}

impl StealStats {
    /// Record a successful steal.
    #[inline]
    pub fn record_success(&self) {
        self.steal_successes.fetch_add(1, Ordering::Relaxed);
        self.total_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed steal sweep.
    #[inline]
    pub fn record_failure(&self) {
        self.steal_failures.fetch_add(1, Ordering::Relaxed);
        self.total_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Get success rate as a fraction.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_attempts.load(Ordering::Relaxed);
        if total == 0 {
            return 1.0;
        }
        let successes = self.steal_successes.load(Ordering::Relaxed);
        successes as f64 / total as f64
    }
}

/// Strategy for choosing the first victim of a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StealStrategy {
    /// Uniformly random first victim.
    #[default]
    Random,
    /// Rotate the first victim on every sweep.
    #[serde(alias = "round_robin")]
    RoundRobin,
}

impl std::str::FromStr for StealStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(StealStrategy::Random),
            "round-robin" | "round_robin" | "roundrobin" => Ok(StealStrategy::RoundRobin),
            other => Err(format!("unknown steal strategy: {}", other)),
        }
    }
}

/// Per-worker victim selection. Lives on the worker thread, never shared.
#[derive(Debug)]
pub struct WorkStealer {
    /// Index of the owning worker; never chosen as a victim.
    me: usize,
    strategy: StealStrategy,
    rng: SmallRng,
    next: usize,
    retries: usize,
}

impl WorkStealer {
    pub fn new(
        me: usize,
        strategy: StealStrategy,
        retries: usize,
    ) -> Self {
        Self {
            me,
            strategy,
            rng: SmallRng::seed_from_u64(0x9E37_79B9_7F4A_7C15 ^ me as u64),
            next: me + 1,
            retries,
        }
    }

    /// First victim of the next sweep among `num_workers` deques.
    fn first_victim(
        &mut self,
        num_workers: usize,
    ) -> usize {
        match self.strategy {
            StealStrategy::Random => self.rng.random_range(0..num_workers),
            StealStrategy::RoundRobin => {
                let victim = self.next % num_workers;
                self.next = self.next.wrapping_add(1);
                victim
            },
        }
    }

    /// Visit every peer once and take the first task found.
    pub fn steal<T>(
        &mut self,
        thieves: &[Thief<T>],
        stats: &StealStats,
    ) -> Option<T> {
        let num_workers = thieves.len();
        if num_workers <= 1 {
            return None;
        }

        let start = self.first_victim(num_workers);
        for offset in 0..num_workers {
            let victim = (start + offset) % num_workers;
            if victim == self.me {
                continue;
            }
            if let Some(task) = thieves[victim].steal_top_with_retries(self.retries) {
                stats.record_success();
                return Some(task);
            }
        }

        stats.record_failure();
        None
    }
}
