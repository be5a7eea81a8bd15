//! Per-worker liveness tracking.
//!
//! A worker inside a timed phase must heartbeat with summaries. The liveness
//! budget starts generous and then follows the worker's observed op rate, so
//! a backend that legitimately takes minutes per op is not declared dead,
//! while a wedged one is. Backend calls are not interruptible, so a hang is
//! terminal: the session reports `Hung` upward and the daemon process exits
//! for its supervisor to restart.

use std::fmt;
use std::time::{Duration, Instant};

use crate::stats::WorkerSummary;

/// Starting liveness budget for every worker.
pub const HANG_TIMEOUT_INITIAL: Duration = Duration::from_secs(90);
/// The dynamic update never tightens the budget below this.
pub const HANG_TIMEOUT_FLOOR: Duration = Duration::from_secs(60);

/// Terminal error a session returns when a worker hung; the daemon exits on
/// seeing it.
#[derive(Debug)]
pub struct HungError {
    pub worker_id: usize,
}

impl fmt::Display for HungError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker {} stopped heartbeating and is presumed hung", self.worker_id)
    }
}

impl std::error::Error for HungError {}

struct WorkerLiveness {
    last_summary: Instant,
    timeout: Duration,
    can_timeout: bool,
    reported: bool,
}

pub struct HangTracker {
    initial: Duration,
    floor: Duration,
    workers: Vec<WorkerLiveness>,
}

impl HangTracker {
    pub fn new(n_workers: usize, initial: Duration) -> Self {
        let now = Instant::now();
        Self {
            initial,
            floor: HANG_TIMEOUT_FLOOR,
            workers: (0..n_workers)
                .map(|_| WorkerLiveness {
                    last_summary: now,
                    timeout: initial,
                    can_timeout: false,
                    reported: false,
                })
                .collect(),
        }
    }

    /// Fold one worker summary in: refresh the heartbeat and retune the
    /// budget from the observed per-op time.
    pub fn observe(&mut self, ws: &WorkerSummary) {
        let Some(entry) = self.workers.get_mut(ws.worker_id) else {
            return;
        };
        let now = Instant::now();
        let ops = ws.summary.total();
        if ops > 0 {
            let per_op = now.duration_since(entry.last_summary) / ops.min(u32::MAX as u64) as u32;
            let tuned_ns = (7 * entry.timeout.as_nanos() + 8 * per_op.as_nanos()) / 8;
            let tuned = Duration::from_nanos(tuned_ns.min(u64::MAX as u128) as u64);
            entry.timeout = tuned.max(self.floor);
        }
        entry.can_timeout = ws.can_timeout;
        entry.last_summary = now;
        entry.reported = false;
    }

    /// Workers whose budget ran out since the last check. Each is reported
    /// once.
    pub fn check(&mut self, now: Instant) -> Vec<usize> {
        let mut hung = Vec::new();
        for (id, entry) in self.workers.iter_mut().enumerate() {
            if entry.can_timeout
                && !entry.reported
                && now.duration_since(entry.last_summary) > entry.timeout
            {
                entry.reported = true;
                hung.push(id);
            }
        }
        hung
    }

    /// Reset every heartbeat and budget to initial. Used at phase changes so
    /// a slow previous phase does not leak its budget into the next.
    pub fn clear(&mut self) {
        let now = Instant::now();
        for entry in &mut self.workers {
            entry.last_summary = now;
            entry.timeout = self.initial;
            entry.reported = false;
        }
    }
}
