//! Bandwidth governor: paces one worker to its share of the job's cap.
//!
//! The delay needed on top of the measured op time is split into a random
//! pre-delay and the remaining post-delay; the split keeps a fleet of
//! workers from locking into the same burst rhythm against the cluster.

use rand::Rng;
use std::time::{Duration, Instant};

pub struct BandwidthGovernor {
    /// This worker's share of the cap; 0 disables pacing.
    bytes_per_sec: u64,
    avg_ns: u64,
    have_avg: bool,
    post_delay: Duration,
    last_op_start: Option<Instant>,
}

impl BandwidthGovernor {
    pub fn new(bytes_per_sec: u64) -> Self {
        Self {
            bytes_per_sec,
            avg_ns: 0,
            have_avg: false,
            post_delay: Duration::ZERO,
            last_op_start: None,
        }
    }

    /// Forget pacing state at a phase boundary.
    pub fn reset(&mut self) {
        self.avg_ns = 0;
        self.have_avg = false;
        self.post_delay = Duration::ZERO;
        self.last_op_start = None;
    }

    /// Call immediately before each op. Sleeps whatever the cap requires and
    /// samples the op start time.
    pub fn pace(&mut self, object_size: u64, rng: &mut impl Rng) {
        if self.bytes_per_sec == 0 {
            return;
        }

        let Some(last) = self.last_op_start else {
            // First op of a phase: random offset so the fleet desynchronizes.
            let jitter = Duration::from_micros(rng.gen_range(0..10_000));
            std::thread::sleep(jitter);
            self.last_op_start = Some(Instant::now());
            return;
        };

        let elapsed_ns = last.elapsed().as_nanos().min(u64::MAX as u128) as u64;
        std::thread::sleep(self.post_delay);
        self.post_delay = Duration::ZERO;

        if self.have_avg {
            self.avg_ns = (7 * self.avg_ns + 8 * elapsed_ns) / 8;
        } else {
            self.avg_ns = elapsed_ns;
            self.have_avg = true;
        }

        let desired_ns =
            (object_size as u128 * 1_000_000_000 / self.bytes_per_sec as u128).min(u64::MAX as u128) as u64;
        if desired_ns > self.avg_ns {
            let total = desired_ns - self.avg_ns;
            let pre = rng.gen_range(0..total.max(1));
            self.post_delay = Duration::from_nanos(total - pre);
            std::thread::sleep(Duration::from_nanos(pre));
        }

        self.last_op_start = Some(Instant::now());
    }
}
