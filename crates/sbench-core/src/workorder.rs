//! The immutable parameter bundle for one job, and the striping that carves
//! its object range and bandwidth across foremen and workers.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::generator;

/// Everything a node needs to run its share of a job. The manager builds the
/// global order, rewrites the range/bandwidth per foreman, and each foreman
/// rewrites them again per worker; the fields are never mutated after send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkOrder {
    pub job_id: u64,
    /// Object size in bytes.
    pub object_size: u64,
    /// Bytes per second for this node's share; 0 = unlimited.
    pub bandwidth: u64,
    /// Workers per core on each foreman.
    pub worker_factor: f64,
    pub skip_read_validation: bool,
    /// 0..=100; 0 means separate read and write passes.
    pub read_write_mix: u8,
    /// Object id range `[range_start, range_end)`.
    pub range_start: u64,
    pub range_end: u64,
    pub seed: u64,
    pub generator_kind: String,
    pub generator_config: HashMap<String, String>,
    pub connection_kind: String,
    pub targets: Vec<String>,
    pub protocol_config: HashMap<String, String>,
    pub object_key_prefix: String,
    /// Index of the foreman this copy was tailored for; stamped into stats.
    pub server_index: u16,
}

impl WorkOrder {
    pub fn range_len(&self) -> u64 {
        self.range_end.saturating_sub(self.range_start)
    }

    /// Validate the fields a foreman cannot repair locally.
    pub fn validate(&self) -> Result<()> {
        if self.object_size < generator::HEADER_LEN as u64 {
            bail!(
                "object size {} is below the {}-byte generator header",
                self.object_size,
                generator::HEADER_LEN
            );
        }
        if self.range_end <= self.range_start {
            bail!(
                "empty object range [{}, {})",
                self.range_start,
                self.range_end
            );
        }
        if self.read_write_mix > 100 {
            bail!("read/write mix {} out of 0..=100", self.read_write_mix);
        }
        if self.targets.is_empty() {
            bail!("no targets");
        }
        Ok(())
    }

    /// Copy of this order restricted to one stripe.
    pub fn restricted(&self, range: (u64, u64), bandwidth: u64) -> WorkOrder {
        let mut order = self.clone();
        order.range_start = range.0;
        order.range_end = range.1;
        order.bandwidth = bandwidth;
        order
    }
}

/// Partition `[start, end)` into `n` contiguous stripes that cover the range
/// exactly: no gaps, no overlaps, and no empty stripe as long as `n <= len`.
/// The remainder spreads one extra id over the leading stripes; the final
/// stripe always ends at `end`.
pub fn stripe_range(start: u64, end: u64, n: usize) -> Vec<(u64, u64)> {
    assert!(n >= 1, "cannot stripe across zero nodes");
    assert!(end >= start, "inverted range");
    let len = end - start;
    let n64 = n as u64;
    let base = len / n64;
    let remainder = len % n64;

    let mut stripes = Vec::with_capacity(n);
    let mut cursor = start;
    for i in 0..n64 {
        let width = base + if i < remainder { 1 } else { 0 };
        let stripe_end = if i == n64 - 1 { end } else { cursor + width };
        stripes.push((cursor, stripe_end));
        cursor = stripe_end;
    }
    stripes
}

/// Split a bandwidth cap evenly across `n` nodes. 0 stays 0 (unlimited).
pub fn split_bandwidth(bandwidth: u64, n: usize) -> u64 {
    if bandwidth == 0 {
        0
    } else {
        bandwidth / n.max(1) as u64
    }
}

/// Number of workers a foreman runs: `ceil(cores * factor)`, clamped so no
/// worker ends up with an empty stripe.
pub fn worker_count(cores: u32, factor: f64, range_len: u64) -> usize {
    let scaled = (cores as f64 * factor).ceil().max(1.0) as u64;
    scaled.min(range_len.max(1)) as usize
}
