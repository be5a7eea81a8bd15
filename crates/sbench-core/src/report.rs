//! Incremental JSON report: `{Arguments, Stats: [...], Errors, Analyses}`.
//!
//! Stats stream into the file as detail uploads arrive, so a run with
//! millions of ops never holds the full record set in memory. Errors and
//! analyses are small and written at close.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use crate::stats::{Stat, StatError, StatPhase, NUM_PHASES};

/// Per-phase digest computed from the detail stream.
#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub phase: String,
    /// Ops inside the analysis window (ramps trimmed for timed phases).
    pub ops: u64,
    pub failures: u64,
    /// Payload bytes per second over the observed span.
    pub bandwidth_bytes_per_sec: u64,
    pub res_min_us: u32,
    pub res_mean_us: u32,
    pub res_max_us: u32,
}

pub struct Report {
    writer: BufWriter<File>,
    stats_written: u64,
    errors: Vec<String>,
}

impl Report {
    /// Open the file and write the arguments and the opening of the stats
    /// array.
    pub fn create(path: &Path, arguments: &impl Serialize) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("create report file {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        writer.write_all(b"{\"Arguments\":")?;
        serde_json::to_writer(&mut writer, arguments)?;
        writer.write_all(b",\"Stats\":[")?;
        Ok(Self {
            writer,
            stats_written: 0,
            errors: Vec::new(),
        })
    }

    pub fn add_stat(&mut self, stat: &Stat) -> Result<()> {
        if self.stats_written > 0 {
            self.writer.write_all(b",")?;
        }
        serde_json::to_writer(&mut self.writer, stat)?;
        self.stats_written += 1;
        Ok(())
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn stats_written(&self) -> u64 {
        self.stats_written
    }

    /// Close the stats array, append errors and analyses, and flush.
    pub fn close(mut self, analyses: &[Analysis]) -> Result<()> {
        self.writer.write_all(b"],\"Errors\":")?;
        serde_json::to_writer(&mut self.writer, &self.errors)?;
        self.writer.write_all(b",\"Analyses\":")?;
        serde_json::to_writer(&mut self.writer, analyses)?;
        self.writer.write_all(b"}")?;
        self.writer.flush()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct PhaseAgg {
    ops: u64,
    failures: u64,
    sum_us: u64,
    min_us: u32,
    max_us: u32,
    first_ms: u32,
    last_ms: u32,
}

/// Folds detail stats into per-phase analyses. Timed phases (Write and Read)
/// drop their ramp edges; completion-driven phases count everything.
pub struct Analyzer {
    object_size: u64,
    window_ms: (u32, u32),
    phases: [PhaseAgg; NUM_PHASES],
}

impl Analyzer {
    pub fn new(object_size: u64, ramp_up: Duration, run_time: Duration) -> Self {
        let start = ramp_up.as_millis().min(u32::MAX as u128) as u32;
        let end = start.saturating_add(run_time.as_millis().min(u32::MAX as u128) as u32);
        Self {
            object_size,
            window_ms: (start, end),
            phases: [PhaseAgg::default(); NUM_PHASES],
        }
    }

    pub fn add(&mut self, stat: &Stat) {
        let timed = matches!(stat.phase, StatPhase::Write | StatPhase::Read);
        if timed
            && (stat.time_since_phase_start_ms < self.window_ms.0
                || stat.time_since_phase_start_ms >= self.window_ms.1)
        {
            return;
        }
        let agg = &mut self.phases[stat.phase.index()];
        if agg.ops == 0 {
            agg.min_us = stat.duration_us;
            agg.max_us = stat.duration_us;
            agg.first_ms = stat.time_since_phase_start_ms;
            agg.last_ms = stat.time_since_phase_start_ms;
        } else {
            agg.min_us = agg.min_us.min(stat.duration_us);
            agg.max_us = agg.max_us.max(stat.duration_us);
            agg.first_ms = agg.first_ms.min(stat.time_since_phase_start_ms);
            agg.last_ms = agg.last_ms.max(stat.time_since_phase_start_ms);
        }
        agg.ops += 1;
        agg.sum_us += stat.duration_us as u64;
        if stat.error != StatError::None {
            agg.failures += 1;
        }
    }

    pub fn analyses(&self) -> Vec<Analysis> {
        let names = ["Write", "Prepare", "Read", "Clean"];
        self.phases
            .iter()
            .zip(names)
            .filter(|(agg, _)| agg.ops > 0)
            .map(|(agg, name)| {
                let span_ms = (agg.last_ms - agg.first_ms).max(1) as u64;
                Analysis {
                    phase: name.to_string(),
                    ops: agg.ops,
                    failures: agg.failures,
                    bandwidth_bytes_per_sec: agg.ops * self.object_size * 1000 / span_ms,
                    res_min_us: agg.min_us,
                    res_mean_us: (agg.sum_us / agg.ops) as u32,
                    res_max_us: agg.max_us,
                }
            })
            .collect()
    }
}
