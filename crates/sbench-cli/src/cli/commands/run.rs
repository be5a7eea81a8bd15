//! `sbench <backend> run`: build the work order and drive one job.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sbench_core::manager::{self, JobSpec, PhaseWindows};
use sbench_core::workorder::WorkOrder;

use crate::cli::RunArgs;

pub async fn run(kind: &str, args: RunArgs) -> Result<()> {
    let object_size = parse_size(&args.size).context("object size")?;
    let bandwidth = parse_size(&args.bandwidth).context("bandwidth")?;
    if args.count == 0 {
        bail!("object count must be at least 1");
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x5eed);
    let seed = args.seed.unwrap_or(now);

    let mut protocol_config = HashMap::new();
    for pair in &args.cfg {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("bad --cfg entry {:?}, expected KEY=VALUE", pair))?;
        protocol_config.insert(key.to_string(), value.to_string());
    }

    let order = WorkOrder {
        job_id: now,
        object_size,
        bandwidth,
        worker_factor: args.worker_factor,
        skip_read_validation: args.skip_read_verification,
        read_write_mix: args.read_write_mix,
        range_start: 0,
        range_end: args.count,
        seed,
        generator_kind: args.generator.clone(),
        generator_config: HashMap::new(),
        connection_kind: kind.to_string(),
        targets: args.targets.clone(),
        protocol_config,
        object_key_prefix: args.prefix.clone(),
        server_index: 0,
    };

    let spec = JobSpec {
        servers: args.servers.clone(),
        port: args.port,
        order,
        windows: PhaseWindows {
            ramp_up: Duration::from_secs(args.ramp_up),
            run_time: Duration::from_secs(args.run_time),
            ramp_down: Duration::from_secs(args.ramp_down),
        },
        cleanup: !args.no_cleanup,
        output: Some(args.output.clone()),
    };

    let outcome = manager::run_job(spec).await?;

    println!();
    for analysis in &outcome.analyses {
        println!(
            "{:<8} {:>10} ops  {:>6} failures  {:>8} MB/s  latency {}/{}/{} us",
            analysis.phase,
            analysis.ops,
            analysis.failures,
            analysis.bandwidth_bytes_per_sec / 1_000_000,
            analysis.res_min_us,
            analysis.res_mean_us,
            analysis.res_max_us
        );
    }
    println!(
        "{} stats collected, {} errors; report written to {}",
        outcome.stats_collected,
        outcome.totals.error_total(),
        args.output.display()
    );
    Ok(())
}

/// Parse a size with an optional K/M/G suffix (powers of 1024).
fn parse_size(input: &str) -> Result<u64> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        bail!("empty size");
    }
    let (digits, multiplier) = match trimmed.chars().last().unwrap() {
        'k' | 'K' => (&trimmed[..trimmed.len() - 1], 1u64 << 10),
        'm' | 'M' => (&trimmed[..trimmed.len() - 1], 1u64 << 20),
        'g' | 'G' => (&trimmed[..trimmed.len() - 1], 1u64 << 30),
        _ => (trimmed, 1),
    };
    let value: u64 = digits
        .parse()
        .with_context(|| format!("bad size {:?}", input))?;
    Ok(value * multiplier)
}
