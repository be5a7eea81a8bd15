//! Manager: drives exactly one job across a fleet of foremen.
//!
//! Dials every foreman, partitions the object range, walks the fleet through
//! the phase sequence in lock-step, consumes summaries and detail records,
//! and writes the report. Terminate and storage teardown run on every exit
//! path.

mod phases;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver};

use crate::backend;
use crate::protocol::{Discovery, Encoding, GenericResponse, Opcode, SessionEvent, Transport};
use crate::report::{Analyzer, Report};
use crate::stats::{Stat, StatSummary};
use crate::workorder::{self, WorkOrder};

pub use phases::PhaseWindows;

/// Everything the CLI resolves before a run.
#[derive(Debug, Clone)]
pub struct JobSpec {
    /// Foreman hosts; a bare host gets `port` appended.
    pub servers: Vec<String>,
    pub port: u16,
    /// The global work order; ranges and server indices are rewritten per
    /// foreman before sending.
    pub order: WorkOrder,
    pub windows: PhaseWindows,
    /// Delete objects (and a bucket this tool created) afterwards.
    pub cleanup: bool,
    /// Report path; `None` skips the report file.
    pub output: Option<PathBuf>,
}

/// What a completed job produced, for callers that want more than the file.
#[derive(Debug)]
pub struct JobOutcome {
    pub totals: StatSummary,
    pub stats_collected: u64,
    pub analyses: Vec<crate::report::Analysis>,
}

#[derive(Serialize)]
struct ReportArguments<'a> {
    order: &'a WorkOrder,
    servers: &'a [String],
    ramp_up_secs: u64,
    run_time_secs: u64,
    ramp_down_secs: u64,
}

/// Run one job start to finish.
pub async fn run_job(spec: JobSpec) -> Result<JobOutcome> {
    spec.order.validate()?;
    if spec.servers.is_empty() {
        bail!("no foreman servers given");
    }

    // Manager-side storage session: creates the bucket/pool/dir if needed so
    // workers find it, and owns its teardown.
    let mut storage = backend::create(
        &spec.order.connection_kind,
        &spec.order.targets[0],
        &spec.order.protocol_config,
    )?;
    storage.manager_connect().context("storage manager connect")?;
    let can_delete = storage.can_delete();

    let (event_tx, mut events) = mpsc::unbounded_channel();
    let result = match dial_foremen(&spec, &event_tx) {
        Ok(foremen) => {
            let outcome = drive(&spec, &foremen, &mut events, can_delete).await;
            if outcome.is_err() {
                // Best-effort release of the fleet before bailing out.
                for t in &foremen {
                    let _ = t.send(Opcode::Terminate, &());
                }
            }
            for t in &foremen {
                t.shutdown();
            }
            outcome
        }
        Err(e) => Err(e),
    };

    if let Err(e) = storage.manager_close(spec.cleanup) {
        tracing::warn!("storage teardown: {}", e);
    }
    result
}

fn dial_foremen(
    spec: &JobSpec,
    event_tx: &mpsc::UnboundedSender<(usize, SessionEvent)>,
) -> Result<Vec<Arc<Transport>>> {
    let mut foremen = Vec::with_capacity(spec.servers.len());
    for (tag, host) in spec.servers.iter().enumerate() {
        let addr = if host.contains(':') {
            host.clone()
        } else {
            format!("{}:{}", host, spec.port)
        };
        let transport = Transport::connect(addr.as_str(), Encoding::Json)
            .with_context(|| format!("dial foreman {}", addr))?;
        transport.install_channel(tag, event_tx.clone())?;
        foremen.push(Arc::new(transport));
    }
    Ok(foremen)
}

async fn drive(
    spec: &JobSpec,
    foremen: &[Arc<Transport>],
    events: &mut UnboundedReceiver<(usize, SessionEvent)>,
    can_delete: bool,
) -> Result<JobOutcome> {
    let n = foremen.len();
    let order = &spec.order;

    // Discovery: sizing inputs and a version sanity check.
    broadcast(foremen, Opcode::Discovery)?;
    let replies = phases::wait_for_responses(events, Opcode::Discovery, n).await?;
    for (tag, reply) in replies.iter().enumerate() {
        let d: Discovery = reply.data()?;
        tracing::info!(
            foreman = tag,
            cores = d.cores,
            ram_gib = d.ram_bytes >> 30,
            version = %d.version,
            "discovered"
        );
        if d.version != crate::VERSION {
            tracing::warn!(
                foreman = tag,
                "version skew: foreman {} vs manager {}",
                d.version,
                crate::VERSION
            );
        }
        let buffers = 2 * order.object_size * d.cores as u64;
        if buffers > d.ram_bytes / 4 {
            tracing::warn!(
                foreman = tag,
                "object buffers ({} MiB) would use over a quarter of RAM",
                buffers >> 20
            );
        }
    }

    // Partition the object range and hand each foreman its stripe. The
    // bandwidth cap is per foreman; each divides it across its own workers.
    let stripes = workorder::stripe_range(order.range_start, order.range_end, n);
    for (tag, transport) in foremen.iter().enumerate() {
        let mut tailored = order.restricted(stripes[tag], order.bandwidth);
        tailored.server_index = tag as u16;
        transport.send(Opcode::Connect, &tailored)?;
    }
    phases::wait_for_responses(events, Opcode::Connect, n).await?;
    tracing::info!(foremen = n, "fleet connected");

    step(foremen, events, Opcode::StatSummaryStart, n).await?;

    // Write phase: timed.
    step(foremen, events, Opcode::WriteStart, n).await?;
    phases::run_phase(events, &spec.windows, "write").await?;
    step(foremen, events, Opcode::WriteStop, n).await?;

    // Prepare: completion-driven, no clock.
    step(foremen, events, Opcode::Prepare, n).await?;

    // Read or mixed phase: timed.
    if order.read_write_mix > 0 {
        step(foremen, events, Opcode::ReadWriteStart, n).await?;
        phases::run_phase(events, &spec.windows, "read-write").await?;
        step(foremen, events, Opcode::ReadWriteStop, n).await?;
    } else {
        step(foremen, events, Opcode::ReadStart, n).await?;
        phases::run_phase(events, &spec.windows, "read").await?;
        step(foremen, events, Opcode::ReadStop, n).await?;
    }

    step(foremen, events, Opcode::StatSummaryStop, n).await?;

    if can_delete && spec.cleanup {
        step(foremen, events, Opcode::Delete, n).await?;
    }

    let (totals, stats_collected, analyses) = collect_details(spec, foremen, events).await?;

    step(foremen, events, Opcode::Terminate, n).await?;

    tracing::info!(
        ops = totals.total(),
        errors = totals.error_total(),
        stats = stats_collected,
        "job complete"
    );
    Ok(JobOutcome {
        totals,
        stats_collected,
        analyses,
    })
}

/// Broadcast one opcode and wait for every foreman's ack.
async fn step(
    foremen: &[Arc<Transport>],
    events: &mut UnboundedReceiver<(usize, SessionEvent)>,
    op: Opcode,
    n: usize,
) -> Result<()> {
    broadcast(foremen, op)?;
    phases::wait_for_responses(events, op, n).await?;
    Ok(())
}

fn broadcast(foremen: &[Arc<Transport>], op: Opcode) -> Result<()> {
    for t in foremen {
        t.send(op, &())?;
    }
    Ok(())
}

/// Pull every worker's detail records off the fleet, streaming them into the
/// report as they arrive. The report is finished on every exit path: a
/// failure mid-collection lands in the file's Errors array and the JSON
/// object is still closed, so what did stream in stays readable.
async fn collect_details(
    spec: &JobSpec,
    foremen: &[Arc<Transport>],
    events: &mut UnboundedReceiver<(usize, SessionEvent)>,
) -> Result<(StatSummary, u64, Vec<crate::report::Analysis>)> {
    let arguments = ReportArguments {
        order: &spec.order,
        servers: &spec.servers,
        ramp_up_secs: spec.windows.ramp_up.as_secs(),
        run_time_secs: spec.windows.run_time.as_secs(),
        ramp_down_secs: spec.windows.ramp_down.as_secs(),
    };
    let mut report = match &spec.output {
        Some(path) => Some(Report::create(path, &arguments)?),
        None => None,
    };
    let mut analyzer = Analyzer::new(
        spec.order.object_size,
        spec.windows.ramp_up,
        spec.windows.run_time,
    );
    let mut totals = StatSummary::default();
    let mut collected = 0u64;

    let result = match broadcast(foremen, Opcode::StatDetails) {
        Ok(()) => {
            consume_details(
                foremen.len(),
                events,
                report.as_mut(),
                &mut analyzer,
                &mut totals,
                &mut collected,
            )
            .await
        }
        Err(e) => Err(e.into()),
    };

    let analyses = analyzer.analyses();
    match result {
        Ok(()) => {
            if let Some(report) = report {
                report.close(&analyses)?;
            }
            Ok((totals, collected, analyses))
        }
        Err(e) => {
            if let Some(mut report) = report {
                report.add_error(format!("{:#}", e));
                if let Err(close_err) = report.close(&analyses) {
                    tracing::warn!("closing report after failure: {}", close_err);
                }
            }
            Err(e)
        }
    }
}

/// The receive loop behind `collect_details`: counts StatDetailsDone per
/// foreman and folds every stat into the totals, the analyzer and the report.
async fn consume_details(
    n_foremen: usize,
    events: &mut UnboundedReceiver<(usize, SessionEvent)>,
    mut report: Option<&mut Report>,
    analyzer: &mut Analyzer,
    totals: &mut StatSummary,
    collected: &mut u64,
) -> Result<()> {
    let mut remaining = n_foremen;
    while remaining > 0 {
        let Some((tag, event)) = events.recv().await else {
            bail!("all foreman connections closed during stat collection");
        };
        match event {
            SessionEvent::Closed => bail!("foreman {} lost during stat collection", tag),
            SessionEvent::Message(msg) => match msg.opcode() {
                Opcode::StatDetails => {
                    let stats: Vec<Stat> = msg.data()?;
                    for stat in &stats {
                        totals.add(stat.phase, stat.error);
                        analyzer.add(stat);
                        if let Some(report) = report.as_mut() {
                            report.add_stat(stat)?;
                        }
                    }
                    *collected += stats.len() as u64;
                }
                Opcode::StatDetailsDone => remaining -= 1,
                Opcode::StatSummary => {}
                Opcode::Fail | Opcode::Hung => {
                    let detail: GenericResponse = msg.data().unwrap_or_default();
                    bail!("foreman {} reported {}: {}", tag, msg.opcode(), detail.error);
                }
                other => bail!("unexpected {} from foreman {} during stat collection", other, tag),
            },
        }
    }
    Ok(())
}
