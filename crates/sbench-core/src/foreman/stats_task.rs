//! Foreman stats task: drains worker summaries, ships one aggregate to the
//! manager per second while summaries are enabled, and runs the hang check.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use super::hang::HangTracker;
use crate::protocol::{Opcode, Transport};
use crate::stats::{StatSummary, WorkerSummary};
use crate::worker::WorkerResponse;

/// Commands the session loop sends to its stats task.
#[derive(Debug)]
pub(super) enum StatsCommand {
    StartSummaries,
    StopSummaries,
    /// Reset every worker's liveness clock and budget (phase change).
    ClearTimeouts,
    Terminate,
}

pub(super) fn spawn(
    transport: Arc<Transport>,
    n_workers: usize,
    hang_initial: Duration,
    mut summary_rx: UnboundedReceiver<WorkerSummary>,
    mut cmd_rx: UnboundedReceiver<StatsCommand>,
    response_tx: UnboundedSender<WorkerResponse>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tracker = HangTracker::new(n_workers, hang_initial);
        let mut aggregate = StatSummary::default();
        let mut enabled = false;
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if enabled {
                        if let Err(e) = transport.send(Opcode::StatSummary, &aggregate) {
                            tracing::debug!("summary send failed, manager gone: {}", e);
                            return;
                        }
                        aggregate.zero();
                    }
                    for worker_id in tracker.check(Instant::now()) {
                        tracing::error!(worker = worker_id, "no heartbeat within budget, declaring hung");
                        let _ = response_tx.send(WorkerResponse::Hung { worker_id });
                    }
                }
                Some(ws) = summary_rx.recv() => {
                    tracker.observe(&ws);
                    aggregate.merge(&ws.summary);
                }
                cmd = cmd_rx.recv() => match cmd {
                    Some(StatsCommand::StartSummaries) => enabled = true,
                    Some(StatsCommand::StopSummaries) => enabled = false,
                    Some(StatsCommand::ClearTimeouts) => tracker.clear(),
                    Some(StatsCommand::Terminate) | None => return,
                },
            }
        }
    })
}
