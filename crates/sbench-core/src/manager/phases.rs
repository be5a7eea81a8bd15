//! Phase driving: consume summaries for the duration of a timed phase, and
//! collect per-foreman acknowledgments between steps.

use anyhow::{bail, Result};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::protocol::{GenericResponse, Opcode, Received, SessionEvent};
use crate::stats::StatSummary;

/// Ramp and run windows of a timed phase.
#[derive(Debug, Clone, Copy)]
pub struct PhaseWindows {
    pub ramp_up: Duration,
    pub run_time: Duration,
    pub ramp_down: Duration,
}

impl PhaseWindows {
    pub fn total(&self) -> Duration {
        self.ramp_up + self.run_time + self.ramp_down
    }
}

/// Run one timed phase: consume foreman summaries until the window (plus one
/// second of slack) elapses, printing a progress line per tick and separator
/// rules at the ramp boundaries. Anything other than a summary is fatal.
pub(super) async fn run_phase(
    events: &mut UnboundedReceiver<(usize, SessionEvent)>,
    windows: &PhaseWindows,
    label: &str,
) -> Result<StatSummary> {
    let slack = Duration::from_secs(1);
    let sleep = tokio::time::sleep(windows.total() + slack);
    tokio::pin!(sleep);
    let mut ticker = tokio::time::interval_at(
        tokio::time::Instant::now() + Duration::from_secs(1),
        Duration::from_secs(1),
    );
    let ramp_up_s = windows.ramp_up.as_secs();
    let run_end_s = ramp_up_s + windows.run_time.as_secs();

    let mut acc = StatSummary::default();
    let mut seconds = 0u64;
    loop {
        tokio::select! {
            _ = &mut sleep => return Ok(acc),
            _ = ticker.tick() => {
                seconds += 1;
                if seconds == ramp_up_s || seconds == run_end_s {
                    println!("{}", "-".repeat(64));
                }
                println!(
                    "{:>4}s  {:<10} {:>10} ops  {:>6} errors",
                    seconds,
                    label,
                    acc.total(),
                    acc.error_total()
                );
            }
            event = events.recv() => {
                let Some((tag, event)) = event else {
                    bail!("all foreman connections closed during {}", label);
                };
                match event {
                    SessionEvent::Closed => bail!("foreman {} connection lost during {}", tag, label),
                    SessionEvent::Message(msg) => match msg.opcode() {
                        Opcode::StatSummary => {
                            let summary: StatSummary = msg.data()?;
                            acc.merge(&summary);
                        }
                        Opcode::Fail | Opcode::Hung => {
                            let detail: GenericResponse = msg.data().unwrap_or_default();
                            bail!("foreman {} reported {}: {}", tag, msg.opcode(), detail.error);
                        }
                        other => bail!("unexpected {} from foreman {} during {}", other, tag, label),
                    },
                }
            }
        }
    }
}

/// Block until every foreman acknowledged `expected`. Late summaries in this
/// window are ignored; anything else is a protocol failure. Returns the ack
/// messages indexed by foreman.
pub(super) async fn wait_for_responses(
    events: &mut UnboundedReceiver<(usize, SessionEvent)>,
    expected: Opcode,
    n_foremen: usize,
) -> Result<Vec<Received>> {
    let mut replies: Vec<Option<Received>> = (0..n_foremen).map(|_| None).collect();
    let mut remaining = n_foremen;
    while remaining > 0 {
        let Some((tag, event)) = events.recv().await else {
            bail!("all foreman connections closed while waiting for {}", expected);
        };
        match event {
            SessionEvent::Closed => {
                bail!("foreman {} connection lost while waiting for {}", tag, expected)
            }
            SessionEvent::Message(msg) => {
                let op = msg.opcode();
                if op == expected {
                    if msg.is_error() {
                        let detail: GenericResponse = msg.data().unwrap_or_default();
                        bail!("foreman {}: {} failed: {}", tag, expected, detail.error);
                    }
                    if replies[tag].is_none() {
                        replies[tag] = Some(msg);
                        remaining -= 1;
                    }
                } else if op == Opcode::StatSummary {
                    // Stragglers from the phase that just ended.
                } else if op == Opcode::Fail || op == Opcode::Hung {
                    let detail: GenericResponse = msg.data().unwrap_or_default();
                    bail!("foreman {} reported {}: {}", tag, op, detail.error);
                } else {
                    bail!(
                        "unexpected {} from foreman {} while waiting for {}",
                        op,
                        tag,
                        expected
                    );
                }
            }
        }
    }
    Ok(replies.into_iter().map(|r| r.expect("all replies seen")).collect())
}
