//! Worker event loop: command handling, state entry effects, heartbeats.

use std::sync::mpsc::TryRecvError;
use std::time::{Duration, Instant};

use super::state::{transition, WorkerState};
use super::{Worker, WorkerCommand, WorkerResponse};
use crate::protocol::{Opcode, ProtocolError};
use crate::stats::WorkerSummary;

/// Heartbeat ceiling: a benchmarking worker emits a summary at least this
/// often so the foreman's hang detector stays fed.
pub(super) const SUMMARY_INTERVAL: Duration = Duration::from_millis(250);

/// Sleep while parked in a state with no behavior, so idle workers do not
/// spin on the command channel.
const IDLE_POLL: Duration = Duration::from_millis(1);

impl Worker {
    pub(super) fn run(&mut self) {
        tracing::debug!(
            worker = self.id,
            "started, range [{}, {}), bandwidth {} B/s",
            self.order.range_start,
            self.order.range_end,
            self.order.bandwidth
        );
        while self.state != WorkerState::Terminated {
            match self.cmd_rx.try_recv() {
                Ok(cmd) => self.handle_command(cmd),
                Err(TryRecvError::Empty) => self.tick(),
                Err(TryRecvError::Disconnected) => break,
            }
        }
        self.shutdown();
    }

    fn handle_command(&mut self, cmd: WorkerCommand) {
        match cmd {
            WorkerCommand::Op(op) => self.handle_opcode(op),
            WorkerCommand::UploadStats(transport) => {
                self.pending_upload = Some(transport);
                if !self.state.is_active_phase() {
                    self.flush_pending_upload();
                }
            }
        }
    }

    fn handle_opcode(&mut self, op: Opcode) {
        match transition(self.state, op) {
            Some(next) => {
                // Connect and Prepare take real time; their acks wait for
                // completion. Everything else acks on receipt.
                if !matches!(op, Opcode::Connect | Opcode::Prepare) {
                    self.ack(op);
                }
                self.enter(next);
            }
            None => {
                let err = ProtocolError::BadTransition {
                    state: self.state.name(),
                    opcode: op,
                };
                tracing::error!(worker = self.id, "{}", err);
                self.send_fail(err.to_string());
            }
        }
    }

    /// One tick of the current state's behavior.
    fn tick(&mut self) {
        match self.state {
            WorkerState::Connect => self.do_connect(),
            WorkerState::Write => {
                self.write_or_prepare(crate::stats::StatPhase::Write);
            }
            WorkerState::Prepare => {
                if self.write_or_prepare(crate::stats::StatPhase::Prepare) {
                    // One full pass over the range completes the phase.
                    self.ack(Opcode::Prepare);
                    self.enter(WorkerState::PrepareDone);
                }
            }
            WorkerState::Read => self.read(),
            WorkerState::ReadWrite => self.read_write(),
            WorkerState::Clean => {
                if self.clean() {
                    self.enter(WorkerState::CleanDone);
                }
            }
            _ => std::thread::sleep(IDLE_POLL),
        }
    }

    /// State entry side effects. Phase states restart the clock, zero the
    /// summary and arm the hang timer; Done states disarm it. Both emit an
    /// immediate summary so the foreman sees the flip at once.
    pub(super) fn enter(&mut self, next: WorkerState) {
        self.state = next;
        if next.is_active_phase() {
            self.phase_start = Instant::now();
            self.summary.zero();
            self.can_timeout = true;
            self.object_index = self.order.range_start;
            self.next_connection = 0;
            self.governor.reset();
            self.emit_summary(true);
        } else if matches!(
            next,
            WorkerState::ConnectDone
                | WorkerState::WriteDone
                | WorkerState::PrepareDone
                | WorkerState::ReadDone
                | WorkerState::ReadWriteDone
                | WorkerState::CleanDone
        ) {
            self.can_timeout = false;
            self.emit_summary(true);
            self.flush_pending_upload();
        }
    }

    fn do_connect(&mut self) {
        match self.establish() {
            Ok(()) => {
                self.ack(Opcode::Connect);
                self.enter(WorkerState::ConnectDone);
            }
            Err(e) => {
                tracing::error!(worker = self.id, "connect failed: {:#}", e);
                self.send_fail(format!("connect: {:#}", e));
            }
        }
    }

    pub(super) fn ack(&mut self, opcode: Opcode) {
        let _ = self.response_tx.send(WorkerResponse::Ack {
            worker_id: self.id,
            opcode,
        });
    }

    /// Report a job-ending failure and stop. The only state change a failure
    /// makes is entering Terminated.
    pub(super) fn send_fail(&mut self, error: String) {
        let _ = self.response_tx.send(WorkerResponse::Fail {
            worker_id: self.id,
            error,
        });
        self.state = WorkerState::Terminated;
    }

    /// Drain the summary matrix to the foreman. Non-forced emissions are
    /// rate-limited to the heartbeat interval.
    pub(super) fn emit_summary(&mut self, force: bool) {
        if !force && self.last_summary.elapsed() < SUMMARY_INTERVAL {
            return;
        }
        let _ = self.summary_tx.send(WorkerSummary {
            worker_id: self.id,
            can_timeout: self.can_timeout,
            summary: self.summary,
        });
        self.summary.zero();
        self.last_summary = Instant::now();
    }

    fn flush_pending_upload(&mut self) {
        if let Some(transport) = self.pending_upload.take() {
            match self.pool.upload(&transport) {
                Ok(()) => {
                    let _ = self.response_tx.send(WorkerResponse::StatsUploaded {
                        worker_id: self.id,
                    });
                }
                Err(e) => self.send_fail(format!("stat upload: {}", e)),
            }
        }
    }

    fn shutdown(&mut self) {
        for conn in &mut self.connections {
            if let Err(e) = conn.worker_close() {
                tracing::warn!(worker = self.id, "close {}: {}", conn.target(), e);
            }
        }
        self.connections.clear();
        tracing::debug!(worker = self.id, "terminated");
    }
}
