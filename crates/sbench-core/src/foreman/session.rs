//! One manager session: the foreman event loop.
//!
//! Multiplexes newly-accepted control connections (rejected with Busy while a
//! session is live), messages from the current manager, and worker
//! responses. The job state machine mirrors the worker's; for every opcode
//! broadcast to N workers the foreman waits for exactly N acks before it
//! settles the state and forwards one ack to the manager.

use anyhow::Result;
use std::net::TcpStream;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::hang::HungError;
use super::stats_task::{self, StatsCommand};
use super::ForemanConfig;
use crate::hostinfo;
use crate::protocol::{
    Discovery, Encoding, GenericResponse, Opcode, ProtocolError, Received, SessionEvent, Transport,
};
use crate::stats::{self, WorkerSummary};
use crate::worker::{self, transition, WorkerCommand, WorkerHandle, WorkerResponse, WorkerState};
use crate::workorder::{self, WorkOrder};

pub(super) async fn run(
    transport: Arc<Transport>,
    config: &ForemanConfig,
    control_rx: &mut UnboundedReceiver<TcpStream>,
) -> Result<()> {
    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel();
    transport.install_channel(0, msg_tx)?;

    let (resp_tx, resp_rx) = mpsc::unbounded_channel();
    let (summary_tx, summary_rx) = mpsc::unbounded_channel();

    let mut session = Session {
        transport: Arc::clone(&transport),
        config,
        state: WorkerState::Init,
        inflight: None,
        pending: 0,
        workers: Vec::new(),
        resp_tx,
        summary_tx,
        summary_rx: Some(summary_rx),
        stats_cmd_tx: None,
        uploads_pending: 0,
        finished: false,
    };

    let result = session.event_loop(&mut msg_rx, resp_rx, control_rx).await;
    session.stats_cmd(StatsCommand::Terminate);
    transport.shutdown();
    result
}

struct Session<'a> {
    transport: Arc<Transport>,
    config: &'a ForemanConfig,
    state: WorkerState,
    /// Opcode currently broadcast to workers, if its acks are still arriving.
    inflight: Option<Opcode>,
    pending: usize,
    workers: Vec<WorkerHandle>,
    resp_tx: UnboundedSender<WorkerResponse>,
    summary_tx: UnboundedSender<WorkerSummary>,
    summary_rx: Option<UnboundedReceiver<WorkerSummary>>,
    stats_cmd_tx: Option<UnboundedSender<StatsCommand>>,
    uploads_pending: usize,
    finished: bool,
}

impl Session<'_> {
    async fn event_loop(
        &mut self,
        msg_rx: &mut UnboundedReceiver<(usize, SessionEvent)>,
        mut resp_rx: UnboundedReceiver<WorkerResponse>,
        control_rx: &mut UnboundedReceiver<TcpStream>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                maybe_stream = control_rx.recv() => {
                    match maybe_stream {
                        Some(stream) => reject_busy(stream),
                        None => return Ok(()),
                    }
                }
                maybe_event = msg_rx.recv() => {
                    match maybe_event {
                        Some((_, SessionEvent::Message(msg))) => self.handle_manager_message(msg)?,
                        Some((_, SessionEvent::Closed)) | None => {
                            if !self.finished && !self.workers.is_empty() {
                                tracing::warn!("manager connection lost mid-job, terminating workers");
                            }
                            self.terminate_workers(true);
                            return Ok(());
                        }
                    }
                }
                Some(resp) = resp_rx.recv() => {
                    self.handle_worker_response(resp)?;
                }
            }
            if self.finished {
                return Ok(());
            }
        }
    }

    fn handle_manager_message(&mut self, msg: Received) -> Result<()> {
        let op = msg.opcode();
        match op {
            // Synchronous short-circuit, no state change.
            Opcode::Discovery => {
                let reply = Discovery {
                    cores: hostinfo::cores(),
                    ram_bytes: hostinfo::physical_ram(),
                    version: crate::VERSION.to_string(),
                };
                self.transport.send(Opcode::Discovery, &reply)?;
            }
            Opcode::StatSummaryStart => {
                self.stats_cmd(StatsCommand::StartSummaries);
                self.transport.send(op, &GenericResponse::ok())?;
            }
            Opcode::StatSummaryStop => {
                self.stats_cmd(StatsCommand::StopSummaries);
                self.transport.send(op, &GenericResponse::ok())?;
            }
            Opcode::StatDetails => {
                self.uploads_pending = 0;
                for w in &self.workers {
                    if w.send(WorkerCommand::UploadStats(Arc::clone(&self.transport))) {
                        self.uploads_pending += 1;
                    }
                }
                if self.uploads_pending == 0 {
                    self.transport
                        .send(Opcode::StatDetailsDone, &GenericResponse::ok())?;
                }
            }
            op if op.is_worker_opcode() => self.handle_job_opcode(op, &msg)?,
            other => {
                let err = ProtocolError::UnexpectedOpcode {
                    opcode: other,
                    context: "driving a foreman",
                };
                tracing::error!("{}", err);
                self.fail_job(err.to_string())?;
            }
        }
        Ok(())
    }

    /// An opcode that is broadcast to workers and acked back to the manager
    /// once every worker answered.
    fn handle_job_opcode(&mut self, op: Opcode, msg: &Received) -> Result<()> {
        if let Some(inflight) = self.inflight {
            let err = format!("{} received while {} is still pending worker acks", op, inflight);
            tracing::error!("{}", err);
            return self.fail_job(err);
        }
        let Some(next) = transition(self.state, op) else {
            let err = ProtocolError::BadTransition {
                state: self.state.name(),
                opcode: op,
            };
            tracing::error!("{}", err);
            return self.fail_job(err.to_string());
        };

        if op == Opcode::Connect {
            let order: WorkOrder = match msg.data() {
                Ok(order) => order,
                Err(e) => return self.fail_job(format!("work order: {}", e)),
            };
            if let Err(e) = self.start_job(order) {
                return self.fail_job(format!("start job: {:#}", e));
            }
        }
        if op.starts_phase() {
            self.stats_cmd(StatsCommand::ClearTimeouts);
        }

        self.state = next;
        self.inflight = Some(op);
        self.pending = 0;
        for w in &self.workers {
            if w.send(WorkerCommand::Op(op)) {
                self.pending += 1;
            }
        }
        if self.pending == 0 {
            self.settle()?;
        }
        Ok(())
    }

    /// Spawn workers for a freshly-received work order, striping its range
    /// and bandwidth, then start the stats task that watches them.
    fn start_job(&mut self, mut order: WorkOrder) -> Result<()> {
        order.validate()?;

        // Relative file targets land under the configured mounts dir.
        if order.connection_kind == "file" {
            for target in &mut order.targets {
                if !Path::new(target.as_str()).is_absolute() {
                    *target = self
                        .config
                        .mounts_dir
                        .join(target.as_str())
                        .to_string_lossy()
                        .into_owned();
                }
            }
        }

        let cores = hostinfo::cores();
        let factor = if order.worker_factor > 0.0 {
            order.worker_factor
        } else {
            self.config.worker_factor
        };
        let n = workorder::worker_count(cores, factor, order.range_len());
        let chunk_len = stats::chunk_len_for(hostinfo::physical_ram(), n);
        let stripes = workorder::stripe_range(order.range_start, order.range_end, n);
        let share = workorder::split_bandwidth(order.bandwidth, n);

        tracing::info!(
            job = order.job_id,
            workers = n,
            chunk_len,
            "starting job over [{}, {}) at {} B/s per worker",
            order.range_start,
            order.range_end,
            share
        );

        for (id, stripe) in stripes.into_iter().enumerate() {
            self.workers.push(worker::spawn(
                id,
                order.restricted(stripe, share),
                chunk_len,
                self.resp_tx.clone(),
                self.summary_tx.clone(),
            ));
        }

        let summary_rx = self
            .summary_rx
            .take()
            .expect("one job per session, summaries not yet claimed");
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        stats_task::spawn(
            Arc::clone(&self.transport),
            n,
            self.config.hang_timeout,
            summary_rx,
            cmd_rx,
            self.resp_tx.clone(),
        );
        self.stats_cmd_tx = Some(cmd_tx);
        Ok(())
    }

    fn handle_worker_response(&mut self, resp: WorkerResponse) -> Result<()> {
        match resp {
            WorkerResponse::Ack { worker_id, opcode } => {
                if self.inflight == Some(opcode) {
                    self.pending = self.pending.saturating_sub(1);
                    if self.pending == 0 {
                        self.settle()?;
                    }
                } else {
                    tracing::debug!(worker = worker_id, "late ack of {}", opcode);
                }
            }
            WorkerResponse::Fail { worker_id, error } => {
                tracing::error!(worker = worker_id, "worker failed: {}", error);
                self.fail_job(error)?;
            }
            WorkerResponse::StatsUploaded { .. } => {
                if self.uploads_pending > 0 {
                    self.uploads_pending -= 1;
                    if self.uploads_pending == 0 {
                        self.transport
                            .send(Opcode::StatDetailsDone, &GenericResponse::ok())?;
                    }
                }
            }
            WorkerResponse::Hung { worker_id } => {
                // Fatal: report upward, then crash-for-restart. Workers stuck
                // in a backend call cannot be joined.
                let err = HungError { worker_id };
                let _ = self
                    .transport
                    .send_error(Opcode::Hung, &GenericResponse::fail(err.to_string()));
                self.terminate_workers(false);
                return Err(err.into());
            }
        }
        Ok(())
    }

    /// All workers answered the in-flight opcode: settle the state and
    /// forward one ack to the manager.
    fn settle(&mut self) -> Result<()> {
        let Some(op) = self.inflight.take() else {
            return Ok(());
        };
        match op {
            Opcode::Connect => self.state = WorkerState::ConnectDone,
            Opcode::Prepare => self.state = WorkerState::PrepareDone,
            _ => {}
        }
        self.transport.send(op, &GenericResponse::ok())?;
        if op == Opcode::Terminate {
            for w in &mut self.workers {
                w.join();
            }
            self.workers.clear();
            self.finished = true;
        }
        Ok(())
    }

    /// A protocol or backend failure ends the job but not the daemon: report
    /// Fail, tear the workers down, and wait for the manager's Terminate.
    fn fail_job(&mut self, error: String) -> Result<()> {
        let _ = self
            .transport
            .send_error(Opcode::Fail, &GenericResponse::fail(error));
        self.terminate_workers(true);
        self.state = WorkerState::Terminated;
        self.inflight = None;
        self.pending = 0;
        Ok(())
    }

    fn terminate_workers(&mut self, join: bool) {
        for w in &self.workers {
            w.send(WorkerCommand::Op(Opcode::Terminate));
        }
        if join {
            for w in &mut self.workers {
                w.join();
            }
            self.workers.clear();
        }
        self.stats_cmd(StatsCommand::Terminate);
    }

    fn stats_cmd(&self, cmd: StatsCommand) {
        if let Some(tx) = &self.stats_cmd_tx {
            let _ = tx.send(cmd);
        }
    }
}

/// Policy for connections that arrive while a manager session is active.
fn reject_busy(stream: TcpStream) {
    match Transport::from_stream(stream, Encoding::Json) {
        Ok(t) => {
            tracing::warn!(peer = t.peer(), "foreman busy, rejecting manager connection");
            let _ = t.send_error(Opcode::Busy, &GenericResponse::fail("foreman busy"));
            t.shutdown();
        }
        Err(e) => tracing::warn!("could not wrap rejected connection: {}", e),
    }
}
