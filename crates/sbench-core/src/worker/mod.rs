//! Worker: one unit of concurrent I/O issuance inside a foreman.
//!
//! Each worker runs a blocking thread with a cooperative loop: poll the
//! command channel, and when nothing is pending execute one tick of the
//! behavior bound to the current state. Storage calls, pacing sleeps and
//! stat recording all happen on this thread; channels are the only contact
//! with the foreman.

mod bandwidth;
mod ops;
mod run;
mod state;

use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc::UnboundedSender;

use crate::backend::Connection;
use crate::generator::Generator;
use crate::protocol::{Opcode, Transport};
use crate::stats::{StatPool, StatSummary, WorkerSummary};
use crate::workorder::WorkOrder;

pub use bandwidth::BandwidthGovernor;
pub use state::{transition, WorkerState};

/// What a foreman sends down a worker's command channel.
pub enum WorkerCommand {
    Op(Opcode),
    /// Upload all recorded stats directly on the given manager connection.
    /// Deferred until the worker leaves its current phase.
    UploadStats(Arc<Transport>),
}

/// What a worker reports back to the foreman's event loop. `Hung` is never
/// sent by a worker; the foreman's stats task synthesizes it when a worker
/// stops heartbeating.
#[derive(Debug)]
pub enum WorkerResponse {
    Ack { worker_id: usize, opcode: Opcode },
    Fail { worker_id: usize, error: String },
    StatsUploaded { worker_id: usize },
    Hung { worker_id: usize },
}

/// Foreman-side handle: the command channel plus the join handle.
pub struct WorkerHandle {
    pub id: usize,
    cmd_tx: Sender<WorkerCommand>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Send a command; returns false if the worker thread is gone.
    pub fn send(&self, cmd: WorkerCommand) -> bool {
        self.cmd_tx.send(cmd).is_ok()
    }

    pub fn join(&mut self) {
        if let Some(handle) = self.join.take() {
            if handle.join().is_err() {
                tracing::error!(worker = self.id, "worker thread panicked");
            }
        }
    }
}

/// Spawn one worker thread. `order` must already be striped down to this
/// worker's range and bandwidth share.
pub fn spawn(
    id: usize,
    order: WorkOrder,
    stat_chunk_len: usize,
    response_tx: UnboundedSender<WorkerResponse>,
    summary_tx: UnboundedSender<WorkerSummary>,
) -> WorkerHandle {
    let (cmd_tx, cmd_rx) = std::sync::mpsc::channel();
    let join = std::thread::Builder::new()
        .name(format!("worker-{}", id))
        .spawn(move || {
            let now = Instant::now();
            let mut worker = Worker {
                id,
                rng: StdRng::seed_from_u64(order.seed ^ id as u64),
                governor: BandwidthGovernor::new(order.bandwidth),
                order,
                state: WorkerState::Init,
                connections: Vec::new(),
                generator: None,
                buffer: Vec::new(),
                scratch: Vec::new(),
                pool: StatPool::new(stat_chunk_len),
                summary: StatSummary::default(),
                can_timeout: false,
                phase_start: now,
                last_summary: now,
                object_index: 0,
                cycle: 0,
                next_connection: 0,
                cmd_rx,
                response_tx,
                summary_tx,
                pending_upload: None,
            };
            worker.run();
        })
        .expect("spawn worker thread");
    WorkerHandle {
        id,
        cmd_tx,
        join: Some(join),
    }
}

struct Worker {
    id: usize,
    order: WorkOrder,
    state: WorkerState,
    connections: Vec<Box<dyn Connection>>,
    generator: Option<Box<dyn Generator>>,
    buffer: Vec<u8>,
    scratch: Vec<u8>,
    pool: StatPool,
    summary: StatSummary,
    can_timeout: bool,
    phase_start: Instant,
    last_summary: Instant,
    object_index: u64,
    cycle: u64,
    next_connection: usize,
    governor: BandwidthGovernor,
    rng: StdRng,
    cmd_rx: Receiver<WorkerCommand>,
    response_tx: UnboundedSender<WorkerResponse>,
    summary_tx: UnboundedSender<WorkerSummary>,
    pending_upload: Option<Arc<Transport>>,
}
