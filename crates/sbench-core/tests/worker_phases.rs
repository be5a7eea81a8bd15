//! Worker-level phase behavior: mixed-phase op ratios and the
//! invalidate-once-per-pass cadence, measured against the memory backend.

use sbench_core::backend::{self, Connection as _};
use sbench_core::protocol::Opcode;
use sbench_core::stats::{StatPhase, StatSummary};
use sbench_core::worker::{self, WorkerCommand, WorkerResponse};
use sbench_core::workorder::WorkOrder;
use std::collections::HashMap;
use std::time::Duration;

fn memory_order(target: &str, count: u64) -> WorkOrder {
    WorkOrder {
        job_id: 7,
        object_size: 128,
        bandwidth: 0,
        worker_factor: 1.0,
        skip_read_validation: false,
        read_write_mix: 0,
        range_start: 0,
        range_end: count,
        seed: 0xfeed,
        generator_kind: "prng".into(),
        generator_config: HashMap::new(),
        connection_kind: "memory".into(),
        targets: vec![target.to_string()],
        protocol_config: HashMap::new(),
        object_key_prefix: "sbench".into(),
        server_index: 0,
    }
}

fn expect_ack(
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<WorkerResponse>,
    opcode: Opcode,
) {
    loop {
        match rx.blocking_recv().expect("worker alive") {
            WorkerResponse::Ack { opcode: got, .. } if got == opcode => return,
            WorkerResponse::Ack { .. } => continue,
            other => panic!("expected ack of {:?}, got {:?}", opcode, other),
        }
    }
}

#[test]
fn read_write_mix_tracks_the_requested_percentage() {
    let target = "phase-mix";
    let mut mgr = backend::MemoryConnection::new(target, &HashMap::new());
    mgr.manager_connect().unwrap();

    let mut order = memory_order(target, 16);
    order.read_write_mix = 30;

    let (resp_tx, mut resp_rx) = tokio::sync::mpsc::unbounded_channel();
    let (sum_tx, mut sum_rx) = tokio::sync::mpsc::unbounded_channel();
    let mut handle = worker::spawn(0, order, 1024, resp_tx, sum_tx);

    handle.send(WorkerCommand::Op(Opcode::Connect));
    expect_ack(&mut resp_rx, Opcode::Connect);
    handle.send(WorkerCommand::Op(Opcode::Prepare));
    expect_ack(&mut resp_rx, Opcode::Prepare);

    handle.send(WorkerCommand::Op(Opcode::ReadWriteStart));
    expect_ack(&mut resp_rx, Opcode::ReadWriteStart);
    std::thread::sleep(Duration::from_millis(800));
    handle.send(WorkerCommand::Op(Opcode::ReadWriteStop));
    expect_ack(&mut resp_rx, Opcode::ReadWriteStop);
    handle.send(WorkerCommand::Op(Opcode::Terminate));
    expect_ack(&mut resp_rx, Opcode::Terminate);
    handle.join();

    let mut totals = StatSummary::default();
    while let Ok(ws) = sum_rx.try_recv() {
        totals.merge(&ws.summary);
    }
    let reads = totals.phase_total(StatPhase::Read) as f64;
    let writes = totals.phase_total(StatPhase::Write) as f64;
    assert!(reads + writes > 1000.0, "zero-latency backend should rack up ops");
    let ratio = reads / writes;
    // 30% reads -> reads/writes around 3/7.
    assert!(
        (0.38..=0.48).contains(&ratio),
        "reads/writes ratio {} outside the expected band",
        ratio
    );
    mgr.manager_close(true).unwrap();
}

#[test]
fn reads_invalidate_caches_once_per_pass() {
    let target = "phase-invalidate";
    let mut mgr = backend::MemoryConnection::new(target, &HashMap::new());
    mgr.manager_connect().unwrap();
    let store = backend::store_for(target).unwrap();

    let order = memory_order(target, 4);
    let (resp_tx, mut resp_rx) = tokio::sync::mpsc::unbounded_channel();
    let (sum_tx, mut sum_rx) = tokio::sync::mpsc::unbounded_channel();
    let mut handle = worker::spawn(0, order, 1024, resp_tx, sum_tx);

    handle.send(WorkerCommand::Op(Opcode::Connect));
    expect_ack(&mut resp_rx, Opcode::Connect);
    handle.send(WorkerCommand::Op(Opcode::Prepare));
    expect_ack(&mut resp_rx, Opcode::Prepare);

    handle.send(WorkerCommand::Op(Opcode::ReadStart));
    expect_ack(&mut resp_rx, Opcode::ReadStart);
    std::thread::sleep(Duration::from_millis(300));
    handle.send(WorkerCommand::Op(Opcode::ReadStop));
    expect_ack(&mut resp_rx, Opcode::ReadStop);
    handle.send(WorkerCommand::Op(Opcode::Terminate));
    expect_ack(&mut resp_rx, Opcode::Terminate);
    handle.join();

    let mut totals = StatSummary::default();
    while let Ok(ws) = sum_rx.try_recv() {
        totals.merge(&ws.summary);
    }
    let reads = totals.phase_total(StatPhase::Read);
    let passes = store.invalidation_count();
    assert!(passes >= 2, "expected several passes, saw {}", passes);
    assert_eq!(
        passes,
        reads / 4,
        "exactly one invalidation per completed pass over 4 objects"
    );
    mgr.manager_close(true).unwrap();
}
