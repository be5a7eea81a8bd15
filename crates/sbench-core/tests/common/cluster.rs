//! In-process benchmark cluster for integration tests.
//!
//! Starts foreman daemons on ephemeral loopback ports, each in its own
//! thread with its own runtime, and builds job specs against them. The
//! memory backend makes the whole fleet share one process-global object
//! store, so tests can inspect exactly what a run did.

use std::collections::HashMap;
use std::time::Duration;

use sbench_core::foreman::{Foreman, ForemanConfig};
use sbench_core::manager::{JobSpec, PhaseWindows};
use sbench_core::workorder::WorkOrder;

pub struct Cluster {
    pub servers: Vec<String>,
}

/// Start `n` foremen with the given template config (port is overridden with
/// an ephemeral one, and a hang never kills the test process). The daemons
/// run until the process exits.
pub fn start_foremen(n: usize, template: ForemanConfig) -> Cluster {
    let mut servers = Vec::with_capacity(n);
    for _ in 0..n {
        let mut config = template.clone();
        config.port = 0;
        config.exit_on_hang = false;
        let foreman = Foreman::bind(config).expect("bind foreman");
        servers.push(format!("127.0.0.1:{}", foreman.local_port()));
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Runtime::new().expect("foreman runtime");
            if let Err(e) = runtime.block_on(foreman.run()) {
                eprintln!("foreman exited: {:#}", e);
            }
        });
    }
    Cluster { servers }
}

pub fn memory_order(target: &str, count: u64, object_size: u64) -> WorkOrder {
    WorkOrder {
        job_id: 1,
        object_size,
        bandwidth: 0,
        worker_factor: 1.0,
        skip_read_validation: false,
        read_write_mix: 0,
        range_start: 0,
        range_end: count,
        seed: 0xbe9c4,
        generator_kind: "prng".into(),
        generator_config: HashMap::new(),
        connection_kind: "memory".into(),
        targets: vec![target.to_string()],
        protocol_config: HashMap::new(),
        object_key_prefix: "sbench".into(),
        server_index: 0,
    }
}

/// Short phase windows so an end-to-end run stays in CI budgets.
pub fn quick_windows() -> PhaseWindows {
    PhaseWindows {
        ramp_up: Duration::from_millis(200),
        run_time: Duration::from_millis(600),
        ramp_down: Duration::from_millis(200),
    }
}

pub fn job_spec(cluster: &Cluster, order: WorkOrder) -> JobSpec {
    JobSpec {
        servers: cluster.servers.clone(),
        port: 0,
        order,
        windows: quick_windows(),
        cleanup: false,
        output: None,
    }
}
