//! Integration tests: a real manager driving real foremen over loopback TCP
//! against the in-memory backend.

mod common;

use common::cluster;

use sbench_core::backend::{self, Connection as _};
use sbench_core::foreman::ForemanConfig;
use sbench_core::manager;
use sbench_core::stats::{StatError, StatPhase};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Pre-create the memory store. The job's own manager connection then joins
/// an existing store, so its cleanup leaves the registry entry (and our
/// handle) alive for post-run assertions.
fn precreate_store(target: &str) -> std::sync::Arc<backend::MemStore> {
    let mut conn = backend::MemoryConnection::new(target, &HashMap::new());
    conn.manager_connect().unwrap();
    backend::store_for(target).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_worker_sanity() {
    let target = "e2e-sanity";
    let store = precreate_store(target);
    let fleet = cluster::start_foremen(1, ForemanConfig::default());

    let mut order = cluster::memory_order(target, 4, 1024);
    // Tiny factor clamps the foreman to a single worker.
    order.worker_factor = 0.001;

    let dir = tempfile::tempdir().unwrap();
    let report_path = dir.path().join("report.json");
    let mut spec = cluster::job_spec(&fleet, order);
    spec.output = Some(report_path.clone());

    let outcome = manager::run_job(spec).await.expect("job runs");

    assert_eq!(outcome.totals.error_total(), 0, "no failures expected");
    assert_eq!(
        outcome.totals.get(StatPhase::Prepare, StatError::None),
        4,
        "prepare touches each object exactly once"
    );
    assert!(outcome.totals.get(StatPhase::Write, StatError::None) >= 4);
    assert!(outcome.totals.get(StatPhase::Read, StatError::None) >= 4);
    assert_eq!(store.object_count(), 4, "all four objects written");
    let mut ids = store.object_ids();
    ids.sort_unstable();
    assert_eq!(ids, vec![0, 1, 2, 3]);

    // The report mirrors the collected details and each phase's stat times
    // are monotonic (one worker, so file order is recording order).
    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    let stats = report["Stats"].as_array().unwrap();
    assert_eq!(stats.len() as u64, outcome.stats_collected);
    let mut last_per_phase: HashMap<&str, u64> = HashMap::new();
    for stat in stats {
        let phase = stat["phase"].as_str().unwrap();
        let t = stat["time_since_phase_start_ms"].as_u64().unwrap();
        let last = last_per_phase.entry(phase).or_insert(0);
        assert!(t >= *last, "{} stats must be time-ordered", phase);
        *last = t;
    }
    assert!(report["Analyses"].as_array().unwrap().len() >= 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn partitioning_covers_every_object_exactly() {
    let target = "e2e-partition";
    let store = precreate_store(target);
    let fleet = cluster::start_foremen(3, ForemanConfig::default());

    let order = cluster::memory_order(target, 1000, 64);
    let spec = cluster::job_spec(&fleet, order);
    let outcome = manager::run_job(spec).await.expect("job runs");

    assert_eq!(outcome.totals.error_total(), 0);
    assert_eq!(store.object_count(), 1000, "no gaps and no overlaps");
    let mut ids = store.object_ids();
    ids.sort_unstable();
    assert_eq!(ids, (0..1000).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn delete_phase_empties_the_store() {
    let target = "e2e-clean";
    let store = precreate_store(target);
    let fleet = cluster::start_foremen(1, ForemanConfig::default());

    let order = cluster::memory_order(target, 16, 256);
    let mut spec = cluster::job_spec(&fleet, order);
    spec.cleanup = true;

    let outcome = manager::run_job(spec).await.expect("job runs");
    assert_eq!(store.object_count(), 0, "clean sweeps the whole range");
    assert_eq!(
        outcome.totals.get(StatPhase::Clean, StatError::None),
        16,
        "one delete per object"
    );
    assert!(
        store.invalidation_count() > 0,
        "read wraps invalidate caches"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hung_worker_is_reported_quickly_and_fails_the_job() {
    let target = "e2e-hang";
    let _store = precreate_store(target);

    let mut config = ForemanConfig::default();
    config.hang_timeout = Duration::from_secs(2);
    let fleet = cluster::start_foremen(1, config);

    let mut order = cluster::memory_order(target, 8, 256);
    order.worker_factor = 0.001;
    // Every put blocks far past the liveness budget.
    order
        .protocol_config
        .insert("put_delay_ms".into(), "5000".into());

    let spec = cluster::job_spec(&fleet, order);
    let started = Instant::now();
    let err = manager::run_job(spec).await.expect_err("job must fail");
    let elapsed = started.elapsed();

    let message = format!("{:#}", err);
    assert!(message.contains("Hung"), "got: {}", message);
    // 2 s budget + 1 s check cadence + session setup, well before the 5 s
    // the stuck put would take.
    assert!(
        elapsed < Duration::from_millis(4500),
        "hang must surface within the budget plus slack, took {:?}",
        elapsed
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn file_backend_job_writes_real_files() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("objects");
    let fleet = cluster::start_foremen(1, ForemanConfig::default());

    let mut order = cluster::memory_order(target.to_str().unwrap(), 8, 512);
    order.connection_kind = "file".into();

    let spec = cluster::job_spec(&fleet, order);
    let outcome = manager::run_job(spec).await.expect("job runs");

    assert_eq!(outcome.totals.error_total(), 0);
    let files = std::fs::read_dir(&target).unwrap().count();
    assert_eq!(files, 8, "one file per object");
    for id in 0..8 {
        let path = target.join(format!("sbench-{}", id));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 512);
    }
}
