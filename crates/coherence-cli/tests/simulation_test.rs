//! End-to-end simulation runs

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use coherence_cli::{SimConfig, SimError, simulation};
use pretty_assertions::assert_eq;

fn small(workers: usize, updates_per_worker: usize) -> SimConfig {
    SimConfig {
        workers,
        updates_per_worker,
        timeout_ms: 10_000,
        backoff_min_ms: 1,
        backoff_max_ms: 5,
        ..SimConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_fleet_loses_no_updates() {
    let report = simulation::run(&small(4, 5)).await.unwrap();

    assert_eq!(report.expected_count, 20);
    assert_eq!(report.timed_out, 0);
    assert_eq!(report.final_count, 20);
    assert_eq!(report.lost_updates, 0);
    assert_eq!(report.notifications, 20);
    assert_eq!(report.markers_written, 20);
}

#[tokio::test]
async fn single_worker_sees_its_own_invalidations() {
    let report = simulation::run(&small(1, 3)).await.unwrap();

    assert_eq!(report.final_count, 3);
    // every update invalidates the session marker it just served
    assert_eq!(report.stale_reads, 3);
    assert_eq!(report.background.failed, 0);
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let err = simulation::run(&small(0, 1)).await.unwrap_err();
    assert!(matches!(err, SimError::InvalidConfig { field: "workers", .. }));
}
