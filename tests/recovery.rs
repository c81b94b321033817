//! Recovery-mode enables and durable state across restarts

mod common;

use async_trait::async_trait;
use common::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tablekeeper::common::{Config, LockBackend, NodeState, RegionInfo, ServerName, TableState};
use tablekeeper::coordinator::{
    BulkPlacer, CatalogRegionOpener, Collaborators, Coordinator, LifecycleCoordinator,
    LocalTableLocks, MetadataStore, NoopHooks, PlacementStatus, PlacementTracker, RegionOpener,
    RegionStates,
};
use tablekeeper::{EnableMode, EnableOutcome, Error};
use tempfile::TempDir;
use tokio::sync::watch;

#[tokio::test]
async fn test_recovery_on_missing_table_clears_marker() {
    let h = Harness::new();
    let t = table("T3");
    h.states.put(&t, TableState::Enabling);

    let err = h.coordinator().enable(&t, EnableMode::Recovery).await.unwrap_err();

    assert!(matches!(err, Error::TableNotFound(_)));
    assert_eq!(h.states.remove_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.states.state(&t), None);
    assert_eq!(h.locks.total_held(), 0);
}

#[tokio::test]
async fn test_recovery_on_missing_table_when_cleanup_fails() {
    let h = Harness::new();
    let t = table("T3");
    h.states.put(&t, TableState::Enabling);
    h.states.fail_remove.store(true, Ordering::SeqCst);

    let err = h.coordinator().enable(&t, EnableMode::Recovery).await.unwrap_err();

    // Cleanup failure is logged, not returned
    assert!(matches!(err, Error::TableNotFound(_)));
    assert_eq!(h.states.remove_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.states.state(&t), Some(TableState::Enabling));
    assert_eq!(h.locks.total_held(), 0);
}

#[tokio::test]
async fn test_recovery_keeps_other_states_of_missing_table() {
    let h = Harness::new();
    let t = table("gone");
    h.states.put(&t, TableState::Disabled);

    let err = h.coordinator().enable(&t, EnableMode::Recovery).await.unwrap_err();
    assert!(matches!(err, Error::TableNotFound(_)));
    assert_eq!(h.states.state(&t), Some(TableState::Disabled));
}

#[tokio::test]
async fn test_recovery_redrives_stuck_enable() {
    let h = Harness::new();
    let (t, _) = h.add_table("stuck", 3, TableState::Disabled);
    h.executor.answer(Script::Incomplete);

    let first = h.coordinator().enable(&t, EnableMode::Strict).await.unwrap();
    assert!(!first.is_enabled());
    assert_eq!(h.states.state(&t), Some(TableState::Enabling));

    // Strict mode refuses; recovery mode finishes the job
    let err = h.coordinator().enable(&t, EnableMode::Strict).await.unwrap_err();
    assert!(matches!(err, Error::TableNotDisabled { .. }));

    h.executor.answer(Script::Complete);
    let second = h.coordinator().enable(&t, EnableMode::Recovery).await.unwrap();
    assert_eq!(second, EnableOutcome::Enabled { regions_placed: 3 });
    assert_eq!(h.states.state(&t), Some(TableState::Enabled));
    assert_eq!(h.locks.total_held(), 0);
}

#[tokio::test]
async fn test_recovery_forces_enabling_from_any_state() {
    let h = Harness::new();
    let (t, _) = h.add_table("forced", 1, TableState::Disabling);
    h.executor.answer(Script::Cancel);

    let err = h.coordinator().enable(&t, EnableMode::Recovery).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled(_)));
    assert_eq!(h.states.state(&t), Some(TableState::Enabling));
}

fn durable_config(dir: &TempDir) -> Config {
    let mut config = Config {
        data_dir: dir.path().to_path_buf(),
        ..Config::default()
    };
    config.lock.backend = LockBackend::Durable;
    config.placement.bulk_timeout_ms = 2_000;
    config
}

#[tokio::test]
async fn test_enabling_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let t = table("orders");
    let region = RegionInfo::new(t.clone(), b"", b"", 1);

    {
        let coord = Coordinator::open(durable_config(&dir)).await.unwrap();
        coord.store().create_table(&t, &[region.clone()]).unwrap();
        // No live servers: placement cannot be planned
        let err = coord.lifecycle().enable(&t, EnableMode::Strict).await.unwrap_err();
        assert!(matches!(err, Error::Execution(_)));
        coord.shutdown().unwrap();
    }

    let coord = Coordinator::open(durable_config(&dir)).await.unwrap();
    assert_eq!(
        coord.store().get_table_state(&t).unwrap(),
        Some(TableState::Enabling)
    );
    // The lease was released on the error path
    assert!(coord.store().get_lock(&t).unwrap().is_none());

    coord
        .store()
        .register_server(&ServerName::new("rs-a", 16020, 7), NodeState::Alive)
        .unwrap();
    let outcome = coord.lifecycle().enable(&t, EnableMode::Recovery).await.unwrap();
    assert_eq!(outcome, EnableOutcome::Enabled { regions_placed: 1 });
    assert_eq!(coord.tracker().status(&region), PlacementStatus::Placed);
    coord.shutdown().unwrap();
}

#[tokio::test]
async fn test_shutdown_cancels_inflight_enable() {
    let dir = tempfile::tempdir().unwrap();
    let coord = Coordinator::open(durable_config(&dir)).await.unwrap();
    let t = table("orders");
    coord
        .store()
        .create_table(&t, &[RegionInfo::new(t.clone(), b"", b"", 1)])
        .unwrap();
    coord
        .store()
        .register_server(&ServerName::new("rs-a", 16020, 1), NodeState::Alive)
        .unwrap();

    coord.shutdown().unwrap();
    let err = coord.lifecycle().enable(&t, EnableMode::Strict).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled(_)));
    assert_eq!(
        coord.store().get_table_state(&t).unwrap(),
        Some(TableState::Enabling)
    );
    assert!(coord.store().get_lock(&t).unwrap().is_none());
}

/// Hangs on the first open, then records opens in the catalog
struct StallsOnce {
    inner: CatalogRegionOpener,
    calls: AtomicUsize,
}

#[async_trait]
impl RegionOpener for StallsOnce {
    async fn open_regions(&self, server: &ServerName, regions: &[RegionInfo]) -> tablekeeper::Result<()> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.inner.open_regions(server, regions).await
    }
}

#[tokio::test]
async fn test_recovery_after_placement_timeout_places_region() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MetadataStore::open(dir.path().join("meta")).unwrap());
    let t = table("slow_open");
    let region = RegionInfo::new(t.clone(), b"", b"", 1);
    store.create_table(&t, &[region.clone()]).unwrap();
    let rs = ServerName::new("rs-a", 16020, 1);
    store.register_server(&rs, NodeState::Alive).unwrap();

    let tracker = Arc::new(RegionStates::new());
    let planner = Arc::new(RecordingPlanner::default());
    let (_shutdown, shutdown_rx) = watch::channel(false);
    let opener = StallsOnce {
        inner: CatalogRegionOpener::new(store.clone()),
        calls: AtomicUsize::new(0),
    };
    let ctx = Collaborators {
        states: store.clone(),
        locks: Arc::new(LocalTableLocks::new()),
        catalog: store.clone(),
        tracker: tracker.clone(),
        membership: store.clone(),
        planner: planner.clone(),
        executor: Arc::new(BulkPlacer::new(
            Arc::new(opener),
            tracker.clone(),
            Duration::from_millis(20),
            shutdown_rx,
        )),
        hooks: Arc::new(NoopHooks),
    };
    let coord = LifecycleCoordinator::new(ctx, tracing::Span::none());

    let first = coord.enable(&t, EnableMode::Strict).await.unwrap();
    assert_eq!(first, EnableOutcome::Incomplete { regions_requested: 1 });
    assert_eq!(tracker.status(&region), PlacementStatus::Unplaced);
    assert_eq!(store.get_table_state(&t).unwrap(), Some(TableState::Enabling));

    let second = coord.enable(&t, EnableMode::Recovery).await.unwrap();
    assert_eq!(second, EnableOutcome::Enabled { regions_placed: 1 });

    let requested = planner.requested.lock().unwrap().clone();
    assert_eq!(requested.len(), 2);
    assert!(requested[1].contains_key(&region));
    assert_eq!(store.list_regions(&t).unwrap()[0].location, Some(rs));
    assert_eq!(tracker.status(&region), PlacementStatus::Placed);
}
