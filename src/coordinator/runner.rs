//! Task runner for lifecycle requests
//!
//! Requests are plain [`EnableTableTask`] values. Submitting one runs the
//! prepare phase in the caller's task, so a missing or not-disabled table is
//! reported immediately, and queues the placement phase for a worker.

use crate::common::{Result, RunnerConfig, TableName};
use crate::coordinator::lifecycle::{EnableMode, EnableOutcome, LifecycleCoordinator, PreparedEnable};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnableTableTask {
    pub table: TableName,
    pub mode: EnableMode,
}

impl EnableTableTask {
    pub fn new(table: TableName) -> Self {
        Self {
            table,
            mode: EnableMode::Strict,
        }
    }

    pub fn recovery(table: TableName) -> Self {
        Self {
            table,
            mode: EnableMode::Recovery,
        }
    }
}

struct Job {
    prepared: PreparedEnable,
    reply: oneshot::Sender<Result<EnableOutcome>>,
}

/// Handle on a queued enable
#[derive(Debug)]
pub struct TaskHandle {
    table: TableName,
    rx: oneshot::Receiver<Result<EnableOutcome>>,
}

impl TaskHandle {
    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// Wait for the placement phase to finish
    pub async fn outcome(self) -> Result<EnableOutcome> {
        self.rx.await.map_err(|_| {
            crate::Error::Internal(format!("enable of {} was dropped by the runner", self.table))
        })?
    }
}

pub struct TaskRunner {
    coordinator: LifecycleCoordinator,
    tx: mpsc::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl TaskRunner {
    pub fn start(coordinator: LifecycleCoordinator, config: &RunnerConfig) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(config.queue_depth.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..config.workers.max(1))
            .map(|id| {
                let rx = rx.clone();
                tokio::spawn(async move {
                    loop {
                        // Hold the receiver only while waiting for the next job
                        let job = { rx.lock().await.recv().await };
                        let Some(job) = job else { break };
                        let table = job.prepared.table().clone();
                        tracing::debug!("Worker {} processing enable of {}", id, table);
                        let outcome = job.prepared.process().await;
                        if job.reply.send(outcome).is_err() {
                            tracing::debug!("Caller stopped waiting for enable of {}", table);
                        }
                    }
                    tracing::debug!("Worker {} stopped", id);
                })
            })
            .collect();

        Self {
            coordinator,
            tx,
            workers,
        }
    }

    /// Validate `task` and queue its placement phase.
    ///
    /// Precondition failures (`TableNotFound`, `TableNotDisabled`) and lock
    /// or state store faults are returned here; everything after is
    /// reported through the handle.
    pub async fn submit_enable(&self, task: EnableTableTask) -> Result<TaskHandle> {
        let prepared = self.coordinator.prepare_enable(&task.table, task.mode).await?;
        let (reply, rx) = oneshot::channel();

        // A failed send drops the job, and with it the table lock
        self.tx
            .send(Job { prepared, reply })
            .await
            .map_err(|_| crate::Error::Internal("task runner is shut down".into()))?;

        Ok(TaskHandle {
            table: task.table,
            rx,
        })
    }

    /// Stop accepting work, let queued jobs finish, and wait for workers.
    pub async fn shutdown(self) {
        drop(self.tx);
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::error!("Runner worker panicked: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{NodeState, RegionInfo, ServerName, TableState};
    use crate::coordinator::bulk::{BulkPlacer, CatalogRegionOpener};
    use crate::coordinator::hooks::NoopHooks;
    use crate::coordinator::lifecycle::Collaborators;
    use crate::coordinator::lock::LocalTableLocks;
    use crate::coordinator::metadata::MetadataStore;
    use crate::coordinator::placement::RetainPlanner;
    use crate::coordinator::tracker::RegionStates;
    use std::time::Duration;
    use tokio::sync::watch;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<MetadataStore>,
        locks: Arc<LocalTableLocks>,
        _shutdown: watch::Sender<bool>,
        coordinator: LifecycleCoordinator,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MetadataStore::open(dir.path().join("meta")).unwrap());
        let locks = Arc::new(LocalTableLocks::new());
        let tracker = Arc::new(RegionStates::new());
        let (tx, rx) = watch::channel(false);
        let executor = BulkPlacer::new(
            Arc::new(CatalogRegionOpener::new(store.clone())),
            tracker.clone(),
            Duration::from_secs(5),
            rx,
        );
        let ctx = Collaborators {
            states: store.clone(),
            locks: locks.clone(),
            catalog: store.clone(),
            tracker,
            membership: store.clone(),
            planner: Arc::new(RetainPlanner::new()),
            executor: Arc::new(executor),
            hooks: Arc::new(NoopHooks),
        };
        store
            .register_server(&ServerName::new("rs-a", 16020, 1), NodeState::Alive)
            .unwrap();
        Fixture {
            _dir: dir,
            store,
            locks,
            _shutdown: tx,
            coordinator: LifecycleCoordinator::new(ctx, tracing::Span::none()),
        }
    }

    fn create(store: &MetadataStore, name: &str) -> TableName {
        let t = TableName::new(name).unwrap();
        store
            .create_table(&t, &[RegionInfo::new(t.clone(), b"", b"", 1)])
            .unwrap();
        t
    }

    #[tokio::test]
    async fn test_submit_and_wait() {
        let f = fixture();
        let runner = TaskRunner::start(f.coordinator.clone(), &RunnerConfig::default());
        let t = create(&f.store, "orders");

        let handle = runner.submit_enable(EnableTableTask::new(t.clone())).await.unwrap();
        assert_eq!(handle.table(), &t);
        let outcome = handle.outcome().await.unwrap();
        assert!(outcome.is_enabled());
        assert_eq!(f.store.get_table_state(&t).unwrap(), Some(TableState::Enabled));
        assert_eq!(f.locks.total_held(), 0);

        runner.shutdown().await;
    }

    #[tokio::test]
    async fn test_precondition_failure_is_reported_on_submit() {
        let f = fixture();
        let runner = TaskRunner::start(f.coordinator.clone(), &RunnerConfig::default());

        let missing = TableName::new("missing").unwrap();
        let err = runner.submit_enable(EnableTableTask::new(missing)).await.unwrap_err();
        assert!(matches!(err, crate::Error::TableNotFound(_)));

        let t = create(&f.store, "orders");
        f.store.put_table_state(&t, TableState::Enabled).unwrap();
        let err = runner.submit_enable(EnableTableTask::new(t)).await.unwrap_err();
        assert!(matches!(err, crate::Error::TableNotDisabled { .. }));
        assert_eq!(f.locks.total_held(), 0);

        runner.shutdown().await;
    }

    #[tokio::test]
    async fn test_recovery_task_redrives_enabling_table() {
        let f = fixture();
        let runner = TaskRunner::start(f.coordinator.clone(), &RunnerConfig::default());
        let t = create(&f.store, "orders");
        f.store.put_table_state(&t, TableState::Enabling).unwrap();

        let handle = runner.submit_enable(EnableTableTask::recovery(t.clone())).await.unwrap();
        assert!(handle.outcome().await.unwrap().is_enabled());

        runner.shutdown().await;
    }

    #[tokio::test]
    async fn test_many_tables_one_worker() {
        let f = fixture();
        let config = RunnerConfig {
            workers: 1,
            queue_depth: 2,
        };
        let runner = TaskRunner::start(f.coordinator.clone(), &config);

        let mut handles = Vec::new();
        for i in 0..5 {
            let t = create(&f.store, &format!("t{}", i));
            handles.push(runner.submit_enable(EnableTableTask::new(t)).await.unwrap());
        }
        for handle in handles {
            assert!(handle.outcome().await.unwrap().is_enabled());
        }
        assert_eq!(f.locks.total_held(), 0);

        runner.shutdown().await;
    }
}
