//! Coordinator process wiring

use crate::common::{Config, Error, LockBackend, Result, TableState};
use crate::coordinator::bulk::{BulkPlacer, CatalogRegionOpener};
use crate::coordinator::hooks::{AuditHook, HookChain};
use crate::coordinator::lifecycle::{Collaborators, EnableOutcome, LifecycleCoordinator};
use crate::coordinator::lock::{DistributedLock, DurableTableLocks, LocalTableLocks};
use crate::coordinator::membership::{start_reaper, ClusterMembership, RegistryMembership};
use crate::coordinator::metadata::MetadataStore;
use crate::coordinator::placement::RetainPlanner;
use crate::coordinator::runner::{EnableTableTask, TaskRunner};
use crate::coordinator::tracker::RegionStates;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub struct Coordinator {
    config: Config,
    store: Arc<MetadataStore>,
    tracker: Arc<RegionStates>,
    lifecycle: LifecycleCoordinator,
    shutdown: watch::Sender<bool>,
}

impl Coordinator {
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;
        tracing::info!("Starting coordinator: {}", config.node_id);
        tracing::info!("  Data dir: {}", config.data_dir.display());
        tracing::info!("  Lock backend: {:?}", config.lock.backend);

        let store = Arc::new(MetadataStore::open(config.data_dir.join("meta"))?);
        let tracker = Arc::new(RegionStates::new());
        let placed = rebuild_tracker(&store, &tracker).await?;
        tracing::info!("  Regions placed on live servers: {}", placed);

        let locks: Arc<dyn DistributedLock> = match config.lock.backend {
            LockBackend::Local => Arc::new(LocalTableLocks::new()),
            LockBackend::Durable => Arc::new(DurableTableLocks::new(store.clone(), &config.lock)),
        };

        let membership = Arc::new(RegistryMembership::new(
            store.clone(),
            tracker.clone(),
            config.placement.server_timeout_secs(),
        ));

        let (shutdown, shutdown_rx) = watch::channel(false);
        start_reaper(
            membership.clone(),
            config.placement.reap_interval(),
            shutdown_rx.clone(),
        );
        let executor = BulkPlacer::new(
            Arc::new(CatalogRegionOpener::new(store.clone())),
            tracker.clone(),
            config.placement.bulk_timeout(),
            shutdown_rx,
        );

        let mut hooks = HookChain::new();
        if let Some(path) = &config.audit_log {
            hooks = hooks.with(Arc::new(AuditHook::open(path, config.node_id.clone())?));
            tracing::info!("  Audit log: {}", path.display());
        }

        let ctx = Collaborators {
            states: store.clone(),
            locks,
            catalog: store.clone(),
            tracker: tracker.clone(),
            membership,
            planner: Arc::new(RetainPlanner::new()),
            executor: Arc::new(executor),
            hooks: Arc::new(hooks),
        };
        let span = tracing::info_span!("coordinator", node = %config.node_id);
        let lifecycle = LifecycleCoordinator::new(ctx, span);

        Ok(Self {
            config,
            store,
            tracker,
            lifecycle,
            shutdown,
        })
    }

    pub fn lifecycle(&self) -> &LifecycleCoordinator {
        &self.lifecycle
    }

    pub fn store(&self) -> &Arc<MetadataStore> {
        &self.store
    }

    pub fn tracker(&self) -> &Arc<RegionStates> {
        &self.tracker
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn start_runner(&self) -> TaskRunner {
        TaskRunner::start(self.lifecycle.clone(), &self.config.runner)
    }

    /// Run one enable on a fresh runner and wait for it.
    ///
    /// `deadline` covers the lock wait as well as placement. If it expires, or
    /// `interrupt` completes first, in-flight placement is cancelled and this
    /// coordinator places nothing afterwards.
    pub async fn enable_within<F>(
        &self,
        task: EnableTableTask,
        deadline: Option<Duration>,
        interrupt: F,
    ) -> Result<EnableOutcome>
    where
        F: Future<Output = ()>,
    {
        let table = task.table.clone();
        let runner = self.start_runner();
        let work = async {
            let handle = runner.submit_enable(task).await?;
            handle.outcome().await
        };

        let finished = tokio::select! {
            result = async {
                match deadline {
                    Some(after) => tokio::time::timeout(after, work)
                        .await
                        .map_err(|_| Error::DeadlineExceeded { table: table.clone(), after }),
                    None => Ok(work.await),
                }
            } => result,
            _ = interrupt => Err(Error::Cancelled(table.clone())),
        };

        let outcome = match finished {
            Ok(outcome) => outcome,
            Err(e) => {
                // Stop placement before draining the workers
                tracing::warn!("{}; cancelling placement", e);
                self.cancel_placement();
                Err(e)
            }
        };
        runner.shutdown().await;
        outcome
    }

    fn cancel_placement(&self) {
        self.shutdown.send_replace(true);
    }

    /// Interrupt in-flight placements and flush metadata.
    pub fn shutdown(&self) -> Result<()> {
        self.cancel_placement();
        self.store.flush()?;
        tracing::info!("Coordinator {} stopped", self.config.node_id);
        Ok(())
    }
}

/// Placement state is not persisted; seed it from the catalog for tables
/// that are already enabled.
async fn rebuild_tracker(store: &MetadataStore, tracker: &RegionStates) -> Result<usize> {
    let live = store.live_servers().await?;
    let mut placed = 0;
    for (table, state) in store.list_table_states()? {
        if state != TableState::Enabled {
            continue;
        }
        let rows: Vec<_> = store
            .list_regions(&table)?
            .into_iter()
            .map(|r| (r.region, r.location))
            .collect();
        placed += tracker.rebuild(&rows, &live);
    }
    Ok(placed)
}
