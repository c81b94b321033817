//! Bulk placement execution
//!
//! [`BulkPlacer`] opens the regions of a plan on every server concurrently
//! and waits for the whole batch. The outcome is three-way: the plan
//! completed (`Ok(true)`), it did not complete in time or some server
//! failed its opens (`Ok(false)`), or it was interrupted
//! (`Err(ExecuteError::Cancelled)`).

use crate::common::{RegionInfo, Result, ServerName};
use crate::coordinator::metadata::MetadataStore;
use crate::coordinator::placement::PlacementPlan;
use crate::coordinator::tracker::{PlacementStatus, RegionStates};
use async_trait::async_trait;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    #[error("placement was cancelled")]
    Cancelled,

    #[error("placement failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait PlacementExecutor: Send + Sync {
    /// Execute `plan`. `retain` tells the executor the plan keeps regions on
    /// their previous hosts where possible.
    async fn execute(&self, plan: &PlacementPlan, retain: bool) -> std::result::Result<bool, ExecuteError>;
}

/// The per-server open call
#[async_trait]
pub trait RegionOpener: Send + Sync {
    async fn open_regions(&self, server: &ServerName, regions: &[RegionInfo]) -> Result<()>;
}

/// Resolves once `true` is published on the shutdown channel. Never resolves
/// if the sender is gone.
async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

pub struct BulkPlacer {
    opener: Arc<dyn RegionOpener>,
    tracker: Arc<RegionStates>,
    timeout: Duration,
    shutdown: watch::Receiver<bool>,
}

impl BulkPlacer {
    pub fn new(
        opener: Arc<dyn RegionOpener>,
        tracker: Arc<RegionStates>,
        timeout: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            opener,
            tracker,
            timeout,
            shutdown,
        }
    }

    async fn open_on(&self, server: &ServerName, regions: &[RegionInfo], retain: bool) -> bool {
        match self.opener.open_regions(server, regions).await {
            Ok(()) => {
                for region in regions {
                    self.tracker.mark_placed(region, server);
                }
                true
            }
            Err(e) => {
                tracing::warn!(
                    "Failed opening {} region(s) on {} (retain={}): {}",
                    regions.len(),
                    server,
                    retain,
                    e
                );
                for region in regions {
                    self.tracker.mark_unplaced(region);
                }
                false
            }
        }
    }

    /// Opens still in flight when the batch is abandoned never complete, so
    /// their regions go back to unplaced for the next attempt.
    fn abandon(&self, plan: &PlacementPlan) -> usize {
        let mut reverted = 0;
        for regions in plan.values() {
            for region in regions {
                let pending = self
                    .tracker
                    .region_state(region)
                    .is_some_and(|s| s.status == PlacementStatus::Pending);
                if pending {
                    self.tracker.mark_unplaced(region);
                    reverted += 1;
                }
            }
        }
        reverted
    }
}

#[async_trait]
impl PlacementExecutor for BulkPlacer {
    async fn execute(&self, plan: &PlacementPlan, retain: bool) -> std::result::Result<bool, ExecuteError> {
        let stopped = *self.shutdown.borrow();
        if stopped {
            return Err(ExecuteError::Cancelled);
        }

        let total: usize = plan.values().map(|r| r.len()).sum();
        for (server, regions) in plan {
            for region in regions {
                self.tracker.mark_pending(region, server);
            }
        }

        let opens = join_all(
            plan.iter()
                .map(|(server, regions)| self.open_on(server, regions, retain)),
        );

        tokio::select! {
            results = opens => {
                let failed = results.iter().filter(|ok| !**ok).count();
                if failed > 0 {
                    tracing::warn!(
                        "Bulk placement of {} region(s): {} of {} server(s) failed",
                        total,
                        failed,
                        plan.len()
                    );
                }
                Ok(failed == 0)
            }
            _ = tokio::time::sleep(self.timeout) => {
                let reverted = self.abandon(plan);
                tracing::warn!(
                    "Bulk placement of {} region(s) did not finish within {:?}; {} left unplaced",
                    total,
                    self.timeout,
                    reverted
                );
                Ok(false)
            }
            _ = shutdown_requested(self.shutdown.clone()) => {
                let reverted = self.abandon(plan);
                tracing::warn!("Bulk placement interrupted; {} region(s) left unplaced", reverted);
                Err(ExecuteError::Cancelled)
            }
        }
    }
}

/// Opener for an in-process cluster: an open is recorded in the catalog.
pub struct CatalogRegionOpener {
    store: Arc<MetadataStore>,
}

impl CatalogRegionOpener {
    pub fn new(store: Arc<MetadataStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RegionOpener for CatalogRegionOpener {
    async fn open_regions(&self, server: &ServerName, regions: &[RegionInfo]) -> Result<()> {
        for region in regions {
            self.store.update_region_location(region, server)?;
        }
        tracing::debug!("Recorded {} region(s) on {}", regions.len(), server);
        Ok(())
    }
}
