//! Table lifecycle coordinator
//!
//! Enabling a table runs in two phases that share one table lock:
//!
//! ```text
//! prepare_enable:  acquire lock ─► table exists? ─► DISABLED → ENABLING
//!                         │              │                  │
//!                         │         TableNotFound    TableNotDisabled
//! process:         unplaced regions ─► pre hook ─► plan ─► execute
//!                         │                                   │
//!                  (none: skip plan)              true / false / cancelled
//!                                                             │
//!                  ENABLING → ENABLED ─► post hook ─► release lock
//! ```
//!
//! The lock is released on every path out of either phase. A table left in
//! ENABLING (incomplete placement, fault, crash) stays there until an
//! enable in recovery mode re-drives it; nothing is rolled back.

use crate::common::{Error, Result, ServerName, TableName, TableState};
use crate::coordinator::bulk::{ExecuteError, PlacementExecutor};
use crate::coordinator::catalog::PartitionCatalog;
use crate::coordinator::hooks::ExtensionHooks;
use crate::coordinator::lock::{lock_table, DistributedLock, TableLockGuard};
use crate::coordinator::membership::ClusterMembership;
use crate::coordinator::placement::PlacementPlanner;
use crate::coordinator::table_state::TableStateStore;
use crate::coordinator::tracker::{compute_unplaced, PlacementTracker};
use std::sync::Arc;
use tracing::{Instrument, Span};

const ENABLE_PURPOSE: &str = "enable_table";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnableMode {
    /// Table must be DISABLED
    Strict,
    /// Re-drive an interrupted enable: skip the state check and force
    /// ENABLING
    Recovery,
}

impl EnableMode {
    pub fn is_recovery(&self) -> bool {
        matches!(self, EnableMode::Recovery)
    }
}

/// Successful result of an enable. Failures are [`Error`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnableOutcome {
    /// Table is ENABLED
    Enabled { regions_placed: usize },
    /// Placement did not complete; the table stays ENABLING
    Incomplete { regions_requested: usize },
}

impl EnableOutcome {
    pub fn is_enabled(&self) -> bool {
        matches!(self, EnableOutcome::Enabled { .. })
    }
}

/// Where an enable got to, for logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnablePhase {
    Init,
    Locked,
    Validated,
    Placing,
    Done,
    Aborted,
}

impl std::fmt::Display for EnablePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EnablePhase::Init => "init",
            EnablePhase::Locked => "locked",
            EnablePhase::Validated => "validated",
            EnablePhase::Placing => "placing",
            EnablePhase::Done => "done",
            EnablePhase::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Everything the coordinator talks to
#[derive(Clone)]
pub struct Collaborators {
    pub states: Arc<dyn TableStateStore>,
    pub locks: Arc<dyn DistributedLock>,
    pub catalog: Arc<dyn PartitionCatalog>,
    pub tracker: Arc<dyn PlacementTracker>,
    pub membership: Arc<dyn ClusterMembership>,
    pub planner: Arc<dyn PlacementPlanner>,
    pub executor: Arc<dyn PlacementExecutor>,
    pub hooks: Arc<dyn ExtensionHooks>,
}

#[derive(Clone)]
pub struct LifecycleCoordinator {
    ctx: Collaborators,
    /// Parent of every operation span this coordinator opens
    span: Span,
}

impl LifecycleCoordinator {
    pub fn new(ctx: Collaborators, span: Span) -> Self {
        Self { ctx, span }
    }

    /// Enable `table`: [`prepare_enable`](Self::prepare_enable) followed by
    /// [`PreparedEnable::process`].
    pub async fn enable(&self, table: &TableName, mode: EnableMode) -> Result<EnableOutcome> {
        self.prepare_enable(table, mode).await?.process().await
    }

    /// Lock the table and check the request is acceptable. On success the
    /// returned value owns the lock; on failure the lock is already
    /// released.
    pub async fn prepare_enable(&self, table: &TableName, mode: EnableMode) -> Result<PreparedEnable> {
        let span = tracing::info_span!(
            parent: &self.span,
            "enable_table",
            table = %table,
            recovery = mode.is_recovery()
        );

        async {
            let guard = lock_table(self.ctx.locks.clone(), table, ENABLE_PURPOSE)
                .await
                .map_err(|e| Error::coordination("acquire table lock", e))?;

            // Dropping the guard on any error below releases the lock
            self.validate(table, mode).await?;

            Ok::<_, Error>(PreparedEnable {
                coordinator: self.clone(),
                table: table.clone(),
                mode,
                guard,
                phase: EnablePhase::Validated,
                span: Span::current(),
            })
        }
        .instrument(span)
        .await
    }

    async fn validate(&self, table: &TableName, mode: EnableMode) -> Result<()> {
        let exists = self
            .ctx
            .catalog
            .table_exists(table)
            .await
            .map_err(|e| Error::coordination("read catalog", e))?;

        if !exists {
            if mode.is_recovery() {
                self.clear_stale_enabling(table).await;
            }
            return Err(Error::TableNotFound(table.clone()));
        }

        match mode {
            EnableMode::Strict => {
                let swapped = self
                    .ctx
                    .states
                    .compare_and_set(table, TableState::Disabled, TableState::Enabling)
                    .await
                    .map_err(|e| Error::coordination("set table enabling", e))?;
                if !swapped {
                    let state = self.ctx.states.get(table).await.ok().flatten();
                    tracing::info!("Table {} isn't disabled; skipping enable", table);
                    return Err(Error::TableNotDisabled {
                        table: table.clone(),
                        state,
                    });
                }
            }
            EnableMode::Recovery => {
                self.ctx
                    .states
                    .set(table, TableState::Enabling)
                    .await
                    .map_err(|e| Error::coordination("set table enabling", e))?;
            }
        }
        Ok(())
    }

    /// Best effort: a failure leaves the marker for an operator to remove.
    async fn clear_stale_enabling(&self, table: &TableName) {
        match self.ctx.states.remove_if(table, TableState::Enabling).await {
            Ok(true) => tracing::info!("Removed stale ENABLING marker of missing table {}", table),
            Ok(false) => {}
            Err(e) => tracing::warn!(
                "Failed to delete the ENABLING marker for table {}: {}. \
                 The table will remain unusable until the marker is removed by hand",
                table,
                e
            ),
        }
    }
}

/// A validated enable that owns the table lock.
///
/// Dropping it without calling [`process`](Self::process) releases the lock
/// and leaves the table ENABLING.
#[derive(Debug)]
pub struct PreparedEnable {
    coordinator: LifecycleCoordinator,
    table: TableName,
    mode: EnableMode,
    guard: TableLockGuard,
    phase: EnablePhase,
    span: Span,
}

impl PreparedEnable {
    pub fn table(&self) -> &TableName {
        &self.table
    }

    pub fn mode(&self) -> EnableMode {
        self.mode
    }

    pub fn phase(&self) -> EnablePhase {
        self.phase
    }

    /// Place the table's unplaced regions and flip it to ENABLED.
    ///
    /// The pre-enable hook runs even when every region is already placed;
    /// only planning and placement are skipped then.
    pub async fn process(mut self) -> Result<EnableOutcome> {
        let span = self.span.clone();
        let result = self.run().instrument(span).await;

        self.phase = match &result {
            Ok(EnableOutcome::Enabled { .. }) => EnablePhase::Done,
            _ => EnablePhase::Aborted,
        };
        if let Err(e) = &result {
            if e.is_expected() {
                tracing::info!(parent: &self.span, "Enable of table {} stopped: {}", self.table, e);
            } else {
                tracing::error!(parent: &self.span, "Error trying to enable the table {}: {}", self.table, e);
            }
        }
        self.guard.release();
        result
    }

    async fn run(&mut self) -> Result<EnableOutcome> {
        let ctx = &self.coordinator.ctx;
        let table = &self.table;
        tracing::info!("Attempting to enable the table {}", table);

        let rows = ctx
            .catalog
            .list_regions(table)
            .await
            .map_err(|e| Error::coordination("list table regions", e))?;
        let unplaced = compute_unplaced(&rows, ctx.tracker.as_ref());
        tracing::info!(
            "Table '{}' has {} regions, of which {} are offline",
            table,
            rows.len(),
            unplaced.len()
        );

        ctx.hooks
            .pre_enable(table)
            .await
            .map_err(|e| e.into_hook(ctx.hooks.name()))?;

        let placed = unplaced.len();
        if !unplaced.is_empty() {
            self.phase = EnablePhase::Placing;

            let servers: Vec<ServerName> = ctx
                .membership
                .live_servers()
                .await
                .map_err(|e| Error::coordination("list live servers", e))?;
            let plan = ctx
                .planner
                .plan(&unplaced, &servers)
                .map_err(|e| Error::Execution(format!("planning failed: {}", e)))?;
            tracing::info!(
                "Bulk assigning {} region(s) across {} server(s), retainAssignment=true",
                placed,
                plan.len()
            );

            match ctx.executor.execute(&plan, true).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(
                        "Table '{}' wasn't successfully enabled; it stays ENABLING",
                        table
                    );
                    return Ok(EnableOutcome::Incomplete {
                        regions_requested: placed,
                    });
                }
                Err(ExecuteError::Cancelled) => {
                    tracing::warn!(
                        "Enable operation was interrupted when enabling table '{}'",
                        table
                    );
                    return Err(Error::Cancelled(table.clone()));
                }
                Err(ExecuteError::Failed(reason)) => return Err(Error::Execution(reason)),
            }
        }

        let swapped = ctx
            .states
            .compare_and_set(table, TableState::Enabling, TableState::Enabled)
            .await
            .map_err(|e| Error::coordination("set table enabled", e))?;
        if !swapped {
            let state = ctx.states.get(table).await.ok().flatten();
            return Err(Error::Coordination(format!(
                "table {} left ENABLING while its lock was held (now {:?})",
                table, state
            )));
        }

        ctx.hooks
            .post_enable(table)
            .await
            .map_err(|e| e.into_hook(ctx.hooks.name()))?;

        tracing::info!("Table '{}' was successfully enabled", table);
        Ok(EnableOutcome::Enabled {
            regions_placed: placed,
        })
    }
}

impl std::fmt::Debug for LifecycleCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleCoordinator").finish_non_exhaustive()
    }
}
