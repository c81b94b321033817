//! Table lifecycle coordinator
//!
//! The coordinator is responsible for:
//! - Table state transitions (DISABLED → ENABLING → ENABLED)
//! - Cluster-wide table locks
//! - Placement decisions (retain previous host, else HRW)
//! - Bulk region placement with timeout and shutdown handling
//! - Catalog, table state and server metadata in RocksDB

pub mod bulk;
pub mod catalog;
pub mod hooks;
pub mod lifecycle;
pub mod lock;
pub mod membership;
pub mod metadata;
pub mod placement;
pub mod runner;
pub mod server;
pub mod table_state;
pub mod tracker;

pub use bulk::{BulkPlacer, CatalogRegionOpener, ExecuteError, PlacementExecutor, RegionOpener};
pub use catalog::{regions_from_splits, PartitionCatalog};
pub use hooks::{AuditHook, ExtensionHooks, HookChain, NoopHooks};
pub use lifecycle::{Collaborators, EnableMode, EnableOutcome, EnablePhase, LifecycleCoordinator, PreparedEnable};
pub use lock::{lock_table, DistributedLock, DurableTableLocks, LocalTableLocks, LockToken, TableLockGuard};
pub use membership::{ClusterMembership, RegistryMembership};
pub use metadata::MetadataStore;
pub use placement::{PlacementPlan, PlacementPlanner, RetainPlanner};
pub use runner::{EnableTableTask, TaskHandle, TaskRunner};
pub use server::Coordinator;
pub use table_state::TableStateStore;
pub use tracker::{compute_unplaced, PlacementStatus, PlacementTracker, RegionStates};
