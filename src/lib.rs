//! # tablekeeper
//!
//! Table lifecycle coordination for a partitioned store:
//! - Tables are split into regions hosted by region servers
//! - Enabling a table flips DISABLED → ENABLING → ENABLED under a
//!   cluster-wide table lock
//! - Regions without a host are placed in bulk, retaining previous hosts
//! - Catalog, table states, servers and lock leases live in RocksDB
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │            LifecycleCoordinator              │
//! │  lock ─► validate ─► plan ─► execute ─► ok   │
//! └──┬─────────┬──────────┬──────────┬───────────┘
//!    │         │          │          │
//! ┌──▼───┐ ┌───▼────┐ ┌───▼─────┐ ┌──▼─────────┐
//! │Locks │ │ States │ │ Planner │ │ BulkPlacer │
//! └──┬───┘ └───┬────┘ └─────────┘ └──┬─────────┘
//!    └─────────┴──── MetadataStore ───┘
//!                    (RocksDB)
//! ```
//!
//! ## Usage
//!
//! ```bash
//! tablekeeper create-table --table orders --splits g,n,t
//! tablekeeper add-server --name rs-a:16020,1
//! tablekeeper enable --table orders
//! tablekeeper state --table orders
//! ```

pub mod common;
pub mod coordinator;

pub use common::{Config, Error, Result};
pub use coordinator::{Coordinator, EnableMode, EnableOutcome, LifecycleCoordinator};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
