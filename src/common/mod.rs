//! Common utilities and types shared across tablekeeper

pub mod config;
pub mod error;
pub mod hash;
pub mod types;
pub mod utils;

pub use config::{Config, LockBackend, LockConfig, PlacementConfig, RunnerConfig};
pub use error::{Error, ErrorKind, Result};
pub use hash::{blake3_hash, hrw_hash, hrw_select};
pub use types::{RegionInfo, ServerName, TableName, TableState};
pub use utils::{lock_unpoisoned, parse_duration, timestamp_now, timestamp_now_millis, NodeState};
