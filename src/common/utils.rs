//! Utility functions for tablekeeper

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Parse duration string (e.g., "500ms", "30s", "5m", "1h", "7d")
pub fn parse_duration(s: &str) -> crate::Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(crate::Error::InvalidConfig("empty duration".into()));
    }

    let (num_str, unit) = if let Some(num) = s.strip_suffix("ms") {
        (num, "ms")
    } else {
        let split = s.len() - s.chars().last().map(char::len_utf8).unwrap_or(0);
        (&s[..split], &s[split..])
    };

    let num: u64 = num_str
        .parse()
        .map_err(|_| crate::Error::InvalidConfig(format!("invalid duration: {}", s)))?;

    let scale = match unit {
        "ms" => return Ok(Duration::from_millis(num)),
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        _ => {
            return Err(crate::Error::InvalidConfig(format!(
                "unknown duration unit: {}",
                unit
            )))
        }
    };

    let secs = num
        .checked_mul(scale)
        .ok_or_else(|| crate::Error::InvalidConfig(format!("duration out of range: {}", s)))?;
    Ok(Duration::from_secs(secs))
}

/// Get current Unix timestamp (seconds)
pub fn timestamp_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Get current Unix timestamp (milliseconds)
pub fn timestamp_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Lock a std mutex, recovering the data if a previous holder panicked.
/// Every critical section in this crate leaves its map consistent.
pub fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Server health state as tracked by the server registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Alive,
    Suspect,
    Dead,
    Draining,
}

impl NodeState {
    /// Is this server healthy enough to serve requests?
    pub fn is_healthy(&self) -> bool {
        matches!(self, NodeState::Alive)
    }

    /// Can new regions be placed on this server? Draining servers keep
    /// what they host but take nothing new.
    pub fn can_host_new_regions(&self) -> bool {
        matches!(self, NodeState::Alive)
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Alive => write!(f, "alive"),
            NodeState::Suspect => write!(f, "suspect"),
            NodeState::Dead => write!(f, "dead"),
            NodeState::Draining => write!(f, "draining"),
        }
    }
}

impl std::str::FromStr for NodeState {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "alive" => Ok(NodeState::Alive),
            "suspect" => Ok(NodeState::Suspect),
            "dead" => Ok(NodeState::Dead),
            "draining" => Ok(NodeState::Draining),
            other => Err(crate::Error::InvalidName(format!(
                "unknown node state: {}",
                other
            ))),
        }
    }
}
