//! Core identifiers: tables, regions, servers and table lifecycle states

use crate::common::hash::blake3_hash;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum table name length in bytes
pub const MAX_TABLE_NAME_LEN: usize = 255;

/// Name of a table, unique across the cluster.
///
/// Table names are used as key prefixes in the metadata store, so they may
/// not be empty and may not contain control characters (including NUL).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableName(String);

impl TableName {
    pub fn new(name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(crate::Error::InvalidName("table name cannot be empty".into()));
        }
        if name.len() > MAX_TABLE_NAME_LEN {
            return Err(crate::Error::InvalidName(format!(
                "table name too long (max {} bytes)",
                MAX_TABLE_NAME_LEN
            )));
        }
        if name.chars().any(|c| c.is_control() || c == ',') {
            return Err(crate::Error::InvalidName(format!(
                "table name contains invalid characters: {:?}",
                name
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TableName {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for TableName {
    type Error = crate::Error;

    fn try_from(s: String) -> crate::Result<Self> {
        Self::new(s)
    }
}

impl From<TableName> for String {
    fn from(name: TableName) -> Self {
        name.0
    }
}

/// Durable lifecycle state of a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableState {
    Disabled,
    Enabling,
    Enabled,
    Disabling,
}

impl TableState {
    /// Enabling and Disabling mark a transition in flight.
    pub fn is_transitional(&self) -> bool {
        matches!(self, TableState::Enabling | TableState::Disabling)
    }
}

impl fmt::Display for TableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableState::Disabled => write!(f, "disabled"),
            TableState::Enabling => write!(f, "enabling"),
            TableState::Enabled => write!(f, "enabled"),
            TableState::Disabling => write!(f, "disabling"),
        }
    }
}

impl FromStr for TableState {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "disabled" => Ok(TableState::Disabled),
            "enabling" => Ok(TableState::Enabling),
            "enabled" => Ok(TableState::Enabled),
            "disabling" => Ok(TableState::Disabling),
            other => Err(crate::Error::InvalidName(format!(
                "unknown table state: {}",
                other
            ))),
        }
    }
}

/// A contiguous slice `[start_key, end_key)` of a table's key space.
///
/// An empty `end_key` means "to the end of the table". Regions are
/// immutable once created; a split produces new regions with new ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionInfo {
    pub table: TableName,
    pub start_key: Vec<u8>,
    pub end_key: Vec<u8>,
    pub region_id: u64,
}

impl RegionInfo {
    pub fn new(table: TableName, start_key: &[u8], end_key: &[u8], region_id: u64) -> Self {
        Self {
            table,
            start_key: start_key.to_vec(),
            end_key: end_key.to_vec(),
            region_id,
        }
    }

    /// Full region name: `table,start_key,region_id`
    pub fn region_name(&self) -> String {
        format!(
            "{},{},{}",
            self.table,
            String::from_utf8_lossy(&self.start_key),
            self.region_id
        )
    }

    /// Short stable name used as map key. Hashes the raw start key, so
    /// binary keys that print alike still get distinct names.
    pub fn encoded_name(&self) -> String {
        let mut raw = Vec::with_capacity(self.table.as_str().len() + self.start_key.len() + 24);
        raw.extend_from_slice(self.table.as_str().as_bytes());
        raw.push(b',');
        raw.extend_from_slice(&self.start_key);
        raw.push(b',');
        raw.extend_from_slice(self.region_id.to_string().as_bytes());
        blake3_hash(&raw)[..32].to_string()
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        key >= self.start_key.as_slice() && (self.end_key.is_empty() || key < self.end_key.as_slice())
    }
}

impl fmt::Display for RegionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.region_name(), &self.encoded_name()[..8])
    }
}

/// Identity of a server process: `host:port` plus the start code that
/// distinguishes restarts of the same endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerName {
    pub host: String,
    pub port: u16,
    pub start_code: u64,
}

impl ServerName {
    pub fn new(host: impl Into<String>, port: u16, start_code: u64) -> Self {
        Self {
            host: host.into(),
            port,
            start_code,
        }
    }

    /// `host:port`, without the start code
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Same endpoint, possibly a different incarnation
    pub fn same_address(&self, other: &ServerName) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl fmt::Display for ServerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{},{}", self.host, self.port, self.start_code)
    }
}

/// Parses `host:port` or `host:port,start_code`.
impl FromStr for ServerName {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        let (address, start_code) = match s.split_once(',') {
            Some((address, code)) => {
                let code = code
                    .trim()
                    .parse()
                    .map_err(|_| crate::Error::InvalidName(format!("bad start code in {}", s)))?;
                (address, code)
            }
            None => (s, 0),
        };
        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| crate::Error::InvalidName(format!("expected host:port, got {}", s)))?;
        if host.is_empty() {
            return Err(crate::Error::InvalidName(format!("empty host in {}", s)));
        }
        let port = port
            .parse()
            .map_err(|_| crate::Error::InvalidName(format!("bad port in {}", s)))?;
        Ok(Self::new(host, port, start_code))
    }
}
