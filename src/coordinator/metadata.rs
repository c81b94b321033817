//! Metadata store using RocksDB
//!
//! Stores:
//! - Table descriptors (table → creation info)
//! - Region catalog (table + region → region info, last known host)
//! - Table lifecycle states
//! - Server registry (server → state, heartbeat)
//! - Table lock leases

use crate::common::{
    lock_unpoisoned, timestamp_now, NodeState, RegionInfo, Result, ServerName, TableName,
    TableState,
};
use rocksdb::{ColumnFamily, Direction, IteratorMode, Options, DB};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

const CF_TABLES: &str = "tables";
const CF_REGIONS: &str = "regions";
const CF_TABLE_STATES: &str = "table_states";
const CF_SERVERS: &str = "servers";
const CF_LOCKS: &str = "locks";

/// Table descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: TableName,
    pub created_at: u64,
}

/// Catalog row: a region and the server that last hosted it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionRecord {
    pub region: RegionInfo,
    pub location: Option<ServerName>,
}

/// Server registry entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerMetadata {
    pub server: ServerName,
    pub state: NodeState,
    pub last_heartbeat: u64,
}

/// Durable table lock lease
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    pub table: TableName,
    pub owner: String,
    pub purpose: String,
    pub acquired_at_ms: u64,
    pub expires_at_ms: u64,
}

impl LockRecord {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// Metadata store
pub struct MetadataStore {
    db: DB,
    /// Serializes read-modify-write sequences (CAS, lock leases)
    write_lock: Mutex<()>,
}

fn region_key(region: &RegionInfo) -> Vec<u8> {
    let mut key = table_prefix(&region.table);
    key.extend_from_slice(region.encoded_name().as_bytes());
    key
}

fn table_prefix(table: &TableName) -> Vec<u8> {
    let mut key = table.as_str().as_bytes().to_vec();
    key.push(0);
    key
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value)
        .map_err(|e| crate::Error::Internal(format!("Serialize error: {}", e)))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| crate::Error::MetadataCorrupted(e.to_string()))
}

impl MetadataStore {
    /// Open or create metadata store
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = DB::open_cf(
            &opts,
            path,
            vec![CF_TABLES, CF_REGIONS, CF_TABLE_STATES, CF_SERVERS, CF_LOCKS],
        )?;

        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| crate::Error::MetadataCorrupted(format!("missing column family {}", name)))
    }

    fn get_value<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_value<T: Serialize>(&self, cf: &str, key: &[u8], value: &T) -> Result<()> {
        self.db.put_cf(self.cf(cf)?, key, encode(value)?)?;
        Ok(())
    }

    fn scan_values<T: DeserializeOwned>(&self, cf: &str, prefix: &[u8]) -> Result<Vec<T>> {
        let iter = self
            .db
            .iterator_cf(self.cf(cf)?, IteratorMode::From(prefix, Direction::Forward));

        let mut values = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            values.push(decode(&value)?);
        }
        Ok(values)
    }

    // === Table operations ===

    /// Create a table with its initial regions. The table starts DISABLED.
    pub fn create_table(&self, table: &TableName, regions: &[RegionInfo]) -> Result<()> {
        if let Some(region) = regions.iter().find(|r| &r.table != table) {
            return Err(crate::Error::InvalidName(format!(
                "region {} does not belong to table {}",
                region, table
            )));
        }

        let _guard = lock_unpoisoned(&self.write_lock);
        if self.db.get_cf(self.cf(CF_TABLES)?, table.as_str().as_bytes())?.is_some() {
            return Err(crate::Error::InvalidName(format!(
                "table {} already exists",
                table
            )));
        }

        let mut batch = rocksdb::WriteBatch::default();
        let descriptor = TableDescriptor {
            name: table.clone(),
            created_at: timestamp_now(),
        };
        batch.put_cf(self.cf(CF_TABLES)?, table.as_str().as_bytes(), encode(&descriptor)?);
        batch.put_cf(
            self.cf(CF_TABLE_STATES)?,
            table.as_str().as_bytes(),
            encode(&TableState::Disabled)?,
        );
        for region in regions {
            let record = RegionRecord {
                region: region.clone(),
                location: None,
            };
            batch.put_cf(self.cf(CF_REGIONS)?, region_key(region), encode(&record)?);
        }
        self.db.write(batch)?;
        Ok(())
    }

    pub fn get_table(&self, table: &TableName) -> Result<Option<TableDescriptor>> {
        self.get_value(CF_TABLES, table.as_str().as_bytes())
    }

    pub fn list_tables(&self) -> Result<Vec<TableDescriptor>> {
        self.scan_values(CF_TABLES, b"")
    }

    /// Remove a table and its regions from the catalog. The lifecycle state
    /// is left alone; clearing it is the state store's business.
    pub fn delete_table(&self, table: &TableName) -> Result<()> {
        let _guard = lock_unpoisoned(&self.write_lock);
        let mut batch = rocksdb::WriteBatch::default();
        batch.delete_cf(self.cf(CF_TABLES)?, table.as_str().as_bytes());
        for record in self.scan_values::<RegionRecord>(CF_REGIONS, &table_prefix(table))? {
            batch.delete_cf(self.cf(CF_REGIONS)?, region_key(&record.region));
        }
        self.db.write(batch)?;
        Ok(())
    }

    // === Region catalog ===

    pub fn put_region(&self, record: &RegionRecord) -> Result<()> {
        self.put_value(CF_REGIONS, &region_key(&record.region), record)
    }

    /// Regions of a table, ordered by start key
    pub fn list_regions(&self, table: &TableName) -> Result<Vec<RegionRecord>> {
        let mut records: Vec<RegionRecord> = self.scan_values(CF_REGIONS, &table_prefix(table))?;
        records.sort_by(|a, b| a.region.cmp(&b.region));
        Ok(records)
    }

    /// Record the server now hosting a region
    pub fn update_region_location(&self, region: &RegionInfo, server: &ServerName) -> Result<()> {
        self.put_region(&RegionRecord {
            region: region.clone(),
            location: Some(server.clone()),
        })
    }

    // === Table states ===

    pub fn get_table_state(&self, table: &TableName) -> Result<Option<TableState>> {
        self.get_value(CF_TABLE_STATES, table.as_str().as_bytes())
    }

    pub fn put_table_state(&self, table: &TableName, state: TableState) -> Result<()> {
        let _guard = lock_unpoisoned(&self.write_lock);
        self.put_value(CF_TABLE_STATES, table.as_str().as_bytes(), &state)
    }

    /// Atomically replace `expected` with `next`. Returns false, writing
    /// nothing, if the stored state differs from `expected`.
    pub fn cas_table_state(
        &self,
        table: &TableName,
        expected: Option<TableState>,
        next: TableState,
    ) -> Result<bool> {
        let _guard = lock_unpoisoned(&self.write_lock);
        let current = self.get_table_state(table)?;
        if current != expected {
            return Ok(false);
        }
        self.put_value(CF_TABLE_STATES, table.as_str().as_bytes(), &next)?;
        Ok(true)
    }

    /// Delete the state record only if it still holds `expected`
    pub fn remove_table_state_if(&self, table: &TableName, expected: TableState) -> Result<bool> {
        let _guard = lock_unpoisoned(&self.write_lock);
        if self.get_table_state(table)? != Some(expected) {
            return Ok(false);
        }
        self.db
            .delete_cf(self.cf(CF_TABLE_STATES)?, table.as_str().as_bytes())?;
        Ok(true)
    }

    pub fn list_table_states(&self) -> Result<Vec<(TableName, TableState)>> {
        let iter = self
            .db
            .iterator_cf(self.cf(CF_TABLE_STATES)?, IteratorMode::Start);

        let mut states = Vec::new();
        for item in iter {
            let (key_bytes, value_bytes) = item?;
            let name = String::from_utf8(key_bytes.to_vec())
                .map_err(|_| crate::Error::MetadataCorrupted("Invalid UTF-8".into()))?;
            let table = TableName::new(name)
                .map_err(|e| crate::Error::MetadataCorrupted(e.to_string()))?;
            states.push((table, decode(&value_bytes)?));
        }
        Ok(states)
    }

    // === Server registry ===

    /// Register or update a server
    pub fn put_server(&self, meta: &ServerMetadata) -> Result<()> {
        self.put_value(CF_SERVERS, meta.server.to_string().as_bytes(), meta)
    }

    pub fn get_server(&self, server: &ServerName) -> Result<Option<ServerMetadata>> {
        self.get_value(CF_SERVERS, server.to_string().as_bytes())
    }

    pub fn list_servers(&self) -> Result<Vec<ServerMetadata>> {
        self.scan_values(CF_SERVERS, b"")
    }

    pub fn remove_server(&self, server: &ServerName) -> Result<()> {
        self.db
            .delete_cf(self.cf(CF_SERVERS)?, server.to_string().as_bytes())?;
        Ok(())
    }

    // === Lock leases ===

    /// Take the lease for `record.table` unless another owner holds an
    /// unexpired one. Re-acquiring one's own lease refreshes it.
    pub fn try_acquire_lock(&self, record: &LockRecord, now_ms: u64) -> Result<bool> {
        let _guard = lock_unpoisoned(&self.write_lock);
        let key = record.table.as_str().as_bytes();
        if let Some(existing) = self.get_value::<LockRecord>(CF_LOCKS, key)? {
            if existing.owner != record.owner && !existing.is_expired(now_ms) {
                return Ok(false);
            }
            if existing.owner != record.owner {
                tracing::warn!(
                    "Taking over expired lock on table {} from {} ({})",
                    record.table,
                    existing.owner,
                    existing.purpose
                );
            }
        }
        self.put_value(CF_LOCKS, key, record)?;
        Ok(true)
    }

    /// Drop the lease if `owner` still holds it
    pub fn release_lock(&self, table: &TableName, owner: &str) -> Result<bool> {
        let _guard = lock_unpoisoned(&self.write_lock);
        let key = table.as_str().as_bytes();
        match self.get_value::<LockRecord>(CF_LOCKS, key)? {
            Some(existing) if existing.owner == owner => {
                self.db.delete_cf(self.cf(CF_LOCKS)?, key)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn get_lock(&self, table: &TableName) -> Result<Option<LockRecord>> {
        self.get_value(CF_LOCKS, table.as_str().as_bytes())
    }

    /// Flush to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}
