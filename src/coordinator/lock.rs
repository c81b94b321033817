//! Cluster-wide exclusive table locks
//!
//! A lock is taken through [`lock_table`], which returns a
//! [`TableLockGuard`]. The guard releases the lock when dropped, so every
//! exit path of the caller (early return, `?`, panic unwind, or the caller
//! dropping the future) gives the lock back.

use crate::common::{lock_unpoisoned, timestamp_now_millis, LockConfig, Result, TableName};
use crate::coordinator::metadata::{LockRecord, MetadataStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Proof of ownership of one table's lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    pub table: TableName,
    pub owner: String,
    pub purpose: String,
}

impl LockToken {
    fn new(table: &TableName, purpose: &str) -> Self {
        Self {
            table: table.clone(),
            owner: uuid::Uuid::new_v4().to_string(),
            purpose: purpose.to_string(),
        }
    }
}

#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Wait until the table's lock is granted. There is no timeout; wrap the
    /// call to bound the wait. Dropping the future while waiting holds
    /// nothing.
    async fn acquire(&self, table: &TableName, purpose: &str) -> Result<LockToken>;

    /// Give the lock back. Releasing a token that is no longer held is not
    /// an error.
    fn release(&self, token: &LockToken) -> Result<()>;
}

/// Acquire `table`'s lock and wrap it in a guard
pub async fn lock_table(
    locks: Arc<dyn DistributedLock>,
    table: &TableName,
    purpose: &str,
) -> Result<TableLockGuard> {
    let token = locks.acquire(table, purpose).await?;
    tracing::debug!("Acquired lock on table {} for {}", table, purpose);
    Ok(TableLockGuard {
        locks,
        token,
        released: false,
    })
}

/// Held table lock; released on drop if not released explicitly.
pub struct TableLockGuard {
    locks: Arc<dyn DistributedLock>,
    token: LockToken,
    released: bool,
}

impl TableLockGuard {
    pub fn table(&self) -> &TableName {
        &self.token.table
    }

    pub fn token(&self) -> &LockToken {
        &self.token
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Idempotent. Failures are logged, never returned, so they cannot mask
    /// whatever error the lock holder is already reporting.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match self.locks.release(&self.token) {
            Ok(()) => tracing::debug!("Released lock on table {}", self.token.table),
            Err(e) => tracing::warn!(
                "Could not release the lock on table {}: {}",
                self.token.table,
                e
            ),
        }
    }
}

impl Drop for TableLockGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for TableLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableLockGuard")
            .field("token", &self.token)
            .field("released", &self.released)
            .finish()
    }
}

// === In-process locks ===

/// Table locks for a single coordinator process.
#[derive(Default)]
pub struct LocalTableLocks {
    tables: Mutex<HashMap<TableName, Arc<Semaphore>>>,
    held: Mutex<HashMap<String, (TableName, OwnedSemaphorePermit)>>,
}

impl LocalTableLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of holders of `table`'s lock (0 or 1)
    pub fn held_count(&self, table: &TableName) -> usize {
        lock_unpoisoned(&self.held)
            .values()
            .filter(|(t, _)| t == table)
            .count()
    }

    pub fn total_held(&self) -> usize {
        lock_unpoisoned(&self.held).len()
    }
}

#[async_trait]
impl DistributedLock for LocalTableLocks {
    async fn acquire(&self, table: &TableName, purpose: &str) -> Result<LockToken> {
        let semaphore = lock_unpoisoned(&self.tables)
            .entry(table.clone())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone();

        let permit = semaphore
            .acquire_owned()
            .await
            .map_err(|_| crate::Error::Coordination(format!("lock for {} closed", table)))?;

        let token = LockToken::new(table, purpose);
        lock_unpoisoned(&self.held).insert(token.owner.clone(), (table.clone(), permit));
        Ok(token)
    }

    fn release(&self, token: &LockToken) -> Result<()> {
        // Dropping the permit wakes the next waiter
        lock_unpoisoned(&self.held).remove(&token.owner);
        Ok(())
    }
}

// === Durable lease locks ===

/// Lease-based locks stored in the metadata store.
///
/// Every coordinator opening the same store competes for the same leases.
/// A lease outlives a crashed holder until it expires, after which the next
/// waiter takes it over.
pub struct DurableTableLocks {
    store: Arc<MetadataStore>,
    lease: Duration,
    poll_interval: Duration,
}

impl DurableTableLocks {
    pub fn new(store: Arc<MetadataStore>, config: &LockConfig) -> Self {
        Self {
            store,
            lease: config.lease(),
            poll_interval: config.poll_interval(),
        }
    }

    pub fn holder(&self, table: &TableName) -> Result<Option<LockRecord>> {
        let now = timestamp_now_millis();
        Ok(self
            .store
            .get_lock(table)?
            .filter(|record| !record.is_expired(now)))
    }
}

#[async_trait]
impl DistributedLock for DurableTableLocks {
    async fn acquire(&self, table: &TableName, purpose: &str) -> Result<LockToken> {
        let token = LockToken::new(table, purpose);
        let mut waited = false;

        loop {
            let now = timestamp_now_millis();
            let record = LockRecord {
                table: table.clone(),
                owner: token.owner.clone(),
                purpose: purpose.to_string(),
                acquired_at_ms: now,
                expires_at_ms: now + self.lease.as_millis() as u64,
            };
            if self.store.try_acquire_lock(&record, now)? {
                return Ok(token);
            }

            if !waited {
                if let Ok(Some(holder)) = self.store.get_lock(table) {
                    tracing::info!(
                        "Waiting for lock on table {} held by {} ({})",
                        table,
                        holder.owner,
                        holder.purpose
                    );
                }
                waited = true;
            }

            let jitter = rand::random::<u64>() % (self.poll_interval.as_millis() as u64 / 2 + 1);
            tokio::time::sleep(self.poll_interval + Duration::from_millis(jitter)).await;
        }
    }

    fn release(&self, token: &LockToken) -> Result<()> {
        if !self.store.release_lock(&token.table, &token.owner)? {
            tracing::debug!(
                "Lock on table {} was no longer held by {}",
                token.table,
                token.owner
            );
        }
        Ok(())
    }
}
