//! Durable table lifecycle state

use crate::common::{Result, TableName, TableState};
use crate::coordinator::metadata::MetadataStore;
use async_trait::async_trait;

/// Crash-tolerant record of each table's lifecycle state.
///
/// Implementations must be durable: a coordinator that dies mid-enable
/// leaves ENABLING behind for recovery tooling to find.
#[async_trait]
pub trait TableStateStore: Send + Sync {
    async fn get(&self, table: &TableName) -> Result<Option<TableState>>;

    /// Atomically move `table` from `expected` to `next`; false if the
    /// current state is anything else.
    async fn compare_and_set(
        &self,
        table: &TableName,
        expected: TableState,
        next: TableState,
    ) -> Result<bool>;

    /// Unconditional write, used when re-driving an interrupted transition
    async fn set(&self, table: &TableName, state: TableState) -> Result<()>;

    /// Delete the record if it still holds `expected`
    async fn remove_if(&self, table: &TableName, expected: TableState) -> Result<bool>;

    async fn list(&self) -> Result<Vec<(TableName, TableState)>>;
}

#[async_trait]
impl TableStateStore for MetadataStore {
    async fn get(&self, table: &TableName) -> Result<Option<TableState>> {
        self.get_table_state(table)
    }

    async fn compare_and_set(
        &self,
        table: &TableName,
        expected: TableState,
        next: TableState,
    ) -> Result<bool> {
        self.cas_table_state(table, Some(expected), next)
    }

    async fn set(&self, table: &TableName, state: TableState) -> Result<()> {
        self.put_table_state(table, state)
    }

    async fn remove_if(&self, table: &TableName, expected: TableState) -> Result<bool> {
        self.remove_table_state_if(table, expected)
    }

    async fn list(&self) -> Result<Vec<(TableName, TableState)>> {
        self.list_table_states()
    }
}
