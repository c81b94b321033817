//! Partition catalog: which regions a table has and where they last lived

use crate::common::{RegionInfo, Result, ServerName, TableName};
use crate::coordinator::metadata::MetadataStore;
use async_trait::async_trait;

#[async_trait]
pub trait PartitionCatalog: Send + Sync {
    async fn table_exists(&self, table: &TableName) -> Result<bool>;

    /// Every region of the table with its last known host, if any
    async fn list_regions(&self, table: &TableName) -> Result<Vec<(RegionInfo, Option<ServerName>)>>;
}

#[async_trait]
impl PartitionCatalog for MetadataStore {
    async fn table_exists(&self, table: &TableName) -> Result<bool> {
        Ok(self.get_table(table)?.is_some())
    }

    async fn list_regions(&self, table: &TableName) -> Result<Vec<(RegionInfo, Option<ServerName>)>> {
        Ok(self
            .list_regions(table)?
            .into_iter()
            .map(|record| (record.region, record.location))
            .collect())
    }
}

/// Build the initial regions of a new table from sorted split keys.
///
/// `n` split keys produce `n + 1` regions covering the whole key space.
pub fn regions_from_splits(table: &TableName, splits: &[Vec<u8>], region_id: u64) -> Result<Vec<RegionInfo>> {
    let mut sorted = splits.to_vec();
    sorted.sort();
    sorted.dedup();
    if sorted.len() != splits.len() || sorted.iter().any(|s| s.is_empty()) {
        return Err(crate::Error::InvalidName(
            "split keys must be unique and non-empty".into(),
        ));
    }

    let mut bounds: Vec<&[u8]> = Vec::with_capacity(sorted.len() + 2);
    bounds.push(b"");
    bounds.extend(sorted.iter().map(|s| s.as_slice()));
    bounds.push(b"");

    Ok(bounds
        .windows(2)
        .enumerate()
        .map(|(i, w)| RegionInfo::new(table.clone(), w[0], w[1], region_id + i as u64))
        .collect())
}
