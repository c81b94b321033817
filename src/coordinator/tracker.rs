//! In-memory view of region placement
//!
//! The tracker is rebuilt from the catalog when a coordinator starts and
//! updated by the bulk placer while regions move. It is never persisted.

use crate::common::{timestamp_now_millis, RegionInfo, ServerName};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacementStatus {
    /// Not hosted anywhere and not being opened
    Unplaced,
    /// An open has been dispatched to a server
    Pending,
    /// Open on a server
    Placed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegionState {
    pub region: RegionInfo,
    pub status: PlacementStatus,
    pub server: Option<ServerName>,
    pub updated_at_ms: u64,
}

pub trait PlacementTracker: Send + Sync {
    /// Regions the tracker has never seen are unplaced.
    fn status(&self, region: &RegionInfo) -> PlacementStatus;

    fn is_unplaced(&self, region: &RegionInfo) -> bool {
        self.status(region) == PlacementStatus::Unplaced
    }
}

/// Regions from `rows` that need placement, each with its last known host.
///
/// Regions already placed or with an open in flight are skipped.
pub fn compute_unplaced(
    rows: &[(RegionInfo, Option<ServerName>)],
    tracker: &dyn PlacementTracker,
) -> BTreeMap<RegionInfo, Option<ServerName>> {
    rows.iter()
        .filter(|(region, _)| {
            let unplaced = tracker.is_unplaced(region);
            if !unplaced {
                tracing::debug!(
                    "Skipping placement of region {} because it is already in transition or placed",
                    region
                );
            }
            unplaced
        })
        .map(|(region, location)| (region.clone(), location.clone()))
        .collect()
}

/// Default tracker: a map keyed by region encoded name
#[derive(Default)]
pub struct RegionStates {
    states: RwLock<HashMap<String, RegionState>>,
}

impl RegionStates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from catalog rows: regions whose recorded host is live are
    /// placed, everything else is unplaced.
    pub fn rebuild<'a>(
        &self,
        rows: impl IntoIterator<Item = &'a (RegionInfo, Option<ServerName>)>,
        live_servers: &[ServerName],
    ) -> usize {
        let live: HashSet<&ServerName> = live_servers.iter().collect();
        let mut placed = 0;
        for (region, location) in rows {
            match location {
                Some(server) if live.contains(server) => {
                    self.mark_placed(region, server);
                    placed += 1;
                }
                _ => self.mark_unplaced(region),
            }
        }
        placed
    }

    fn update(&self, region: &RegionInfo, status: PlacementStatus, server: Option<ServerName>) {
        let state = RegionState {
            region: region.clone(),
            status,
            server,
            updated_at_ms: timestamp_now_millis(),
        };
        self.write().insert(region.encoded_name(), state);
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, RegionState>> {
        self.states.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, RegionState>> {
        self.states.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn mark_pending(&self, region: &RegionInfo, server: &ServerName) {
        self.update(region, PlacementStatus::Pending, Some(server.clone()));
    }

    pub fn mark_placed(&self, region: &RegionInfo, server: &ServerName) {
        self.update(region, PlacementStatus::Placed, Some(server.clone()));
    }

    pub fn mark_unplaced(&self, region: &RegionInfo) {
        self.update(region, PlacementStatus::Unplaced, None);
    }

    pub fn region_state(&self, region: &RegionInfo) -> Option<RegionState> {
        self.read().get(&region.encoded_name()).cloned()
    }

    /// Mark everything hosted by a dead server unplaced; returns how many
    pub fn server_down(&self, server: &ServerName) -> usize {
        let now = timestamp_now_millis();
        let mut states = self.write();
        let mut moved = 0;
        for state in states.values_mut() {
            if state.server.as_ref() == Some(server) {
                state.status = PlacementStatus::Unplaced;
                state.server = None;
                state.updated_at_ms = now;
                moved += 1;
            }
        }
        moved
    }
}

impl PlacementTracker for RegionStates {
    fn status(&self, region: &RegionInfo) -> PlacementStatus {
        self.read()
            .get(&region.encoded_name())
            .map(|s| s.status)
            .unwrap_or(PlacementStatus::Unplaced)
    }
}
