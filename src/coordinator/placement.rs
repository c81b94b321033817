//! Placement planning
//!
//! Turns "these regions need a home" into a per-server plan. The planner in
//! this module retains each region's previous host when that host is still
//! live, and otherwise picks a server with HRW hashing so the choice is
//! deterministic and spreads regions across the cluster.

use crate::common::{hrw_select, RegionInfo, Result, ServerName};
use std::collections::BTreeMap;

/// Server → regions it should open
pub type PlacementPlan = BTreeMap<ServerName, Vec<RegionInfo>>;

pub trait PlacementPlanner: Send + Sync {
    /// `desired` maps each region needing placement to its last known host.
    fn plan(
        &self,
        desired: &BTreeMap<RegionInfo, Option<ServerName>>,
        servers: &[ServerName],
    ) -> Result<PlacementPlan>;
}

/// Retain-assignment planner
#[derive(Debug, Default, Clone)]
pub struct RetainPlanner;

impl RetainPlanner {
    pub fn new() -> Self {
        Self
    }

    /// Choose a server for one region.
    ///
    /// Preference order: the exact previous server; the restarted
    /// incarnation of it (same host and port); any server on the same host;
    /// any live server.
    fn choose<'a>(
        &self,
        region: &RegionInfo,
        previous: Option<&ServerName>,
        servers: &'a [ServerName],
    ) -> Option<&'a ServerName> {
        let key = region.encoded_name();
        if let Some(previous) = previous {
            if let Some(same) = servers.iter().find(|s| *s == previous) {
                return Some(same);
            }
            if let Some(restarted) = servers.iter().find(|s| s.same_address(previous)) {
                return Some(restarted);
            }
            let same_host: Vec<ServerName> = servers
                .iter()
                .filter(|s| s.host == previous.host)
                .cloned()
                .collect();
            if let Some(chosen) = hrw_select(&key, &same_host) {
                return servers.iter().find(|s| *s == chosen);
            }
        }
        hrw_select(&key, servers)
    }
}

impl PlacementPlanner for RetainPlanner {
    fn plan(
        &self,
        desired: &BTreeMap<RegionInfo, Option<ServerName>>,
        servers: &[ServerName],
    ) -> Result<PlacementPlan> {
        if desired.is_empty() {
            return Ok(PlacementPlan::new());
        }
        if servers.is_empty() {
            return Err(crate::Error::NoLiveServers);
        }

        let mut plan = PlacementPlan::new();
        let mut retained = 0;
        for (region, previous) in desired {
            let server = self
                .choose(region, previous.as_ref(), servers)
                .ok_or(crate::Error::NoLiveServers)?;
            if previous.as_ref() == Some(server) {
                retained += 1;
            }
            plan.entry(server.clone()).or_default().push(region.clone());
        }

        tracing::debug!(
            "Planned {} region(s) on {} server(s), {} retained on previous host",
            desired.len(),
            plan.len(),
            retained
        );
        Ok(plan)
    }
}
