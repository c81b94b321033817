//! Cluster membership: which servers may receive regions

use crate::common::{timestamp_now, NodeState, Result, ServerName};
use crate::coordinator::metadata::{MetadataStore, ServerMetadata};
use crate::coordinator::tracker::RegionStates;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[async_trait]
pub trait ClusterMembership: Send + Sync {
    /// Live servers eligible to host new regions, sorted by name
    async fn live_servers(&self) -> Result<Vec<ServerName>>;
}

#[async_trait]
impl ClusterMembership for MetadataStore {
    async fn live_servers(&self) -> Result<Vec<ServerName>> {
        let mut servers: Vec<ServerName> = self
            .list_servers()?
            .into_iter()
            .filter(|s| s.state.can_host_new_regions())
            .map(|s| s.server)
            .collect();
        servers.sort();
        Ok(servers)
    }
}

/// Membership backed by the server registry that also retires dead servers.
///
/// Each read first ages out silent servers (when a heartbeat timeout is
/// configured), then hands regions still recorded on a Dead server back to
/// the tracker as unplaced so the next enable places them elsewhere.
pub struct RegistryMembership {
    store: Arc<MetadataStore>,
    tracker: Arc<RegionStates>,
    server_timeout_secs: Option<u64>,
}

impl RegistryMembership {
    pub fn new(
        store: Arc<MetadataStore>,
        tracker: Arc<RegionStates>,
        server_timeout_secs: Option<u64>,
    ) -> Self {
        Self {
            store,
            tracker,
            server_timeout_secs,
        }
    }

    /// Expire silent servers and unplace everything on dead ones.
    /// Returns how many regions were released.
    pub fn reap_dead_servers(&self) -> Result<usize> {
        if let Some(max_age) = self.server_timeout_secs {
            self.store.expire_servers(max_age, timestamp_now())?;
        }
        let mut released = 0;
        for meta in self.store.list_servers()? {
            if meta.state != NodeState::Dead {
                continue;
            }
            let moved = self.tracker.server_down(&meta.server);
            if moved > 0 {
                tracing::warn!(
                    "Server {} is dead; {} region(s) need placement",
                    meta.server,
                    moved
                );
            }
            released += moved;
        }
        Ok(released)
    }
}

#[async_trait]
impl ClusterMembership for RegistryMembership {
    async fn live_servers(&self) -> Result<Vec<ServerName>> {
        self.reap_dead_servers()?;
        self.store.live_servers().await
    }
}

/// Periodically retire dead servers until shutdown is signalled
pub fn start_reaper(
    membership: Arc<RegistryMembership>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = membership.reap_dead_servers() {
                        tracing::warn!("Dead server check failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Dead server reaper stopped");
    })
}

impl MetadataStore {
    /// Register a server, or refresh its heartbeat and state
    pub fn register_server(&self, server: &ServerName, state: NodeState) -> Result<ServerMetadata> {
        let meta = ServerMetadata {
            server: server.clone(),
            state,
            last_heartbeat: timestamp_now(),
        };
        self.put_server(&meta)?;
        tracing::info!("Registered server {} ({})", server, state);
        Ok(meta)
    }

    /// Servers whose heartbeat is older than `max_age_secs` become Suspect;
    /// Suspect servers that stay silent another `max_age_secs` become Dead.
    pub fn expire_servers(&self, max_age_secs: u64, now: u64) -> Result<Vec<ServerName>> {
        let mut changed = Vec::new();
        for mut meta in self.list_servers()? {
            let age = now.saturating_sub(meta.last_heartbeat);
            let next = match meta.state {
                NodeState::Alive | NodeState::Draining if age > max_age_secs => NodeState::Suspect,
                NodeState::Suspect if age > max_age_secs * 2 => NodeState::Dead,
                _ => continue,
            };
            tracing::warn!(
                "Server {} missed heartbeats for {}s: {} -> {}",
                meta.server,
                age,
                meta.state,
                next
            );
            meta.state = next;
            self.put_server(&meta)?;
            changed.push(meta.server);
        }
        Ok(changed)
    }
}
