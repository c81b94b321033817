//! Shared doubles for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tablekeeper::common::{RegionInfo, Result, ServerName, TableName, TableState};
use tablekeeper::coordinator::{
    ClusterMembership, Collaborators, DistributedLock, ExecuteError, ExtensionHooks,
    LifecycleCoordinator, LocalTableLocks, LockToken, PartitionCatalog, PlacementExecutor, PlacementPlan, PlacementPlanner,
    PlacementStatus, PlacementTracker, RetainPlanner, TableStateStore,
};
use tablekeeper::Error;
use tokio::sync::Notify;

pub fn table(name: &str) -> TableName {
    TableName::new(name).unwrap()
}

pub fn server(host: &str) -> ServerName {
    ServerName::new(host, 16020, 1)
}

/// `n` contiguous regions covering the key space
pub fn regions(table: &TableName, n: u64) -> Vec<RegionInfo> {
    (0..n)
        .map(|i| {
            let start = if i == 0 { Vec::new() } else { format!("k{:03}", i).into_bytes() };
            let end = if i + 1 == n {
                Vec::new()
            } else {
                format!("k{:03}", i + 1).into_bytes()
            };
            RegionInfo::new(table.clone(), &start, &end, 100 + i)
        })
        .collect()
}

// === Table states ===

#[derive(Default)]
pub struct MemoryStates {
    states: Mutex<HashMap<TableName, TableState>>,
    pub fail_remove: AtomicBool,
    pub fail_cas: AtomicBool,
    pub remove_calls: AtomicUsize,
}

impl MemoryStates {
    pub fn put(&self, table: &TableName, state: TableState) {
        self.states.lock().unwrap().insert(table.clone(), state);
    }

    pub fn state(&self, table: &TableName) -> Option<TableState> {
        self.states.lock().unwrap().get(table).copied()
    }
}

#[async_trait]
impl TableStateStore for MemoryStates {
    async fn get(&self, table: &TableName) -> Result<Option<TableState>> {
        Ok(self.state(table))
    }

    async fn compare_and_set(
        &self,
        table: &TableName,
        expected: TableState,
        next: TableState,
    ) -> Result<bool> {
        if self.fail_cas.load(Ordering::SeqCst) {
            return Err(Error::Other("state store unavailable".into()));
        }
        let mut states = self.states.lock().unwrap();
        match states.get_mut(table) {
            Some(current) if *current == expected => {
                *current = next;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set(&self, table: &TableName, state: TableState) -> Result<()> {
        self.put(table, state);
        Ok(())
    }

    async fn remove_if(&self, table: &TableName, expected: TableState) -> Result<bool> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(Error::Other("state store unavailable".into()));
        }
        let mut states = self.states.lock().unwrap();
        if states.get(table) == Some(&expected) {
            states.remove(table);
            return Ok(true);
        }
        Ok(false)
    }

    async fn list(&self) -> Result<Vec<(TableName, TableState)>> {
        let mut all: Vec<_> = self
            .states
            .lock()
            .unwrap()
            .iter()
            .map(|(t, s)| (t.clone(), *s))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(all)
    }
}

// === Catalog, tracker, membership ===

#[derive(Default)]
pub struct MemoryCatalog {
    tables: Mutex<HashMap<TableName, Vec<(RegionInfo, Option<ServerName>)>>>,
}

impl MemoryCatalog {
    pub fn add(&self, table: &TableName, rows: Vec<(RegionInfo, Option<ServerName>)>) {
        self.tables.lock().unwrap().insert(table.clone(), rows);
    }
}

#[async_trait]
impl PartitionCatalog for MemoryCatalog {
    async fn table_exists(&self, table: &TableName) -> Result<bool> {
        Ok(self.tables.lock().unwrap().contains_key(table))
    }

    async fn list_regions(&self, table: &TableName) -> Result<Vec<(RegionInfo, Option<ServerName>)>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default())
    }
}

/// Tracker with a fixed set of non-unplaced regions
#[derive(Default)]
pub struct FixedTracker {
    statuses: Mutex<HashMap<RegionInfo, PlacementStatus>>,
}

impl FixedTracker {
    pub fn set(&self, region: &RegionInfo, status: PlacementStatus) {
        self.statuses.lock().unwrap().insert(region.clone(), status);
    }
}

impl PlacementTracker for FixedTracker {
    fn status(&self, region: &RegionInfo) -> PlacementStatus {
        self.statuses
            .lock()
            .unwrap()
            .get(region)
            .copied()
            .unwrap_or(PlacementStatus::Unplaced)
    }
}

#[derive(Default)]
pub struct FixedMembership {
    servers: Mutex<Vec<ServerName>>,
}

impl FixedMembership {
    pub fn set(&self, servers: Vec<ServerName>) {
        *self.servers.lock().unwrap() = servers;
    }
}

#[async_trait]
impl ClusterMembership for FixedMembership {
    async fn live_servers(&self) -> Result<Vec<ServerName>> {
        Ok(self.servers.lock().unwrap().clone())
    }
}

// === Planner and executor ===

/// [`RetainPlanner`] that records what it was asked to place
#[derive(Default)]
pub struct RecordingPlanner {
    inner: RetainPlanner,
    pub calls: AtomicUsize,
    pub requested: Mutex<Vec<BTreeMap<RegionInfo, Option<ServerName>>>>,
}

impl PlacementPlanner for RecordingPlanner {
    fn plan(
        &self,
        desired: &BTreeMap<RegionInfo, Option<ServerName>>,
        servers: &[ServerName],
    ) -> Result<PlacementPlan> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().unwrap().push(desired.clone());
        self.inner.plan(desired, servers)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Complete,
    Incomplete,
    Cancel,
    Fail,
}

pub struct ScriptedExecutor {
    script: Mutex<Script>,
    pub calls: AtomicUsize,
    pub plans: Mutex<Vec<PlacementPlan>>,
    /// When set, `execute` waits for a notification before answering
    gate: Mutex<Option<Arc<Notify>>>,
    pub entered: Notify,
}

impl Default for ScriptedExecutor {
    fn default() -> Self {
        Self {
            script: Mutex::new(Script::Complete),
            calls: AtomicUsize::new(0),
            plans: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
            entered: Notify::new(),
        }
    }
}

impl ScriptedExecutor {
    pub fn answer(&self, script: Script) {
        *self.script.lock().unwrap() = script;
    }

    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl PlacementExecutor for ScriptedExecutor {
    async fn execute(&self, plan: &PlacementPlan, retain: bool) -> std::result::Result<bool, ExecuteError> {
        assert!(retain, "enable always retains previous hosts");
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.plans.lock().unwrap().push(plan.clone());
        self.entered.notify_one();

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let script = *self.script.lock().unwrap();
        match script {
            Script::Complete => Ok(true),
            Script::Incomplete => Ok(false),
            Script::Cancel => Err(ExecuteError::Cancelled),
            Script::Fail => Err(ExecuteError::Failed("region server rejected open".into())),
        }
    }
}

// === Hooks ===

#[derive(Default)]
pub struct RecordingHooks {
    pub events: Mutex<Vec<String>>,
    pub fail_pre: AtomicBool,
    pub fail_post: AtomicBool,
}

impl RecordingHooks {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExtensionHooks for RecordingHooks {
    fn name(&self) -> &str {
        "recording"
    }

    async fn pre_enable(&self, table: &TableName) -> Result<()> {
        self.events.lock().unwrap().push(format!("pre:{}", table));
        if self.fail_pre.load(Ordering::SeqCst) {
            return Err(Error::Other("quota exceeded".into()));
        }
        Ok(())
    }

    async fn post_enable(&self, table: &TableName) -> Result<()> {
        self.events.lock().unwrap().push(format!("post:{}", table));
        if self.fail_post.load(Ordering::SeqCst) {
            return Err(Error::Other("notify failed".into()));
        }
        Ok(())
    }
}

// === Locks ===

/// Local locks whose release reports an error after freeing the lock
#[derive(Default)]
pub struct FailingReleaseLocks {
    pub inner: LocalTableLocks,
    pub release_calls: AtomicUsize,
}

#[async_trait]
impl DistributedLock for FailingReleaseLocks {
    async fn acquire(&self, table: &TableName, purpose: &str) -> Result<LockToken> {
        self.inner.acquire(table, purpose).await
    }

    fn release(&self, token: &LockToken) -> Result<()> {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.release(token)?;
        Err(Error::Coordination("lock service unavailable".into()))
    }
}

// === Harness ===

/// All doubles wired into one coordinator
pub struct Harness {
    pub states: Arc<MemoryStates>,
    pub locks: Arc<LocalTableLocks>,
    pub catalog: Arc<MemoryCatalog>,
    pub tracker: Arc<FixedTracker>,
    pub membership: Arc<FixedMembership>,
    pub planner: Arc<RecordingPlanner>,
    pub executor: Arc<ScriptedExecutor>,
    pub hooks: Arc<RecordingHooks>,
}

impl Harness {
    pub fn new() -> Self {
        let harness = Self {
            states: Arc::new(MemoryStates::default()),
            locks: Arc::new(LocalTableLocks::new()),
            catalog: Arc::new(MemoryCatalog::default()),
            tracker: Arc::new(FixedTracker::default()),
            membership: Arc::new(FixedMembership::default()),
            planner: Arc::new(RecordingPlanner::default()),
            executor: Arc::new(ScriptedExecutor::default()),
            hooks: Arc::new(RecordingHooks::default()),
        };
        harness
            .membership
            .set(vec![server("rs-a"), server("rs-b")]);
        harness
    }

    /// A catalog table with `n` unhosted regions, in `state`
    pub fn add_table(&self, name: &str, n: u64, state: TableState) -> (TableName, Vec<RegionInfo>) {
        let t = table(name);
        let regions = regions(&t, n);
        self.catalog
            .add(&t, regions.iter().map(|r| (r.clone(), None)).collect());
        self.states.put(&t, state);
        (t, regions)
    }

    pub fn coordinator(&self) -> LifecycleCoordinator {
        self.coordinator_with_locks(self.locks.clone())
    }

    pub fn coordinator_with_locks(&self, locks: Arc<dyn DistributedLock>) -> LifecycleCoordinator {
        let ctx = Collaborators {
            states: self.states.clone(),
            locks,
            catalog: self.catalog.clone(),
            tracker: self.tracker.clone(),
            membership: self.membership.clone(),
            planner: self.planner.clone(),
            executor: self.executor.clone(),
            hooks: self.hooks.clone(),
        };
        LifecycleCoordinator::new(ctx, tracing::info_span!("test"))
    }
}

pub async fn eventually<F: Fn() -> bool>(check: F) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

pub fn placed_servers(plan: &PlacementPlan) -> HashSet<ServerName> {
    plan.keys().cloned().collect()
}
