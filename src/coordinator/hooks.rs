//! Extension hooks around table lifecycle operations
//!
//! A hook that returns an error from `pre_enable` aborts the enable before
//! any region is placed; an error from `post_enable` is reported to the
//! caller after the table is already enabled.

use crate::common::{Result, TableName};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

#[async_trait]
pub trait ExtensionHooks: Send + Sync {
    fn name(&self) -> &str;

    async fn pre_enable(&self, _table: &TableName) -> Result<()> {
        Ok(())
    }

    async fn post_enable(&self, _table: &TableName) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct NoopHooks;

#[async_trait]
impl ExtensionHooks for NoopHooks {
    fn name(&self) -> &str {
        "noop"
    }
}

/// Runs hooks in registration order; the first failure stops the chain.
#[derive(Default, Clone)]
pub struct HookChain {
    hooks: Vec<Arc<dyn ExtensionHooks>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, hook: Arc<dyn ExtensionHooks>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

#[async_trait]
impl ExtensionHooks for HookChain {
    fn name(&self) -> &str {
        "chain"
    }

    async fn pre_enable(&self, table: &TableName) -> Result<()> {
        for hook in &self.hooks {
            hook.pre_enable(table)
                .await
                .map_err(|e| e.into_hook(hook.name()))?;
        }
        Ok(())
    }

    async fn post_enable(&self, table: &TableName) -> Result<()> {
        for hook in &self.hooks {
            hook.post_enable(table)
                .await
                .map_err(|e| e.into_hook(hook.name()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    PreEnable,
    PostEnable,
}

#[derive(Debug, Serialize)]
struct AuditEntry<'a> {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    timestamp: DateTime<Utc>,
    event: AuditEvent,
    table: &'a TableName,
    node: &'a str,
}

/// Appends one JSON line per lifecycle event to a file.
pub struct AuditHook {
    node_id: String,
    file: Mutex<File>,
}

impl AuditHook {
    pub fn open(path: impl AsRef<Path>, node_id: impl Into<String>) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            node_id: node_id.into(),
            file: Mutex::new(file),
        })
    }

    fn record(&self, event: AuditEvent, table: &TableName) -> Result<()> {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            event,
            table,
            node: &self.node_id,
        };
        let line = serde_json::to_string(&entry)
            .map_err(|e| crate::Error::Internal(format!("audit serialize: {}", e)))?;
        let mut file = crate::common::lock_unpoisoned(&self.file);
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

#[async_trait]
impl ExtensionHooks for AuditHook {
    fn name(&self) -> &str {
        "audit"
    }

    async fn pre_enable(&self, table: &TableName) -> Result<()> {
        self.record(AuditEvent::PreEnable, table)
    }

    async fn post_enable(&self, table: &TableName) -> Result<()> {
        self.record(AuditEvent::PostEnable, table)
    }
}
