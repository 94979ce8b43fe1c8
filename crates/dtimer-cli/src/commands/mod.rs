//! Command implementations

use anyhow::{Context, Result};
use dtimer_bus::LocalWakeHub;
use dtimer_core::{ScheduleStore, StoreConfig};
use dtimer_lmdb::LmdbScheduleStore;
use dtimer_scheduler::{TimerNode, TimerNotification};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

pub mod events;
pub mod run;
pub mod status;

/// Store location and namespace shared by every command.
pub struct Target {
    pub db_path: PathBuf,
    pub namespace: String,
}

impl Target {
    pub fn open_store(&self) -> Result<Arc<LmdbScheduleStore>> {
        let store = LmdbScheduleStore::open(StoreConfig::new(&self.db_path))
            .with_context(|| format!("Failed to open store at {}", self.db_path.display()))?;
        Ok(Arc::new(store))
    }

    /// An initialized node without an identity, for one-shot commands.
    pub async fn post_only_node(&self) -> Result<TimerNode<LmdbScheduleStore>> {
        let (node, _rx) = TimerNode::builder(self.open_store()?)
            .with_namespace(self.namespace.clone())
            .build()
            .context("Failed to build node")?;
        node.initialize().await.context("Store not ready")?;
        Ok(node)
    }

    /// An initialized node that can join and receive events.
    pub async fn worker_node(
        &self,
        node_id: String,
        max_events: usize,
    ) -> Result<(
        TimerNode<LmdbScheduleStore>,
        mpsc::Receiver<TimerNotification>,
    )> {
        let (node, rx) = TimerNode::builder(self.open_store()?)
            .with_namespace(self.namespace.clone())
            .with_node_id(node_id)
            .with_wake_channel(Arc::new(LocalWakeHub::new()))
            .with_max_events(max_events)
            .build()
            .context("Failed to build node")?;
        node.initialize().await.context("Store not ready")?;
        Ok((node, rx))
    }
}

/// Render an epoch-millisecond timestamp for humans.
pub fn format_ms(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|at| at.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string())
        .unwrap_or_else(|| ms.to_string())
}
