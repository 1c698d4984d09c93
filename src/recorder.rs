//! 事件记录 (Event Recorder)
//!
//! 每次成功分类后写一条最小审计记录。与告警 / 锚定不同，写入失败会让整个激活失败。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::evidence::{SignalType, Verdict};

/// 落库的审计记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: u64,
    pub signal_type: SignalType,
    pub verdict: Verdict,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("event store error: {0}")]
    Store(#[from] sled::Error),

    #[error("event encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("event store timed out after {0:?}")]
    Timeout(Duration),
}

/// 追加式事件存储
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append(&self, signal_type: SignalType, verdict: &Verdict) -> Result<AlertEvent, PersistenceError>;

    /// 最近的 `limit` 条记录，新的在前
    async fn recent(&self, limit: usize) -> Result<Vec<AlertEvent>, PersistenceError>;
}

/// sled 实现：key 为单调递增 id (大端)，value 为 JSON
pub struct SledEventStore {
    db: sled::Db,
    events: sled::Tree,
}

impl SledEventStore {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Self::from_db(sled::open(path)?)
    }

    pub fn temporary() -> anyhow::Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> anyhow::Result<Self> {
        let events = db.open_tree("alert_events")?;
        Ok(Self { db, events })
    }
}

#[async_trait]
impl EventStore for SledEventStore {
    async fn append(&self, signal_type: SignalType, verdict: &Verdict) -> Result<AlertEvent, PersistenceError> {
        let event = AlertEvent {
            id: self.db.generate_id()?,
            signal_type,
            verdict: verdict.clone(),
            created_at: Utc::now(),
        };

        self.events
            .insert(event.id.to_be_bytes(), serde_json::to_vec(&event)?)?;
        self.events.flush_async().await?;
        Ok(event)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AlertEvent>, PersistenceError> {
        self.events
            .iter()
            .rev()
            .take(limit)
            .map(|item| -> Result<AlertEvent, PersistenceError> {
                let (_, raw) = item?;
                Ok(serde_json::from_slice(&raw)?)
            })
            .collect()
    }
}

pub struct EventRecorder {
    store: Arc<dyn EventStore>,
    timeout: Duration,
}

impl EventRecorder {
    pub fn new(store: Arc<dyn EventStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn record(&self, signal_type: SignalType, verdict: &Verdict) -> Result<AlertEvent, PersistenceError> {
        let event = tokio::time::timeout(self.timeout, self.store.append(signal_type, verdict))
            .await
            .map_err(|_| PersistenceError::Timeout(self.timeout))??;

        info!(id = event.id, signal = signal_type.as_str(), "📝 审计记录已写入");
        Ok(event)
    }

    pub async fn recent(&self, limit: usize) -> Result<Vec<AlertEvent>, PersistenceError> {
        self.store.recent(limit).await
    }
}
