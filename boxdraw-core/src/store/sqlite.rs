use super::{Broker, SharedStore, Subscription};
use crate::config::LotteryConfig;
use crate::error::{CoreError, Result};
use crate::types::{Channel, ChannelId, ChannelPatch, NewChannel};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

// unconditional merges retry this often when another process races them
const MERGE_ATTEMPTS: u32 = 5;

struct Inner {
    conn: Mutex<Connection>,
    broker: Broker,
    poll_interval: Duration,
    pollers: parking_lot::Mutex<HashSet<ChannelId>>,
}

/// SQLite-backed store. Documents are kept as JSON next to a version column;
/// writes are compare-and-swap on that column so several processes can share
/// one database file.
///
/// Writes made through this handle reach its subscribers in full commit
/// order. Writes made by other processes are picked up by polling, which only
/// sees the latest row: intermediate versions committed elsewhere between two
/// polls are skipped, though delivered versions still only increase.
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<Inner>,
}

impl SqliteStore {
    pub async fn open(db_path: &Path, config: &LotteryConfig) -> Result<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let conn = Connection::open(db_path)?;
        init_schema(&conn)?;

        tracing::debug!("Opened channel store at {}", db_path.display());

        Ok(Self {
            inner: Arc::new(Inner {
                conn: Mutex::new(conn),
                broker: Broker::new(),
                poll_interval: config.poll_interval,
                pollers: parking_lot::Mutex::new(HashSet::new()),
            }),
        })
    }

    /// Republish writes made by other processes while anyone here is subscribed.
    fn spawn_poller(&self, channel_id: ChannelId) {
        if !self.inner.pollers.lock().insert(channel_id.clone()) {
            return;
        }

        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(inner.poll_interval).await;

                let conn = inner.conn.lock().await;
                if inner.broker.subscriber_count(&channel_id) == 0 {
                    inner.pollers.lock().remove(&channel_id);
                    break;
                }

                match load_channel(&conn, &channel_id) {
                    Ok(Some(channel)) => inner.broker.publish(&channel),
                    Ok(None) => {
                        inner.broker.close(&channel_id);
                        inner.pollers.lock().remove(&channel_id);
                        break;
                    }
                    Err(e) => tracing::warn!("Polling channel {} failed: {}", channel_id, e),
                }
            }
            tracing::debug!("Stopped polling channel {}", channel_id);
        });
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS channels (
            id TEXT PRIMARY KEY,
            version INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            document TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

fn load_channel(conn: &Connection, id: &str) -> Result<Option<Channel>> {
    let document: Option<String> = conn
        .query_row(
            "SELECT document FROM channels WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;

    match document {
        Some(doc) => Ok(Some(serde_json::from_str(&doc)?)),
        None => Ok(None),
    }
}

fn merge_channel(
    conn: &Connection,
    id: &str,
    patch: &ChannelPatch,
    expected_version: Option<u64>,
) -> Result<Channel> {
    for attempt in 1..=MERGE_ATTEMPTS {
        let mut channel = load_channel(conn, id)?.ok_or_else(|| CoreError::not_found(id))?;
        let current = channel.version;

        if let Some(expected) = expected_version {
            if current != expected {
                return Err(CoreError::VersionConflict {
                    expected,
                    actual: current,
                });
            }
        }

        patch.clone().apply(&mut channel, Utc::now());
        let document = serde_json::to_string(&channel)?;

        let changed = conn
            .execute(
                "UPDATE channels SET version = ?1, updated_at = ?2, document = ?3
                 WHERE id = ?4 AND version = ?5",
                params![
                    channel.version as i64,
                    channel.updated_at.timestamp_millis(),
                    document,
                    id,
                    current as i64,
                ],
            )
            .map_err(|e| CoreError::write_failure(e.to_string()))?;

        if changed == 1 {
            return Ok(channel);
        }

        tracing::debug!(
            "Channel {} changed underneath merge (attempt {})",
            id,
            attempt
        );
    }

    Err(CoreError::write_failure(format!(
        "channel {} kept changing during merge",
        id
    )))
}

#[async_trait]
impl SharedStore for SqliteStore {
    async fn create(&self, channel: NewChannel) -> Result<ChannelId> {
        let id = Uuid::new_v4().to_string();
        let doc = Channel::from_new(id.clone(), channel, Utc::now());
        let document = serde_json::to_string(&doc)?;

        let conn = self.inner.conn.lock().await;
        conn.execute(
            "INSERT INTO channels (id, version, created_at, updated_at, document)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                doc.id,
                doc.version as i64,
                doc.created_at.timestamp_millis(),
                doc.updated_at.timestamp_millis(),
                document,
            ],
        )
        .map_err(|e| CoreError::write_failure(e.to_string()))?;

        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<Option<Channel>> {
        let conn = self.inner.conn.lock().await;
        load_channel(&conn, id)
    }

    async fn update(
        &self,
        id: &str,
        patch: ChannelPatch,
        expected_version: Option<u64>,
    ) -> Result<Channel> {
        let conn = self.inner.conn.lock().await;
        let committed = merge_channel(&conn, id, &patch, expected_version)?;
        self.inner.broker.publish(&committed);
        Ok(committed)
    }

    async fn subscribe(&self, id: &str) -> Result<Subscription> {
        let subscription = {
            let conn = self.inner.conn.lock().await;
            let current = load_channel(&conn, id)?.ok_or_else(|| CoreError::not_found(id))?;
            self.inner.broker.subscribe(current)
        };

        self.spawn_poller(id.to_string());
        Ok(subscription)
    }

    async fn list(&self) -> Result<Vec<Channel>> {
        let conn = self.inner.conn.lock().await;

        let mut stmt =
            conn.prepare("SELECT document FROM channels ORDER BY created_at DESC, rowid DESC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut channels = Vec::new();
        for row in rows {
            channels.push(serde_json::from_str(&row?)?);
        }

        Ok(channels)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let conn = self.inner.conn.lock().await;
        let removed = conn
            .execute("DELETE FROM channels WHERE id = ?1", params![id])
            .map_err(|e| CoreError::write_failure(e.to_string()))?;

        if removed == 0 {
            return Err(CoreError::not_found(id));
        }

        self.inner.broker.close(id);
        Ok(())
    }
}
