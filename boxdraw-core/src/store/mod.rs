//! Shared channel store.
//!
//! The lottery core only talks to a [`SharedStore`]. Every implementation
//! routes committed documents through a per-channel [`Broker`] so that each
//! subscriber sees one channel's commits in the order they were written.

pub mod broker;
pub mod memory;
pub mod sqlite;

pub use broker::{Broker, Subscription};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::types::{Channel, ChannelId, ChannelPatch, NewChannel};
use async_trait::async_trait;

#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Insert a new document; the store assigns id, timestamps and version 1.
    async fn create(&self, channel: NewChannel) -> Result<ChannelId>;

    async fn get(&self, id: &str) -> Result<Option<Channel>>;

    /// Field-level merge of `patch` into the stored document.
    ///
    /// With `expected_version` set, the write only commits if the stored
    /// version still matches, otherwise it fails with `VersionConflict`.
    async fn update(
        &self,
        id: &str,
        patch: ChannelPatch,
        expected_version: Option<u64>,
    ) -> Result<Channel>;

    /// Current snapshot first, then every later commit for this channel.
    async fn subscribe(&self, id: &str) -> Result<Subscription>;

    /// All documents, newest `created_at` first.
    async fn list(&self) -> Result<Vec<Channel>>;

    async fn delete(&self, id: &str) -> Result<()>;
}
