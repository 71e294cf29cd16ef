use crate::{LotteryError, Result};
use boxdraw_core::{
    Channel, ChannelId, ChannelPatch, ChannelSummary, CoreError, NewChannel, SharedStore,
    Subscription,
};
use std::sync::Arc;

/// Outcome of a version-checked write.
#[derive(Debug, Clone)]
pub enum Commit {
    Applied(Channel),
    /// Someone else committed first; re-read and re-validate.
    Conflict { actual: u64 },
}

/// Typed access to channel documents in the shared store.
#[derive(Clone)]
pub struct ChannelRepository {
    store: Arc<dyn SharedStore>,
}

impl ChannelRepository {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, channel: NewChannel) -> Result<ChannelId> {
        let id = self.store.create(channel).await?;
        tracing::debug!("Stored new channel {}", id);
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Result<Channel> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| CoreError::not_found(id).into())
    }

    /// Unconditional field merge.
    pub async fn update(&self, id: &str, patch: ChannelPatch) -> Result<Channel> {
        Ok(self.store.update(id, patch, None).await?)
    }

    /// Field merge that only commits on top of `expected_version`.
    pub async fn update_versioned(
        &self,
        id: &str,
        patch: ChannelPatch,
        expected_version: u64,
    ) -> Result<Commit> {
        match self.store.update(id, patch, Some(expected_version)).await {
            Ok(channel) => Ok(Commit::Applied(channel)),
            Err(CoreError::VersionConflict { actual, .. }) => {
                tracing::debug!(
                    "Channel {} moved from version {} to {}",
                    id,
                    expected_version,
                    actual
                );
                Ok(Commit::Conflict { actual })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Validate-then-write loop over the latest snapshot.
    ///
    /// `plan` inspects a snapshot and returns the patch to commit, `None` when
    /// there is nothing to write, or a rejection. On a version conflict the
    /// channel is re-read and `plan` runs again. At most `attempts` writes are
    /// issued; `plan` always sees the last re-read before the loop gives up.
    pub async fn commit_checked<F>(
        &self,
        mut snapshot: Channel,
        attempts: u32,
        mut plan: F,
    ) -> Result<Channel>
    where
        F: FnMut(&Channel) -> Result<Option<ChannelPatch>> + Send,
    {
        let attempts = attempts.max(1);
        let mut writes = 0;

        loop {
            let patch = match plan(&snapshot)? {
                Some(patch) => patch,
                None => return Ok(snapshot),
            };

            if writes == attempts {
                tracing::warn!("Channel {} stayed contended, giving up", snapshot.id);
                return Err(LotteryError::StoreWriteFailure(format!(
                    "channel {} changed on every attempt",
                    snapshot.id
                )));
            }
            writes += 1;

            match self
                .update_versioned(&snapshot.id, patch, snapshot.version)
                .await?
            {
                Commit::Applied(channel) => return Ok(channel),
                Commit::Conflict { .. } => {
                    tracing::debug!(
                        "Retrying write to channel {} (attempt {}/{})",
                        snapshot.id,
                        writes,
                        attempts
                    );
                    snapshot = self.get(&snapshot.id).await?;
                }
            }
        }
    }

    pub async fn subscribe(&self, id: &str) -> Result<Subscription> {
        Ok(self.store.subscribe(id).await?)
    }

    pub async fn list(&self) -> Result<Vec<ChannelSummary>> {
        let channels = self.store.list().await?;
        Ok(channels.iter().map(Channel::summary).collect())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.store.delete(id).await?;
        Ok(())
    }
}
