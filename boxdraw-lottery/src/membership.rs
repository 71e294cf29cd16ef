use crate::{ChannelRepository, LotteryError, Result};
use boxdraw_core::{BoxClaims, Channel, ChannelPatch, LotteryConfig, Member, NewChannel};

/// Channel creation and joining.
#[derive(Clone)]
pub struct MembershipManager {
    repo: ChannelRepository,
    config: LotteryConfig,
}

impl MembershipManager {
    pub fn new(repo: ChannelRepository, config: LotteryConfig) -> Self {
        Self { repo, config }
    }

    /// Create a channel with `creator` as its only member and admin.
    pub async fn create_channel(
        &self,
        name: &str,
        capacity: u32,
        creator: &str,
        display_name: &str,
    ) -> Result<Channel> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LotteryError::InvalidName);
        }

        if capacity == 0 {
            return Err(LotteryError::InvalidCapacity {
                requested: capacity,
                min: self.config.min_users.max(1),
                max: self.config.max_users,
            });
        }

        self.config.validate()?;
        if !self.config.capacity_allowed(capacity) {
            return Err(LotteryError::InvalidCapacity {
                requested: capacity,
                min: self.config.min_users,
                max: self.config.max_users,
            });
        }

        let new_channel = NewChannel {
            name: name.to_string(),
            admin_id: creator.to_string(),
            max_users: capacity,
            users: vec![Member::admin(creator, display_or_id(display_name, creator))],
            selected_boxes: BoxClaims::new(),
            results: Vec::new(),
            is_drawn: false,
        };

        let id = self.repo.create(new_channel).await?;
        let channel = self.repo.get(&id).await?;

        tracing::info!(
            "Created channel '{}' ({}) for {} users, admin {}",
            channel.name,
            id,
            capacity,
            creator
        );
        Ok(channel)
    }

    /// Join `channel` as a participant.
    ///
    /// Re-joining is a no-op that returns the current member list, even when
    /// the channel is full.
    pub async fn join(
        &self,
        channel: &Channel,
        identity: &str,
        display_name: &str,
    ) -> Result<Vec<Member>> {
        let name = display_or_id(display_name, identity);
        let mut added = false;

        let committed = self
            .repo
            .commit_checked(channel.clone(), self.config.max_write_retries, |current| {
                added = false;
                if current.is_member(identity) {
                    return Ok(None);
                }

                if current.is_full() {
                    return Err(LotteryError::CapacityExceeded {
                        max_users: current.max_users,
                    });
                }

                let mut users = current.users.clone();
                users.push(Member::participant(identity, name.clone()));
                added = true;
                Ok(Some(ChannelPatch::users(users)))
            })
            .await?;

        if !added {
            tracing::debug!("{} re-entered channel {}", identity, committed.id);
        } else {
            tracing::info!(
                "{} joined channel {} ({}/{})",
                identity,
                committed.id,
                committed.users.len(),
                committed.max_users
            );
        }

        Ok(committed.users)
    }
}

fn display_or_id(display_name: &str, identity: &str) -> String {
    let trimmed = display_name.trim();
    if trimmed.is_empty() {
        identity.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxdraw_core::{CoreError, MemoryStore};
    use std::sync::Arc;

    fn manager() -> MembershipManager {
        let repo = ChannelRepository::new(Arc::new(MemoryStore::new()));
        MembershipManager::new(repo, LotteryConfig::instant())
    }

    #[tokio::test]
    async fn test_create_seeds_admin() {
        let manager = manager();
        let channel = manager
            .create_channel("  Movie Night ", 4, "alice", "Alice")
            .await
            .unwrap();

        assert_eq!(channel.name, "Movie Night");
        assert_eq!(channel.admin_id, "alice");
        assert_eq!(channel.users, vec![Member::admin("alice", "Alice")]);
        assert!(channel.selected_boxes.is_empty());
        assert!(channel.results.is_empty());
        assert!(!channel.is_drawn);
    }

    #[tokio::test]
    async fn test_create_rejects_blank_name_and_bad_capacity() {
        let manager = manager();

        assert!(matches!(
            manager.create_channel("   ", 4, "alice", "Alice").await,
            Err(LotteryError::InvalidName)
        ));
        assert!(matches!(
            manager.create_channel("x", 1, "alice", "Alice").await,
            Err(LotteryError::InvalidCapacity { requested: 1, .. })
        ));
        assert!(matches!(
            manager.create_channel("x", 21, "alice", "Alice").await,
            Err(LotteryError::InvalidCapacity { requested: 21, .. })
        ));
    }

    #[tokio::test]
    async fn test_blank_display_name_falls_back_to_identity() {
        let manager = manager();
        let channel = manager.create_channel("x", 3, "User_abc123", "").await.unwrap();

        assert_eq!(channel.users[0].name, "User_abc123");
    }

    #[tokio::test]
    async fn test_join_is_idempotent() {
        let manager = manager();
        let channel = manager.create_channel("x", 4, "alice", "Alice").await.unwrap();

        let users = manager.join(&channel, "bob", "Bob").await.unwrap();
        assert_eq!(users.len(), 2);
        assert!(!users[1].is_admin);

        // stale snapshot still resolves to the existing membership
        let again = manager.join(&channel, "bob", "Bob").await.unwrap();
        assert_eq!(again, users);
    }

    #[tokio::test]
    async fn test_join_respects_capacity() {
        let manager = manager();
        let channel = manager.create_channel("x", 2, "alice", "Alice").await.unwrap();

        manager.join(&channel, "bob", "Bob").await.unwrap();
        let err = manager.join(&channel, "carol", "Carol").await.unwrap_err();

        assert!(matches!(err, LotteryError::CapacityExceeded { max_users: 2 }));
        assert!(err.is_rejection());

        // members can still re-enter a full channel
        let users = manager.join(&channel, "bob", "Bob").await.unwrap();
        assert_eq!(users.len(), 2);
    }

    #[tokio::test]
    async fn test_capacity_zero_is_rejected() {
        let repo = ChannelRepository::new(Arc::new(MemoryStore::new()));
        let manager = MembershipManager::new(repo.clone(), LotteryConfig::instant());

        let err = manager.create_channel("x", 0, "alice", "Alice").await.unwrap_err();
        assert!(matches!(err, LotteryError::InvalidCapacity { requested: 0, .. }));
        assert!(repo.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_blocks_creation() {
        let repo = ChannelRepository::new(Arc::new(MemoryStore::new()));
        let config = LotteryConfig {
            min_users: 0,
            ..LotteryConfig::instant()
        };
        let manager = MembershipManager::new(repo.clone(), config);

        let err = manager.create_channel("x", 0, "alice", "Alice").await.unwrap_err();
        assert!(matches!(err, LotteryError::InvalidCapacity { requested: 0, .. }));

        let err = manager.create_channel("x", 3, "alice", "Alice").await.unwrap_err();
        assert!(matches!(err, LotteryError::Core(CoreError::Config(_))));
        assert!(repo.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_rejoin_with_single_attempt() {
        let repo = ChannelRepository::new(Arc::new(MemoryStore::new()));
        let config = LotteryConfig {
            max_write_retries: 1,
            ..LotteryConfig::instant()
        };
        let manager = MembershipManager::new(repo, config);
        let stale = manager.create_channel("x", 4, "alice", "Alice").await.unwrap();

        manager.join(&stale, "bob", "Bob").await.unwrap();
        let users = manager.join(&stale, "bob", "Bob").await.unwrap();

        let ids: Vec<&str> = users.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["alice", "bob"]);
    }
}
