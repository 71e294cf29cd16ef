use crate::machine::Phase;
use crate::{ChannelRepository, LotteryError, Result};
use boxdraw_core::{BoxClaims, Channel, ChannelPatch, LotteryConfig};

/// Exclusive box claims.
///
/// Every write replaces the whole claim map but is conditioned on the version
/// of the snapshot it was computed from. A concurrent claim makes the write
/// conflict, the channel is re-read and the claim is re-validated, so no claim
/// is ever overwritten by a stale map.
#[derive(Clone)]
pub struct BoxSelectionCoordinator {
    repo: ChannelRepository,
    config: LotteryConfig,
}

/// Preconditions for `identity` claiming `box_index` on `channel`.
pub fn check_selection(channel: &Channel, box_index: u32, identity: &str) -> Result<()> {
    if Phase::of(channel) != Phase::Open {
        return Err(LotteryError::ChannelNotOpen);
    }

    if !channel.is_member(identity) {
        return Err(LotteryError::NotAMember(identity.to_string()));
    }

    if box_index >= channel.max_users || channel.box_owner(box_index).is_some() {
        return Err(LotteryError::BoxUnavailable(box_index));
    }

    if let Some(held) = channel.box_of(identity) {
        return Err(LotteryError::AlreadySelected { box_index: held });
    }

    Ok(())
}

impl BoxSelectionCoordinator {
    pub fn new(repo: ChannelRepository, config: LotteryConfig) -> Self {
        Self { repo, config }
    }

    /// Claim `box_index` for `identity`, validated against `channel` first.
    pub async fn select_box(
        &self,
        channel: &Channel,
        box_index: u32,
        identity: &str,
    ) -> Result<BoxClaims> {
        let committed = self
            .repo
            .commit_checked(channel.clone(), self.config.max_write_retries, |current| {
                check_selection(current, box_index, identity)?;

                let mut boxes = current.selected_boxes.clone();
                boxes.insert(box_index, identity.to_string());
                Ok(Some(ChannelPatch::selected_boxes(boxes)))
            })
            .await?;

        tracing::info!(
            "{} claimed box {} in channel {}",
            identity,
            box_index,
            committed.id
        );
        Ok(committed.selected_boxes)
    }

    /// Give back the caller's own claim while the channel is open.
    pub async fn release_box(&self, channel: &Channel, identity: &str) -> Result<BoxClaims> {
        let committed = self
            .repo
            .commit_checked(channel.clone(), self.config.max_write_retries, |current| {
                if Phase::of(current) != Phase::Open {
                    return Err(LotteryError::ChannelNotOpen);
                }

                let Some(held) = current.box_of(identity) else {
                    return Ok(None);
                };

                let mut boxes = current.selected_boxes.clone();
                boxes.remove(&held);
                Ok(Some(ChannelPatch::selected_boxes(boxes)))
            })
            .await?;

        tracing::info!("{} released their box in channel {}", identity, committed.id);
        Ok(committed.selected_boxes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MembershipManager;
    use boxdraw_core::MemoryStore;
    use std::sync::Arc;

    async fn setup() -> (BoxSelectionCoordinator, ChannelRepository, Channel) {
        let repo = ChannelRepository::new(Arc::new(MemoryStore::new()));
        let config = LotteryConfig::instant();
        let members = MembershipManager::new(repo.clone(), config.clone());

        let channel = members
            .create_channel("Movie Night", 4, "alice", "Alice")
            .await
            .unwrap();
        members.join(&channel, "bob", "Bob").await.unwrap();
        members.join(&channel, "carol", "Carol").await.unwrap();
        let channel = repo.get(&channel.id).await.unwrap();

        (
            BoxSelectionCoordinator::new(repo.clone(), config),
            repo,
            channel,
        )
    }

    #[tokio::test]
    async fn test_claim_and_reject_second_box() {
        let (coordinator, repo, channel) = setup().await;

        coordinator.select_box(&channel, 0, "alice").await.unwrap();
        let channel = repo.get(&channel.id).await.unwrap();
        let boxes = coordinator.select_box(&channel, 1, "bob").await.unwrap();
        assert_eq!(boxes.get(&0).map(String::as_str), Some("alice"));
        assert_eq!(boxes.get(&1).map(String::as_str), Some("bob"));

        let channel = repo.get(&channel.id).await.unwrap();
        let err = coordinator.select_box(&channel, 2, "bob").await.unwrap_err();
        assert!(matches!(err, LotteryError::AlreadySelected { box_index: 1 }));

        let after = repo.get(&channel.id).await.unwrap();
        assert_eq!(after.selected_boxes, boxes);
        assert_eq!(after.version, channel.version);
    }

    #[tokio::test]
    async fn test_claimed_and_out_of_range_boxes_unavailable() {
        let (coordinator, repo, channel) = setup().await;
        coordinator.select_box(&channel, 0, "alice").await.unwrap();
        let channel = repo.get(&channel.id).await.unwrap();

        assert!(matches!(
            coordinator.select_box(&channel, 0, "bob").await,
            Err(LotteryError::BoxUnavailable(0))
        ));
        assert!(matches!(
            coordinator.select_box(&channel, 4, "bob").await,
            Err(LotteryError::BoxUnavailable(4))
        ));
        assert!(matches!(
            coordinator.select_box(&channel, 1, "mallory").await,
            Err(LotteryError::NotAMember(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_snapshots_do_not_lose_claims() {
        let (coordinator, repo, channel) = setup().await;

        // both clients act on the same, soon stale, snapshot
        coordinator.select_box(&channel, 0, "alice").await.unwrap();
        coordinator.select_box(&channel, 1, "bob").await.unwrap();

        let after = repo.get(&channel.id).await.unwrap();
        assert_eq!(after.selected_boxes.len(), 2);
        assert_eq!(after.box_of("alice"), Some(0));
        assert_eq!(after.box_of("bob"), Some(1));
    }

    #[tokio::test]
    async fn test_race_on_same_box_has_one_winner() {
        let (coordinator, repo, channel) = setup().await;

        coordinator.select_box(&channel, 2, "alice").await.unwrap();
        let err = coordinator.select_box(&channel, 2, "bob").await.unwrap_err();

        assert!(matches!(err, LotteryError::BoxUnavailable(2)));
        let after = repo.get(&channel.id).await.unwrap();
        assert_eq!(after.box_owner(2).map(String::as_str), Some("alice"));
    }

    #[tokio::test]
    async fn test_concurrent_claims_all_land() {
        let (coordinator, repo, channel) = setup().await;

        let (a, b, c) = tokio::join!(
            coordinator.select_box(&channel, 0, "alice"),
            coordinator.select_box(&channel, 1, "bob"),
            coordinator.select_box(&channel, 2, "carol"),
        );
        a.unwrap();
        b.unwrap();
        c.unwrap();

        let after = repo.get(&channel.id).await.unwrap();
        assert_eq!(after.selected_boxes.len(), 3);
        assert!(after.check_invariants().is_ok());
    }

    #[tokio::test]
    async fn test_release_frees_own_box() {
        let (coordinator, repo, channel) = setup().await;
        coordinator.select_box(&channel, 3, "carol").await.unwrap();

        let channel = repo.get(&channel.id).await.unwrap();
        let boxes = coordinator.release_box(&channel, "carol").await.unwrap();
        assert!(boxes.is_empty());

        // releasing with nothing held is a no-op
        let channel = repo.get(&channel.id).await.unwrap();
        let version = channel.version;
        coordinator.release_box(&channel, "carol").await.unwrap();
        assert_eq!(repo.get(&channel.id).await.unwrap().version, version);
    }
}
