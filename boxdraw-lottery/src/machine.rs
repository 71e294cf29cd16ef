use crate::draw::{DrawEngine, PendingDraw};
use crate::selection::{check_selection, BoxSelectionCoordinator};
use crate::{ChannelRepository, LotteryError, MembershipManager, Result};
use boxdraw_core::{
    BoxClaims, Channel, ChannelSummary, IdentityProvider, LotteryConfig, SharedStore,
    Subscription, UserId,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Lifecycle of one lottery round.
///
/// `Open -> Drawing -> Drawn -> Open (reset)`. `Drawing` only exists on the
/// client that started the draw; the store only records `is_drawn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Open,
    Drawing,
    Drawn,
}

impl Phase {
    /// Phase as recorded in a committed snapshot.
    pub fn of(channel: &Channel) -> Self {
        if channel.is_drawn {
            Phase::Drawn
        } else {
            Phase::Open
        }
    }

    /// Phase seen by a client that may have a draw settling.
    pub fn derive(channel: &Channel, drawing: bool) -> Self {
        match Self::of(channel) {
            Phase::Open if drawing => Phase::Drawing,
            phase => phase,
        }
    }
}

/// Entry point for a client: composes the repository, membership, box
/// selection and draw components around one identity.
#[derive(Clone)]
pub struct ChannelStateMachine {
    repo: ChannelRepository,
    members: MembershipManager,
    boxes: BoxSelectionCoordinator,
    draws: DrawEngine,
    identity: Arc<dyn IdentityProvider>,
}

impl ChannelStateMachine {
    pub fn new(
        store: Arc<dyn SharedStore>,
        identity: Arc<dyn IdentityProvider>,
        config: LotteryConfig,
    ) -> Self {
        let repo = ChannelRepository::new(store);
        let draws = DrawEngine::new(repo.clone(), config.clone());
        Self::assemble(repo, draws, identity, config)
    }

    /// Same as [`new`](Self::new) with a seeded draw engine.
    pub fn with_seed(
        store: Arc<dyn SharedStore>,
        identity: Arc<dyn IdentityProvider>,
        config: LotteryConfig,
        seed: u64,
    ) -> Self {
        let repo = ChannelRepository::new(store);
        let draws = DrawEngine::with_seed(repo.clone(), config.clone(), seed);
        Self::assemble(repo, draws, identity, config)
    }

    fn assemble(
        repo: ChannelRepository,
        draws: DrawEngine,
        identity: Arc<dyn IdentityProvider>,
        config: LotteryConfig,
    ) -> Self {
        Self {
            members: MembershipManager::new(repo.clone(), config.clone()),
            boxes: BoxSelectionCoordinator::new(repo.clone(), config),
            repo,
            draws,
            identity,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.identity.user_id()
    }

    pub fn repository(&self) -> &ChannelRepository {
        &self.repo
    }

    pub fn membership(&self) -> &MembershipManager {
        &self.members
    }

    pub fn selection(&self) -> &BoxSelectionCoordinator {
        &self.boxes
    }

    pub fn draw_engine(&self) -> &DrawEngine {
        &self.draws
    }

    pub async fn list_channels(&self) -> Result<Vec<ChannelSummary>> {
        self.repo.list().await
    }

    /// Create a channel administered by this identity and open it.
    pub async fn create_channel(
        &self,
        name: &str,
        capacity: u32,
        display_name: &str,
    ) -> Result<ChannelSession> {
        let channel = self
            .members
            .create_channel(name, capacity, &self.user_id(), display_name)
            .await?;
        self.open(&channel.id).await
    }

    /// Join (or re-enter) a channel and open it.
    pub async fn join_channel(
        &self,
        channel_id: &str,
        display_name: &str,
    ) -> Result<ChannelSession> {
        let latest = self.repo.get(channel_id).await?;
        self.members
            .join(&latest, &self.user_id(), display_name)
            .await?;
        self.open(channel_id).await
    }

    /// Attach to a channel's snapshot stream without joining it.
    pub async fn open(&self, channel_id: &str) -> Result<ChannelSession> {
        let mut subscription = self.repo.subscribe(channel_id).await?;
        let view = subscription
            .next()
            .await
            .ok_or_else(|| LotteryError::ChannelNotFound(channel_id.to_string()))?;

        Ok(ChannelSession {
            machine: self.clone(),
            user_id: self.user_id(),
            subscription,
            view,
            pending_draw: None,
        })
    }

    /// Admin-only removal of the whole channel.
    pub async fn delete_channel(&self, channel_id: &str) -> Result<()> {
        let latest = self.repo.get(channel_id).await?;
        if !latest.is_admin(&self.user_id()) {
            return Err(LotteryError::Unauthorized);
        }

        self.repo.delete(channel_id).await?;
        tracing::info!("Channel {} deleted by {}", channel_id, self.user_id());
        Ok(())
    }
}

/// One client's attachment to a channel.
///
/// Holds the live subscription, the local view and any draw this client has
/// started. Dropping the session unsubscribes and cancels a settling draw.
pub struct ChannelSession {
    machine: ChannelStateMachine,
    user_id: UserId,
    subscription: Subscription,
    view: Channel,
    pending_draw: Option<PendingDraw>,
}

impl ChannelSession {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn channel_id(&self) -> &str {
        self.subscription.channel_id()
    }

    /// Local view; call [`sync`](Self::sync) to pull queued snapshots first.
    pub fn channel(&self) -> &Channel {
        &self.view
    }

    pub fn is_admin(&self) -> bool {
        self.view.is_admin(&self.user_id)
    }

    pub fn is_drawing(&self) -> bool {
        self.pending_draw
            .as_ref()
            .is_some_and(|draw| !draw.is_finished())
    }

    pub fn phase(&self) -> Phase {
        Phase::derive(&self.view, self.is_drawing())
    }

    /// Apply every snapshot already delivered.
    pub fn sync(&mut self) -> &Channel {
        if let Some(latest) = self.subscription.latest() {
            if latest.version >= self.view.version {
                self.view = latest.clone();
            }
        }
        &self.view
    }

    /// Wait for the next committed snapshot. `None` once the channel is gone.
    pub async fn next_snapshot(&mut self) -> Option<&Channel> {
        let channel = self.subscription.next().await?;
        self.view = channel;
        Some(&self.view)
    }

    /// Claim a box. The local view shows the claim immediately and is rolled
    /// back if the write is rejected or fails.
    pub async fn select_box(&mut self, box_index: u32) -> Result<BoxClaims> {
        self.sync();
        if self.phase() != Phase::Open {
            return Err(LotteryError::ChannelNotOpen);
        }
        check_selection(&self.view, box_index, &self.user_id)?;

        let snapshot = self.view.clone();
        self.view
            .selected_boxes
            .insert(box_index, self.user_id.clone());

        match self
            .machine
            .boxes
            .select_box(&snapshot, box_index, &self.user_id)
            .await
        {
            Ok(boxes) => {
                self.sync();
                Ok(boxes)
            }
            Err(e) => {
                tracing::warn!(
                    "Claim of box {} in channel {} failed: {}",
                    box_index,
                    snapshot.id,
                    e
                );
                self.view.selected_boxes = snapshot.selected_boxes;
                self.sync();
                Err(e)
            }
        }
    }

    pub async fn release_box(&mut self) -> Result<BoxClaims> {
        self.sync();
        if self.phase() == Phase::Drawing {
            return Err(LotteryError::ChannelNotOpen);
        }

        let boxes = self
            .machine
            .boxes
            .release_box(&self.view, &self.user_id)
            .await?;
        self.sync();
        Ok(boxes)
    }

    /// Start a draw as admin. Guards run against a freshly read snapshot.
    pub async fn start_draw(&mut self) -> Result<()> {
        if self.is_drawing() {
            return Err(LotteryError::ChannelNotOpen);
        }

        let latest = self.machine.repo.get(self.channel_id()).await?;
        let pending = self.machine.draws.start_draw(&latest, &self.user_id)?;
        self.pending_draw = Some(pending);
        Ok(())
    }

    /// Wait for this client's draw to commit.
    pub async fn wait_for_draw(&mut self) -> Result<Channel> {
        let pending = self
            .pending_draw
            .take()
            .ok_or(LotteryError::ChannelNotOpen)?;

        let drawn = pending.wait().await?;
        self.sync();
        if drawn.version > self.view.version {
            self.view = drawn.clone();
        }
        Ok(drawn)
    }

    pub fn cancel_draw(&mut self) {
        if let Some(pending) = self.pending_draw.take() {
            pending.cancel();
        }
    }

    /// Clear the round as admin, cancelling a draw this client has settling.
    pub async fn reset(&mut self) -> Result<Channel> {
        let latest = self.machine.repo.get(self.channel_id()).await?;
        let reset = self.machine.draws.reset(&latest, &self.user_id).await?;

        self.cancel_draw();
        self.sync();
        if reset.version > self.view.version {
            self.view = reset.clone();
        }
        Ok(reset)
    }

    /// Detach locally. Membership in the stored channel is kept.
    pub fn leave(mut self) {
        self.cancel_draw();
        tracing::info!("{} left channel {}", self.user_id, self.view.id);
        self.subscription.unsubscribe();
    }
}

impl std::fmt::Debug for ChannelSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSession")
            .field("channel_id", &self.view.id)
            .field("user_id", &self.user_id)
            .field("version", &self.view.version)
            .field("phase", &self.phase())
            .finish()
    }
}
