use crate::machine::Phase;
use crate::{ChannelRepository, LotteryError, Result};
use boxdraw_core::{Channel, ChannelId, ChannelPatch, DrawResult, LotteryConfig};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// In-place Fisher-Yates shuffle; every permutation is equally likely.
pub fn shuffle<T, R: Rng + ?Sized>(items: &mut [T], rng: &mut R) {
    for i in (1..items.len()).rev() {
        let j = rng.gen_range(0..=i);
        items.swap(i, j);
    }
}

/// Rank boxes in `order`, resolving claimants against `channel`.
pub fn build_results(channel: &Channel, order: &[u32]) -> Vec<DrawResult> {
    order
        .iter()
        .enumerate()
        .filter_map(|(rank, box_index)| {
            let user_id = channel.box_owner(*box_index)?;
            Some(DrawResult {
                position: rank as u32 + 1,
                box_index: *box_index,
                user_id: user_id.clone(),
                user_name: channel.display_name(user_id),
            })
        })
        .collect()
}

/// Admin-only draw and reset.
#[derive(Clone)]
pub struct DrawEngine {
    repo: ChannelRepository,
    config: LotteryConfig,
    rng: Arc<Mutex<StdRng>>,
}

impl DrawEngine {
    pub fn new(repo: ChannelRepository, config: LotteryConfig) -> Self {
        Self::with_rng(repo, config, StdRng::from_entropy())
    }

    /// Deterministic engine for reproducible draws.
    pub fn with_seed(repo: ChannelRepository, config: LotteryConfig, seed: u64) -> Self {
        Self::with_rng(repo, config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(repo: ChannelRepository, config: LotteryConfig, rng: StdRng) -> Self {
        Self {
            repo,
            config,
            rng: Arc::new(Mutex::new(rng)),
        }
    }

    /// Guards for `requester` starting a draw on `channel`.
    pub fn check_start(channel: &Channel, requester: &str) -> Result<()> {
        if !channel.is_admin(requester) {
            return Err(LotteryError::Unauthorized);
        }

        if Phase::of(channel) != Phase::Open {
            return Err(LotteryError::ChannelNotOpen);
        }

        if channel.selected_boxes.is_empty() {
            return Err(LotteryError::NoSelections);
        }

        Ok(())
    }

    /// Uniformly random order of the claimed boxes.
    pub fn permutation(&self, channel: &Channel) -> Vec<u32> {
        let mut order: Vec<u32> = channel.selected_boxes.keys().copied().collect();
        shuffle(&mut order, &mut *self.rng.lock());
        order
    }

    /// Start a draw. The results are committed after the settle delay unless
    /// the returned [`PendingDraw`] is cancelled or dropped first.
    pub fn start_draw(&self, channel: &Channel, requester: &str) -> Result<PendingDraw> {
        Self::check_start(channel, requester)?;

        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let engine = self.clone();
        let start = channel.clone();
        let channel_id = channel.id.clone();

        tracing::info!(
            "Draw started in channel {} over {} boxes",
            channel.id,
            channel.claimed_count()
        );

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(engine.config.settle_delay) => {}
                _ = &mut cancel_rx => {
                    tracing::warn!("Draw in channel {} cancelled before commit", start.id);
                    return Err(LotteryError::DrawCancelled);
                }
            }

            engine.commit(start).await
        });

        Ok(PendingDraw {
            channel_id,
            cancel: Some(cancel_tx),
            handle,
        })
    }

    async fn commit(&self, start: Channel) -> Result<Channel> {
        let order = self.permutation(&start);

        let committed = self
            .repo
            .commit_checked(start.clone(), self.config.max_write_retries, |current| {
                if current.is_drawn {
                    // already drawn by an earlier commit; late delivery is ignored
                    return Ok(None);
                }

                if current.selected_boxes != start.selected_boxes {
                    return Err(LotteryError::SelectionsChanged);
                }

                Ok(Some(ChannelPatch::drawn(build_results(current, &order))))
            })
            .await;

        match &committed {
            Ok(channel) => tracing::info!(
                "Draw committed in channel {}: {} results",
                channel.id,
                channel.results.len()
            ),
            Err(e) => tracing::warn!("Draw in channel {} failed: {}", start.id, e),
        }

        committed
    }

    /// Clear claims and results; members are kept.
    pub async fn reset(&self, channel: &Channel, requester: &str) -> Result<Channel> {
        if !channel.is_admin(requester) {
            return Err(LotteryError::Unauthorized);
        }

        let committed = self
            .repo
            .commit_checked(channel.clone(), self.config.max_write_retries, |_| {
                Ok(Some(ChannelPatch::reset()))
            })
            .await?;

        tracing::info!("Channel {} reset by {}", committed.id, requester);
        Ok(committed)
    }
}

/// A draw waiting out its settle delay.
///
/// Dropping it cancels the draw if the results have not been written yet.
#[derive(Debug)]
pub struct PendingDraw {
    channel_id: ChannelId,
    cancel: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<Channel>>,
}

impl PendingDraw {
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn cancel(mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }

    /// Wait for the commit and return the drawn snapshot.
    pub async fn wait(mut self) -> Result<Channel> {
        (&mut self.handle).await?
    }
}
