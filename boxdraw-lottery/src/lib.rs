//! Box-draw lottery coordination
//!
//! Several clients join a shared channel, each claims one exclusive box, and
//! the channel admin draws a random ranking of the claimed boxes. All state
//! lives in a [`boxdraw_core::SharedStore`]; every client observes the same
//! sequence of committed snapshots.

pub mod draw;
pub mod error;
pub mod machine;
pub mod membership;
pub mod repository;
pub mod selection;

pub use draw::{build_results, shuffle, DrawEngine, PendingDraw};
pub use error::{LotteryError, Result};
pub use machine::{ChannelSession, ChannelStateMachine, Phase};
pub use membership::MembershipManager;
pub use repository::{ChannelRepository, Commit};
pub use selection::{check_selection, BoxSelectionCoordinator};

use boxdraw_core::{IdentityProvider, LotteryConfig, MemoryStore};
use std::sync::Arc;

/// State machine over a fresh in-process store, for single-process use.
pub fn in_memory(
    identity: Arc<dyn IdentityProvider>,
    config: LotteryConfig,
) -> ChannelStateMachine {
    ChannelStateMachine::new(Arc::new(MemoryStore::new()), identity, config)
}
