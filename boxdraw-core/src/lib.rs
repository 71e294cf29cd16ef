//! boxdraw core - shared channel documents for box-draw lotteries
//!
//! This library provides the channel data model, the [`SharedStore`]
//! abstraction with in-memory and SQLite implementations, and the
//! per-session [`IdentityProvider`] consumed by the lottery engine.

pub mod config;
pub mod error;
pub mod identity;
pub mod store;
pub mod types;

pub use config::LotteryConfig;
pub use error::{CoreError, Result};
pub use identity::{IdentityProvider, SessionIdentity, StaticIdentity};
pub use store::{Broker, MemoryStore, SharedStore, SqliteStore, Subscription};
pub use types::{
    BoxClaims, Channel, ChannelId, ChannelPatch, ChannelSummary, DrawResult, Member, NewChannel,
    UserId,
};
