use crate::types::{Channel, ChannelId};
use futures::Stream;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

struct Subscriber {
    tx: mpsc::UnboundedSender<Channel>,
    last_version: u64,
}

/// In-process fan-out of committed channel documents.
///
/// Each subscriber only ever receives strictly increasing versions, so a
/// document published twice (e.g. by a writer and by a poller) is delivered once.
#[derive(Default)]
pub struct Broker {
    topics: Mutex<HashMap<ChannelId, Vec<Subscriber>>>,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber and hand it `current` as its first snapshot.
    ///
    /// Callers must hold their store's write lock so no commit can land between
    /// reading `current` and registering.
    pub fn subscribe(&self, current: Channel) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel_id = current.id.clone();
        let last_version = current.version;

        // receiver is alive, cannot fail
        let _ = tx.send(current);

        self.topics
            .lock()
            .entry(channel_id.clone())
            .or_default()
            .push(Subscriber { tx, last_version });

        tracing::debug!("New subscriber for channel {}", channel_id);

        Subscription {
            channel_id,
            rx,
            latest: None,
        }
    }

    pub fn publish(&self, channel: &Channel) {
        let mut topics = self.topics.lock();
        let Some(subscribers) = topics.get_mut(&channel.id) else {
            return;
        };

        subscribers.retain_mut(|sub| {
            if channel.version <= sub.last_version {
                return !sub.tx.is_closed();
            }
            sub.last_version = channel.version;
            sub.tx.send(channel.clone()).is_ok()
        });

        if subscribers.is_empty() {
            topics.remove(&channel.id);
        }
    }

    /// End every subscription to `channel_id`.
    pub fn close(&self, channel_id: &str) {
        if self.topics.lock().remove(channel_id).is_some() {
            tracing::debug!("Closed subscriptions for channel {}", channel_id);
        }
    }

    pub fn subscriber_count(&self, channel_id: &str) -> usize {
        let mut topics = self.topics.lock();
        let Some(subscribers) = topics.get_mut(channel_id) else {
            return 0;
        };

        subscribers.retain(|sub| !sub.tx.is_closed());
        let count = subscribers.len();
        if count == 0 {
            topics.remove(channel_id);
        }
        count
    }
}

/// Live view of one channel. Dropping it unsubscribes.
pub struct Subscription {
    channel_id: ChannelId,
    rx: mpsc::UnboundedReceiver<Channel>,
    latest: Option<Channel>,
}

impl Subscription {
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Wait for the next committed snapshot. `None` once the channel is deleted.
    pub async fn next(&mut self) -> Option<Channel> {
        let channel = self.rx.recv().await?;
        self.latest = Some(channel.clone());
        Some(channel)
    }

    /// Next snapshot if one is already queued.
    pub fn try_next(&mut self) -> Option<Channel> {
        let channel = self.rx.try_recv().ok()?;
        self.latest = Some(channel.clone());
        Some(channel)
    }

    /// Drain everything queued and return the newest snapshot seen so far.
    pub fn latest(&mut self) -> Option<&Channel> {
        while self.try_next().is_some() {}
        self.latest.as_ref()
    }

    pub fn unsubscribe(mut self) {
        self.rx.close();
    }
}

impl Stream for Subscription {
    type Item = Channel;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(channel)) => {
                self.latest = Some(channel.clone());
                Poll::Ready(Some(channel))
            }
            other => other,
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel_id", &self.channel_id)
            .field("latest_version", &self.latest.as_ref().map(|c| c.version))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoxClaims, Member, NewChannel};
    use chrono::Utc;

    fn channel(version: u64) -> Channel {
        let new = NewChannel {
            name: "Test".to_string(),
            admin_id: "a".to_string(),
            max_users: 3,
            users: vec![Member::admin("a", "A")],
            selected_boxes: BoxClaims::new(),
            results: Vec::new(),
            is_drawn: false,
        };
        let mut channel = Channel::from_new("c1".to_string(), new, Utc::now());
        channel.version = version;
        channel
    }

    #[tokio::test]
    async fn test_delivers_current_then_commits_in_order() {
        let broker = Broker::new();
        let mut sub = broker.subscribe(channel(1));

        broker.publish(&channel(2));
        broker.publish(&channel(3));

        assert_eq!(sub.next().await.unwrap().version, 1);
        assert_eq!(sub.next().await.unwrap().version, 2);
        assert_eq!(sub.next().await.unwrap().version, 3);
    }

    #[tokio::test]
    async fn test_stale_and_duplicate_versions_are_skipped() {
        let broker = Broker::new();
        let mut sub = broker.subscribe(channel(2));

        broker.publish(&channel(2));
        broker.publish(&channel(1));
        broker.publish(&channel(3));

        assert_eq!(sub.next().await.unwrap().version, 2);
        assert_eq!(sub.next().await.unwrap().version, 3);
        assert!(sub.try_next().is_none());
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_pruned() {
        let broker = Broker::new();
        let sub = broker.subscribe(channel(1));
        let _other = broker.subscribe(channel(1));
        assert_eq!(broker.subscriber_count("c1"), 2);

        sub.unsubscribe();
        assert_eq!(broker.subscriber_count("c1"), 1);
    }

    #[tokio::test]
    async fn test_close_ends_stream() {
        let broker = Broker::new();
        let mut sub = broker.subscribe(channel(1));
        broker.close("c1");

        assert_eq!(sub.next().await.unwrap().version, 1);
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_latest_drains_queue() {
        let broker = Broker::new();
        let mut sub = broker.subscribe(channel(1));
        broker.publish(&channel(2));
        broker.publish(&channel(5));

        assert_eq!(sub.latest().map(|c| c.version), Some(5));
    }
}
