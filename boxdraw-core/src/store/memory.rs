use super::{Broker, SharedStore, Subscription};
use crate::error::{CoreError, Result};
use crate::types::{Channel, ChannelId, ChannelPatch, NewChannel};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    channels: HashMap<ChannelId, Channel>,
    // creation order, used as the tie-break for equal timestamps
    order: Vec<ChannelId>,
}

/// Process-local store. Every operation is atomic under one lock.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    broker: Broker,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.lock().channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn create(&self, channel: NewChannel) -> Result<ChannelId> {
        let id = Uuid::new_v4().to_string();
        let doc = Channel::from_new(id.clone(), channel, Utc::now());

        let mut state = self.state.lock();
        state.channels.insert(id.clone(), doc);
        state.order.push(id.clone());

        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<Option<Channel>> {
        Ok(self.state.lock().channels.get(id).cloned())
    }

    async fn update(
        &self,
        id: &str,
        patch: ChannelPatch,
        expected_version: Option<u64>,
    ) -> Result<Channel> {
        let mut state = self.state.lock();
        let doc = state
            .channels
            .get_mut(id)
            .ok_or_else(|| CoreError::not_found(id))?;

        if let Some(expected) = expected_version {
            if doc.version != expected {
                return Err(CoreError::VersionConflict {
                    expected,
                    actual: doc.version,
                });
            }
        }

        patch.apply(doc, Utc::now());
        let committed = doc.clone();

        // publish before releasing the lock so commit order == delivery order
        self.broker.publish(&committed);
        Ok(committed)
    }

    async fn subscribe(&self, id: &str) -> Result<Subscription> {
        let state = self.state.lock();
        let current = state
            .channels
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(id))?;

        Ok(self.broker.subscribe(current))
    }

    async fn list(&self) -> Result<Vec<Channel>> {
        let state = self.state.lock();
        let mut channels: Vec<Channel> = state
            .order
            .iter()
            .rev()
            .filter_map(|id| state.channels.get(id).cloned())
            .collect();
        channels.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(channels)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.channels.remove(id).is_none() {
            return Err(CoreError::not_found(id));
        }
        state.order.retain(|c| c != id);
        self.broker.close(id);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoxClaims, Member};

    fn new_channel(name: &str) -> NewChannel {
        NewChannel {
            name: name.to_string(),
            admin_id: "alice".to_string(),
            max_users: 4,
            users: vec![Member::admin("alice", "Alice")],
            selected_boxes: BoxClaims::new(),
            results: Vec::new(),
            is_drawn: false,
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemoryStore::new();
        let id = store.create(new_channel("Movie Night")).await.unwrap();

        let channel = store.get(&id).await.unwrap().unwrap();
        assert_eq!(channel.id, id);
        assert_eq!(channel.name, "Movie Night");
        assert_eq!(channel.version, 1);
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_conditional_update_rejects_stale_version() {
        let store = MemoryStore::new();
        let id = store.create(new_channel("Race")).await.unwrap();

        let mut first = BoxClaims::new();
        first.insert(0, "alice".to_string());
        store
            .update(&id, ChannelPatch::selected_boxes(first.clone()), Some(1))
            .await
            .unwrap();

        let mut second = BoxClaims::new();
        second.insert(1, "bob".to_string());
        let err = store
            .update(&id, ChannelPatch::selected_boxes(second), Some(1))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CoreError::VersionConflict {
                expected: 1,
                actual: 2
            }
        ));
        let channel = store.get(&id).await.unwrap().unwrap();
        assert_eq!(channel.selected_boxes, first);
    }

    #[tokio::test]
    async fn test_subscribers_see_commits_in_order() {
        let store = MemoryStore::new();
        let id = store.create(new_channel("Order")).await.unwrap();
        let mut sub = store.subscribe(&id).await.unwrap();

        for i in 0..3u32 {
            let mut boxes = BoxClaims::new();
            boxes.insert(i, "alice".to_string());
            store
                .update(&id, ChannelPatch::selected_boxes(boxes), None)
                .await
                .unwrap();
        }

        let versions: Vec<u64> = [
            sub.next().await.unwrap(),
            sub.next().await.unwrap(),
            sub.next().await.unwrap(),
            sub.next().await.unwrap(),
        ]
        .iter()
        .map(|c| c.version)
        .collect();
        assert_eq!(versions, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let store = MemoryStore::new();
        let first = store.create(new_channel("first")).await.unwrap();
        let second = store.create(new_channel("second")).await.unwrap();

        let ids: Vec<ChannelId> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![second, first]);
    }

    #[tokio::test]
    async fn test_delete_ends_subscriptions() {
        let store = MemoryStore::new();
        let id = store.create(new_channel("gone")).await.unwrap();
        let mut sub = store.subscribe(&id).await.unwrap();

        store.delete(&id).await.unwrap();

        assert!(sub.next().await.is_some());
        assert!(sub.next().await.is_none());
        assert!(store.is_empty());
        assert!(matches!(
            store.update(&id, ChannelPatch::reset(), None).await,
            Err(CoreError::ChannelNotFound(_))
        ));
    }
}
