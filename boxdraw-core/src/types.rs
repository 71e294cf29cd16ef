use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type ChannelId = String;
pub type UserId = String;

/// Box index -> claimant.
pub type BoxClaims = BTreeMap<u32, UserId>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: UserId,
    pub name: String,
    pub is_admin: bool,
}

impl Member {
    pub fn admin(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_admin: true,
        }
    }

    pub fn participant(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_admin: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawResult {
    /// 1-based rank
    pub position: u32,
    pub box_index: u32,
    pub user_id: UserId,
    pub user_name: String,
}

/// A channel document as committed to the shared store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub admin_id: UserId,
    pub max_users: u32,
    pub users: Vec<Member>,
    #[serde(default)]
    pub selected_boxes: BoxClaims,
    #[serde(default)]
    pub results: Vec<DrawResult>,
    #[serde(default)]
    pub is_drawn: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl Channel {
    /// Build the committed document from a creation request.
    pub fn from_new(id: ChannelId, new: NewChannel, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: new.name,
            admin_id: new.admin_id,
            max_users: new.max_users,
            users: new.users,
            selected_boxes: new.selected_boxes,
            results: new.results,
            is_drawn: new.is_drawn,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    pub fn member(&self, user_id: &str) -> Option<&Member> {
        self.users.iter().find(|m| m.id == user_id)
    }

    pub fn is_member(&self, user_id: &str) -> bool {
        self.member(user_id).is_some()
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admin_id == user_id
    }

    pub fn is_full(&self) -> bool {
        self.users.len() >= self.max_users as usize
    }

    pub fn box_owner(&self, box_index: u32) -> Option<&UserId> {
        self.selected_boxes.get(&box_index)
    }

    /// The box currently claimed by `user_id`, if any.
    pub fn box_of(&self, user_id: &str) -> Option<u32> {
        self.selected_boxes
            .iter()
            .find(|(_, owner)| owner.as_str() == user_id)
            .map(|(index, _)| *index)
    }

    pub fn claimed_count(&self) -> usize {
        self.selected_boxes.len()
    }

    /// Display name for a member, falling back to "Unknown".
    pub fn display_name(&self, user_id: &str) -> String {
        self.member(user_id)
            .map(|m| m.name.clone())
            .unwrap_or_else(|| "Unknown".to_string())
    }

    pub fn summary(&self) -> ChannelSummary {
        ChannelSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            admin_id: self.admin_id.clone(),
            member_count: self.users.len(),
            max_users: self.max_users,
            claimed_boxes: self.selected_boxes.len(),
            is_drawn: self.is_drawn,
            created_at: self.created_at,
        }
    }

    /// Checks the document-level invariants every snapshot must satisfy.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        if self.users.len() > self.max_users as usize {
            return Err(format!(
                "{} users exceed capacity {}",
                self.users.len(),
                self.max_users
            ));
        }

        let mut owners: Vec<&UserId> = self.selected_boxes.values().collect();
        owners.sort();
        if owners.windows(2).any(|w| w[0] == w[1]) {
            return Err("a user holds more than one box".to_string());
        }

        if !self.is_drawn && !self.results.is_empty() {
            return Err("results present before the draw".to_string());
        }

        let admins: Vec<&Member> = self.users.iter().filter(|m| m.is_admin).collect();
        if admins.len() != 1 || admins[0].id != self.admin_id {
            return Err("admin flag does not match admin id".to_string());
        }

        Ok(())
    }
}

/// Creation request; the store assigns id, timestamps and version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewChannel {
    pub name: String,
    pub admin_id: UserId,
    pub max_users: u32,
    pub users: Vec<Member>,
    pub selected_boxes: BoxClaims,
    pub results: Vec<DrawResult>,
    pub is_drawn: bool,
}

/// Top-level field merge. Every `Some` field replaces the stored value wholesale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelPatch {
    pub users: Option<Vec<Member>>,
    pub selected_boxes: Option<BoxClaims>,
    pub results: Option<Vec<DrawResult>>,
    pub is_drawn: Option<bool>,
}

impl ChannelPatch {
    pub fn users(users: Vec<Member>) -> Self {
        Self {
            users: Some(users),
            ..Default::default()
        }
    }

    pub fn selected_boxes(boxes: BoxClaims) -> Self {
        Self {
            selected_boxes: Some(boxes),
            ..Default::default()
        }
    }

    pub fn drawn(results: Vec<DrawResult>) -> Self {
        Self {
            results: Some(results),
            is_drawn: Some(true),
            ..Default::default()
        }
    }

    pub fn reset() -> Self {
        Self {
            selected_boxes: Some(BoxClaims::new()),
            results: Some(Vec::new()),
            is_drawn: Some(false),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_none()
            && self.selected_boxes.is_none()
            && self.results.is_none()
            && self.is_drawn.is_none()
    }

    /// Merge into `channel`, stamping `updated_at` and bumping `version`.
    pub fn apply(self, channel: &mut Channel, now: DateTime<Utc>) {
        if let Some(users) = self.users {
            channel.users = users;
        }
        if let Some(boxes) = self.selected_boxes {
            channel.selected_boxes = boxes;
        }
        if let Some(results) = self.results {
            channel.results = results;
        }
        if let Some(is_drawn) = self.is_drawn {
            channel.is_drawn = is_drawn;
        }
        channel.updated_at = now;
        channel.version += 1;
    }
}

/// Lobby view of a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSummary {
    pub id: ChannelId,
    pub name: String,
    pub admin_id: UserId,
    pub member_count: usize,
    pub max_users: u32,
    pub claimed_boxes: usize,
    pub is_drawn: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Channel {
        let new = NewChannel {
            name: "Movie Night".to_string(),
            admin_id: "alice".to_string(),
            max_users: 4,
            users: vec![Member::admin("alice", "Alice")],
            selected_boxes: BoxClaims::new(),
            results: Vec::new(),
            is_drawn: false,
        };
        Channel::from_new("c1".to_string(), new, Utc::now())
    }

    #[test]
    fn test_patch_replaces_only_given_fields() {
        let mut channel = sample();
        let mut boxes = BoxClaims::new();
        boxes.insert(2, "alice".to_string());

        ChannelPatch::selected_boxes(boxes.clone()).apply(&mut channel, Utc::now());

        assert_eq!(channel.selected_boxes, boxes);
        assert_eq!(channel.users.len(), 1);
        assert_eq!(channel.version, 2);
        assert_eq!(channel.box_of("alice"), Some(2));
    }

    #[test]
    fn test_reset_patch_keeps_users() {
        let mut channel = sample();
        channel.users.push(Member::participant("bob", "Bob"));
        channel.selected_boxes.insert(0, "bob".to_string());
        let users = channel.users.clone();

        ChannelPatch::reset().apply(&mut channel, Utc::now());

        assert!(channel.selected_boxes.is_empty());
        assert!(channel.results.is_empty());
        assert!(!channel.is_drawn);
        assert_eq!(channel.users, users);
    }

    #[test]
    fn test_invariants_detect_double_claim() {
        let mut channel = sample();
        assert!(channel.check_invariants().is_ok());

        channel.selected_boxes.insert(0, "alice".to_string());
        channel.selected_boxes.insert(1, "alice".to_string());
        assert!(channel.check_invariants().is_err());
    }

    #[test]
    fn test_document_uses_camel_case_keys() {
        let mut channel = sample();
        channel.selected_boxes.insert(3, "alice".to_string());
        let json = serde_json::to_value(&channel).unwrap();

        assert_eq!(json["adminId"], "alice");
        assert_eq!(json["selectedBoxes"]["3"], "alice");
        assert_eq!(json["isDrawn"], false);

        let back: Channel = serde_json::from_value(json).unwrap();
        assert_eq!(back, channel);
    }
}
