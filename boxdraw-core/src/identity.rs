use crate::types::UserId;
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Source of the per-session user identity.
pub trait IdentityProvider: Send + Sync {
    fn user_id(&self) -> UserId;
}

/// Random `User_xxxxxx` identity, stable for the lifetime of the value.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    id: UserId,
}

impl SessionIdentity {
    pub fn generate() -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(6)
            .map(|c| char::from(c).to_ascii_lowercase())
            .collect();

        Self {
            id: format!("User_{}", suffix),
        }
    }
}

impl Default for SessionIdentity {
    fn default() -> Self {
        Self::generate()
    }
}

impl IdentityProvider for SessionIdentity {
    fn user_id(&self) -> UserId {
        self.id.clone()
    }
}

/// Caller-chosen identity.
#[derive(Debug, Clone)]
pub struct StaticIdentity(pub UserId);

impl IdentityProvider for StaticIdentity {
    fn user_id(&self) -> UserId {
        self.0.clone()
    }
}
