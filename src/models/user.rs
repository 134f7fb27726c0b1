//! User-related models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifier assigned by the identity provider.
pub type UserId = String;

/// Authenticated identity, owned by the identity provider.
///
/// Immutable except `display_name`; lifecycle bound to account existence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: UserId,
    pub email: String,
    pub display_name: String,
}

/// Binary presence mirrored into a peer's profile at sign-in/sign-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Online,
    Offline,
}

impl Presence {
    pub fn is_online(&self) -> bool {
        matches!(self, Presence::Online)
    }
}

/// Profile record in the peer collection, one per registered identity.
///
/// Created on first successful authentication (self-provisioning), mutated
/// on every sign-in and sign-out, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerProfile {
    pub id: UserId,
    pub display_name: String,
    pub email: String,
    pub avatar_url: String,
    pub presence: Presence,
    pub last_active_at: DateTime<Utc>,
}

impl PeerProfile {
    /// Build a fresh online profile with the default avatar.
    pub fn provisioned(id: UserId, email: String, display_name: String) -> Self {
        let avatar_url = default_avatar_url(&display_name);
        Self {
            id,
            display_name,
            email,
            avatar_url,
            presence: Presence::Online,
            last_active_at: Utc::now(),
        }
    }
}

/// Default avatar for profiles provisioned without one.
pub fn default_avatar_url(display_name: &str) -> String {
    format!(
        "https://ui-avatars.com/api/?name={}&background=random",
        display_name.replace(' ', "+")
    )
}
