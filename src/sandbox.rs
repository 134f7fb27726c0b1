//! In-process sandbox backend
//!
//! Wires the bundled memory store and identity provider together and seeds
//! them with demo peers, including an echo peer whose own synchronizer
//! answers every incoming message. Lets the client run end to end without
//! any external services.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::auth::memory::MemoryIdentityProvider;
use crate::models::{PeerProfile, Presence, UserId};
use crate::store::memory::MemoryStore;
use crate::store::DocumentStore;
use crate::sync::{ConversationSync, SyncState};

/// Seeded sandbox backend.
pub struct Sandbox {
    pub store: MemoryStore,
    pub provider: Arc<MemoryIdentityProvider>,
    pub echo_id: UserId,
}

/// Build the sandbox: a couple of offline demo peers plus the echo peer.
pub async fn seed() -> Result<Sandbox> {
    let store = MemoryStore::new();
    let provider = Arc::new(MemoryIdentityProvider::new());

    for (id, email, name) in [
        ("peer-ada", "ada@example.com", "Ada"),
        ("peer-linus", "linus@example.com", "Linus"),
    ] {
        store
            .put_profile(PeerProfile::provisioned(
                id.to_string(),
                email.to_string(),
                name.to_string(),
            ))
            .await?;
        store
            .set_presence(&id.to_string(), Presence::Offline)
            .await?;
    }

    let echo_id = "peer-echo".to_string();
    store
        .put_profile(PeerProfile::provisioned(
            echo_id.clone(),
            "echo@example.com".to_string(),
            "Echo".to_string(),
        ))
        .await?;

    Ok(Sandbox {
        store,
        provider,
        echo_id,
    })
}

impl Sandbox {
    /// Spawn the echo peer's conversation loop against `user_id`.
    ///
    /// The echo peer runs a regular [`ConversationSync`], so incoming
    /// messages get marked read the same way any receiver marks them, and
    /// each one is answered once.
    pub async fn spawn_echo(&self, user_id: UserId) -> Result<()> {
        let store: Arc<dyn DocumentStore> = Arc::new(self.store.clone());
        let user = store
            .get_profile(&user_id)
            .await?
            .context("echo target has no profile")?;
        let echo_id = self.echo_id.clone();

        tokio::spawn(async move {
            let mut sync = ConversationSync::new(store, echo_id.clone());
            sync.select_peer(user);
            let mut answered: std::collections::HashSet<String> = std::collections::HashSet::new();

            loop {
                sync.next_event().await;
                match sync.state() {
                    SyncState::Synced => {}
                    SyncState::Error(e) => {
                        tracing::warn!("echo peer stream failed: {}", e);
                        return;
                    }
                    _ => continue,
                }

                let pending: Vec<(String, String)> = sync
                    .messages()
                    .iter()
                    .filter(|m| m.receiver_id == echo_id && !answered.contains(&m.id))
                    .map(|m| (m.id.clone(), m.text.clone()))
                    .collect();

                for (id, text) in pending {
                    answered.insert(id);
                    if let Err(e) = sync.send_message(&format!("echo: {}", text)).await {
                        tracing::warn!("echo reply failed: {}", e);
                    }
                }
            }
        });

        Ok(())
    }
}
