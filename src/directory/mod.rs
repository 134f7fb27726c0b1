//! Peer directory
//!
//! Live, deduplicated list of all known peers excluding self, annotated
//! with presence and last-active time. Holds exactly one subscription to
//! the profile collection; stream failures become a sticky error while the
//! previously-seen peers stay visible.

use std::sync::Arc;

use thiserror::Error;

use crate::models::{PeerProfile, UserId};
use crate::store::{DocumentStore, SnapshotEvent, StoreError, Subscription};

/// Peer-list subscription failure. Sticky until the next good snapshot
/// after a reconnect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("peer directory stream closed")]
    StreamClosed,
}

/// Live view of the peer collection, excluding the local user.
pub struct PeerDirectory {
    store: Arc<dyn DocumentStore>,
    self_id: UserId,
    peers: Vec<PeerProfile>,
    error: Option<DirectoryError>,
    sub: Option<Subscription<PeerProfile>>,
}

impl PeerDirectory {
    /// Subscribe to the profile collection for `self_id`'s view.
    pub fn new(store: Arc<dyn DocumentStore>, self_id: UserId) -> Self {
        let sub = store.watch_profiles();
        Self {
            store,
            self_id,
            peers: Vec::new(),
            error: None,
            sub: Some(sub),
        }
    }

    /// Current peer list, in store order.
    pub fn peers(&self) -> &[PeerProfile] {
        &self.peers
    }

    /// Sticky stream error, if any.
    pub fn error(&self) -> Option<&DirectoryError> {
        self.error.as_ref()
    }

    /// Re-establish the subscription after a stream failure.
    ///
    /// The sticky error clears on the next good snapshot.
    pub fn reconnect(&mut self) {
        if self.sub.is_none() {
            tracing::info!("reconnecting peer directory stream");
            self.sub = Some(self.store.watch_profiles());
        }
    }

    /// Wait for and apply the next snapshot or failure.
    ///
    /// Pends forever while no subscription is active, so it is safe to poll
    /// unconditionally from a `select!` loop.
    pub async fn next_event(&mut self) {
        let Some(sub) = self.sub.as_mut() else {
            return std::future::pending().await;
        };
        match sub.next().await {
            Some(SnapshotEvent::Snapshot(profiles)) => self.apply_snapshot(profiles),
            Some(SnapshotEvent::Lost(e)) => {
                tracing::warn!("peer directory stream lost: {}", e);
                // Unregister before exposing the failure; peers stay visible.
                self.sub = None;
                self.error = Some(DirectoryError::Store(e));
            }
            None => {
                self.sub = None;
                self.error = Some(DirectoryError::StreamClosed);
            }
        }
    }

    /// Rebuild the list from a full snapshot, filtering out self and
    /// preserving store order.
    fn apply_snapshot(&mut self, profiles: Vec<PeerProfile>) {
        self.peers = profiles
            .into_iter()
            .filter(|p| p.id != self.self_id)
            .collect();
        self.error = None;
    }

    #[cfg(test)]
    fn attach_for_tests(&mut self, sub: Subscription<PeerProfile>) {
        self.sub = Some(sub);
    }
}
