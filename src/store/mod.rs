//! Document store interface
//!
//! The remote store is an external collaborator; this module specifies the
//! contract the rest of the client programs against: atomic per-document
//! writes with server-assigned monotonic timestamps, and collection-scoped
//! subscriptions that push full result-set snapshots (not deltas). A bundled
//! in-process implementation lives in [`memory`].

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::models::{Message, MessageDraft, MessageId, ParticipantsPair, PeerProfile, Presence, UserId};

/// Errors surfaced by store operations and subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("no such document: {0}")]
    NotFound(String),
}

/// One element of a subscription stream.
#[derive(Debug)]
pub enum SnapshotEvent<T> {
    /// The current complete result set, superseding all prior results.
    Snapshot(Vec<T>),
    /// The underlying stream failed; the listener has been unregistered.
    Lost(StoreError),
}

/// Scoped-acquisition handle for a registered listener.
///
/// Dropping the guard unregisters the listener synchronously, so replacing a
/// subscription with a new one never leaves two live listeners.
pub struct WatchGuard {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl WatchGuard {
    pub(crate) fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Guard with no registration behind it, for hand-fed test streams.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self { cancel: None }
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// Lazy, infinite sequence of snapshots for one subscribed query.
///
/// The listener stays registered until the subscription is dropped.
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<SnapshotEvent<T>>,
    _guard: WatchGuard,
}

impl<T> Subscription<T> {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<SnapshotEvent<T>>, guard: WatchGuard) -> Self {
        Self { rx, _guard: guard }
    }

    /// Wait for the next snapshot or stream failure.
    ///
    /// Returns `None` only if the store itself went away.
    pub async fn next(&mut self) -> Option<SnapshotEvent<T>> {
        self.rx.recv().await
    }
}

/// Contract of the remote document store.
///
/// All mutation is via atomic per-document writes; concurrent idempotent
/// sets (presence flips, read flips) must be safe to repeat.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a single profile by user id.
    async fn get_profile(&self, user_id: &UserId) -> Result<Option<PeerProfile>, StoreError>;

    /// Create or replace a profile. The store stamps `last_active_at`.
    async fn put_profile(&self, profile: PeerProfile) -> Result<(), StoreError>;

    /// Flip a profile's presence, refreshing `last_active_at` with the
    /// store's clock.
    async fn set_presence(&self, user_id: &UserId, presence: Presence) -> Result<(), StoreError>;

    /// Append a message; the store assigns the id and a monotonic
    /// `created_at` timestamp.
    async fn append_message(&self, draft: MessageDraft) -> Result<MessageId, StoreError>;

    /// Flip a message's read flag to true. Idempotent.
    async fn mark_read(&self, message_id: &MessageId) -> Result<(), StoreError>;

    /// Subscribe to the full profile collection. The current snapshot is
    /// delivered on registration.
    fn watch_profiles(&self) -> Subscription<PeerProfile>;

    /// Subscribe to all messages whose participants pair equals `pair`,
    /// ordered by `created_at` ascending. The current snapshot is delivered
    /// on registration.
    fn watch_conversation(&self, pair: ParticipantsPair) -> Subscription<Message>;
}
