//! Conversation synchronizer
//!
//! Owns the one live subscription to a two-party message stream and
//! reconstructs the ordered, deduplicated conversation log from the full
//! snapshots the store pushes. One synchronizer instance corresponds to at
//! most one (self, peer) pair at a time; switching peers tears the old
//! subscription down before the new one is registered, so messages from the
//! old conversation can never bleed into the new view.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use crate::models::{Message, MessageDraft, MessageId, ParticipantsPair, PeerProfile, UserId};
use crate::store::{DocumentStore, SnapshotEvent, StoreError, Subscription};

/// Conversation subscription failure. Retried only by user action
/// (reselecting the peer), never in a loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("conversation stream closed")]
    StreamClosed,
}

/// Send failure. The caller keeps the input text; resending is the user's
/// responsibility since an automatic retry could duplicate the message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("message text is empty")]
    EmptyText,
    #[error("no conversation selected")]
    NoPeer,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Synchronizer lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncState {
    /// No peer selected.
    #[default]
    Idle,
    /// Subscription established, first snapshot not yet received.
    Loading,
    /// Live; local log matches the last-seen snapshot.
    Synced,
    /// Subscription failed; the listener has already been released.
    Error(SyncError),
}

/// Owned per-conversation state machine.
///
/// Not re-entrant: all transitions go through `&mut self`, and the
/// surrounding event loop is the single logical thread of control.
pub struct ConversationSync {
    store: Arc<dyn DocumentStore>,
    self_id: UserId,
    peer: Option<PeerProfile>,
    state: SyncState,
    log: Vec<Message>,
    /// Ids ever observed with `read == true`; guards monotonicity against
    /// a stale snapshot reverting the flag.
    read_seen: HashSet<MessageId>,
    sub: Option<Subscription<Message>>,
}

impl ConversationSync {
    /// New idle synchronizer for the signed-in user.
    ///
    /// The identity is passed in by the owner; the synchronizer never reads
    /// it from ambient state.
    pub fn new(store: Arc<dyn DocumentStore>, self_id: UserId) -> Self {
        Self {
            store,
            self_id,
            peer: None,
            state: SyncState::Idle,
            log: Vec::new(),
            read_seen: HashSet::new(),
            sub: None,
        }
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn peer(&self) -> Option<&PeerProfile> {
        self.peer.as_ref()
    }

    /// Ordered local log for the selected conversation.
    pub fn messages(&self) -> &[Message] {
        &self.log
    }

    /// Switch the active conversation to `peer`.
    ///
    /// The previous subscription is cancelled before the new one is issued,
    /// so there is never more than one live listener.
    pub fn select_peer(&mut self, peer: PeerProfile) {
        self.sub = None;
        self.log.clear();
        self.read_seen.clear();
        self.state = SyncState::Loading;

        let pair = ParticipantsPair::new(self.self_id.clone(), peer.id.clone());
        tracing::debug!("subscribing to conversation with {}", peer.id);
        self.sub = Some(self.store.watch_conversation(pair));
        self.peer = Some(peer);
    }

    /// Leave the conversation: cancel the subscription, empty the log.
    pub fn clear_peer(&mut self) {
        self.sub = None;
        self.peer = None;
        self.log.clear();
        self.read_seen.clear();
        self.state = SyncState::Idle;
    }

    /// Wait for and apply the next subscription event.
    ///
    /// Pends forever while no subscription is active, so it is safe to poll
    /// unconditionally from a `select!` loop.
    pub async fn next_event(&mut self) {
        let Some(sub) = self.sub.as_mut() else {
            return std::future::pending().await;
        };
        match sub.next().await {
            Some(SnapshotEvent::Snapshot(messages)) => self.apply_snapshot(messages),
            Some(SnapshotEvent::Lost(e)) => {
                tracing::warn!("conversation stream lost: {}", e);
                // Release the listener before exposing the failure.
                self.sub = None;
                self.state = SyncState::Error(SyncError::Store(e));
            }
            None => {
                self.sub = None;
                self.state = SyncState::Error(SyncError::StreamClosed);
            }
        }
    }

    /// Append a message to the active conversation.
    ///
    /// Returns once the store acknowledges the write. The message shows up
    /// in the local log only via the subscription snapshot, so the
    /// authoritative id and server timestamp are always used.
    pub async fn send_message(&self, text: &str) -> Result<MessageId, SendError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SendError::EmptyText);
        }
        let peer = self.peer.as_ref().ok_or(SendError::NoPeer)?;

        let id = self
            .store
            .append_message(MessageDraft {
                sender_id: self.self_id.clone(),
                receiver_id: peer.id.clone(),
                text: text.to_string(),
            })
            .await?;
        Ok(id)
    }

    /// Rebuild the local log from a full snapshot.
    ///
    /// Id-keyed upsert semantics: the snapshot fully supersedes the log, so
    /// out-of-order delta application cannot happen. Unread messages
    /// addressed to self are marked read fire-and-forget.
    fn apply_snapshot(&mut self, mut messages: Vec<Message>) {
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        messages.dedup_by(|a, b| a.id == b.id);

        for message in &mut messages {
            if message.read {
                self.read_seen.insert(message.id.clone());
            } else if self.read_seen.contains(&message.id) {
                // Never let a stale snapshot revert the flag.
                message.read = true;
            }
        }

        for message in &messages {
            if message.receiver_id == self.self_id && !message.read {
                let store = Arc::clone(&self.store);
                let id = message.id.clone();
                // Not awaited: read marking must not block rendering, and
                // its failure is not user-visible-critical.
                tokio::spawn(async move {
                    if let Err(e) = store.mark_read(&id).await {
                        tracing::warn!("failed to mark message {} read: {}", id, e);
                    }
                });
            }
        }

        self.log = messages;
        self.state = SyncState::Synced;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PeerProfile;
    use crate::store::memory::MemoryStore;
    use crate::store::WatchGuard;
    use chrono::{Duration, Utc};
    use tokio::sync::mpsc;

    fn profile(id: &str) -> PeerProfile {
        PeerProfile::provisioned(
            id.to_string(),
            format!("{}@example.com", id),
            id.to_uppercase(),
        )
    }

    fn message(id: &str, sender: &str, receiver: &str, offset_ms: i64, read: bool) -> Message {
        Message {
            id: id.to_string(),
            sender_id: sender.to_string(),
            receiver_id: receiver.to_string(),
            text: format!("msg {}", id),
            created_at: Utc::now() + Duration::milliseconds(offset_ms),
            read,
        }
    }

    /// Synchronizer with a hand-fed snapshot channel instead of a live
    /// store subscription.
    fn with_injected_stream(
        store: MemoryStore,
        self_id: &str,
        peer_id: &str,
    ) -> (ConversationSync, mpsc::UnboundedSender<SnapshotEvent<Message>>) {
        let mut sync = ConversationSync::new(Arc::new(store), self_id.to_string());
        sync.select_peer(profile(peer_id));
        let (tx, rx) = mpsc::unbounded_channel();
        sync.sub = Some(Subscription::new(rx, WatchGuard::detached()));
        (sync, tx)
    }

    #[tokio::test]
    async fn test_log_is_ordered_regardless_of_arrival_order() {
        let (mut sync, tx) = with_injected_stream(MemoryStore::new(), "u1", "u2");

        tx.send(SnapshotEvent::Snapshot(vec![
            message("m3", "u1", "u2", 30, true),
            message("m1", "u1", "u2", 10, true),
            message("m2", "u2", "u1", 20, true),
        ]))
        .unwrap();
        sync.next_event().await;

        let ids: Vec<&str> = sync.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
        assert_eq!(*sync.state(), SyncState::Synced);
    }

    #[tokio::test]
    async fn test_duplicate_snapshot_is_idempotent() {
        let (mut sync, tx) = with_injected_stream(MemoryStore::new(), "u1", "u2");
        let snapshot = vec![
            message("m1", "u1", "u2", 10, true),
            message("m2", "u2", "u1", 20, true),
        ];

        tx.send(SnapshotEvent::Snapshot(snapshot.clone())).unwrap();
        sync.next_event().await;
        let first = sync.messages().to_vec();

        tx.send(SnapshotEvent::Snapshot(snapshot)).unwrap();
        sync.next_event().await;
        assert_eq!(sync.messages(), first.as_slice());
    }

    #[tokio::test]
    async fn test_duplicate_ids_within_snapshot_collapse() {
        let (mut sync, tx) = with_injected_stream(MemoryStore::new(), "u1", "u2");

        tx.send(SnapshotEvent::Snapshot(vec![
            message("m1", "u1", "u2", 10, true),
            message("m1", "u1", "u2", 10, true),
        ]))
        .unwrap();
        sync.next_event().await;
        assert_eq!(sync.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_read_flag_never_reverts() {
        let (mut sync, tx) = with_injected_stream(MemoryStore::new(), "u1", "u2");

        tx.send(SnapshotEvent::Snapshot(vec![message("m1", "u1", "u2", 10, true)]))
            .unwrap();
        sync.next_event().await;
        assert!(sync.messages()[0].read);

        // Stale snapshot claims the message is unread again.
        tx.send(SnapshotEvent::Snapshot(vec![message("m1", "u1", "u2", 10, false)]))
            .unwrap();
        sync.next_event().await;
        assert!(sync.messages()[0].read);
    }

    #[tokio::test]
    async fn test_switching_peers_never_leaks_old_conversation() {
        let store = MemoryStore::new();
        let mut sync = ConversationSync::new(Arc::new(store.clone()), "u1".to_string());

        sync.select_peer(profile("u2"));
        store
            .append_message(MessageDraft {
                sender_id: "u2".to_string(),
                receiver_id: "u1".to_string(),
                text: "from the old conversation".to_string(),
            })
            .await
            .unwrap();

        // Switch before draining any snapshot for u2.
        sync.select_peer(profile("u3"));
        assert_eq!(store.message_watcher_count(), 1, "exactly one live listener");
        assert_eq!(*sync.state(), SyncState::Loading);

        store
            .append_message(MessageDraft {
                sender_id: "u3".to_string(),
                receiver_id: "u1".to_string(),
                text: "from the new conversation".to_string(),
            })
            .await
            .unwrap();

        // Registration snapshot (empty), then the u3 message.
        sync.next_event().await;
        sync.next_event().await;
        assert_eq!(sync.messages().len(), 1);
        assert_eq!(sync.messages()[0].sender_id, "u3");
    }

    #[tokio::test]
    async fn test_incoming_unread_messages_are_marked_read() {
        let store = MemoryStore::new();

        // u1 sends to u2 through their own synchronizer.
        let mut sender = ConversationSync::new(Arc::new(store.clone()), "u1".to_string());
        sender.select_peer(profile("u2"));
        let m1 = sender.send_message("hi").await.unwrap();

        // The sender's snapshot must not flip the flag: the message is not
        // addressed to u1.
        sender.next_event().await;
        sender.next_event().await;
        let stored = store.message_count();
        assert_eq!(stored, 1);

        // u2 selects u1; processing the registration snapshot marks m1 read
        // and the follow-up snapshot reflects it.
        let mut receiver = ConversationSync::new(Arc::new(store.clone()), "u2".to_string());
        receiver.select_peer(profile("u1"));
        receiver.next_event().await;
        assert_eq!(receiver.messages()[0].id, m1);
        assert!(!receiver.messages()[0].read);

        receiver.next_event().await;
        assert!(receiver.messages()[0].read);
    }

    #[tokio::test]
    async fn test_empty_send_is_rejected_before_the_store() {
        let store = MemoryStore::new();
        let mut sync = ConversationSync::new(Arc::new(store.clone()), "u1".to_string());
        sync.select_peer(profile("u2"));

        assert_eq!(sync.send_message("").await.unwrap_err(), SendError::EmptyText);
        assert_eq!(sync.send_message("   ").await.unwrap_err(), SendError::EmptyText);
        assert_eq!(store.message_count(), 0);
    }

    #[tokio::test]
    async fn test_send_requires_a_selected_peer() {
        let sync = ConversationSync::new(Arc::new(MemoryStore::new()), "u1".to_string());
        assert_eq!(sync.send_message("hi").await.unwrap_err(), SendError::NoPeer);
    }

    #[tokio::test]
    async fn test_sent_text_is_trimmed() {
        let store = MemoryStore::new();
        let mut sync = ConversationSync::new(Arc::new(store.clone()), "u1".to_string());
        sync.select_peer(profile("u2"));

        sync.send_message("  hello  ").await.unwrap();
        sync.next_event().await;
        sync.next_event().await;
        assert_eq!(sync.messages()[0].text, "hello");
    }

    #[tokio::test]
    async fn test_stream_error_releases_listener_and_surfaces() {
        let (mut sync, tx) = with_injected_stream(MemoryStore::new(), "u1", "u2");

        tx.send(SnapshotEvent::Lost(StoreError::PermissionDenied(
            "rules rejected the query".to_string(),
        )))
        .unwrap();
        sync.next_event().await;

        assert!(sync.sub.is_none(), "listener released before reporting");
        assert!(matches!(sync.state(), SyncState::Error(SyncError::Store(_))));
    }

    #[tokio::test]
    async fn test_synchronizer_runs_inside_a_spawned_task() {
        let store = MemoryStore::new();
        let mut sync = ConversationSync::new(Arc::new(store.clone()), "u2".to_string());
        sync.select_peer(profile("u1"));

        // The echo peer drives a synchronizer from a spawned task, holding
        // it across await points; that requires the whole state machine to
        // move onto the runtime's worker threads.
        let handle = tokio::spawn(async move {
            sync.next_event().await;
            sync.send_message("hello from a task").await
        });
        handle.await.unwrap().unwrap();
        assert_eq!(store.message_count(), 1);
    }

    #[tokio::test]
    async fn test_clear_peer_returns_to_idle() {
        let store = MemoryStore::new();
        let mut sync = ConversationSync::new(Arc::new(store.clone()), "u1".to_string());

        sync.select_peer(profile("u2"));
        assert_eq!(store.message_watcher_count(), 1);

        sync.clear_peer();
        assert_eq!(store.message_watcher_count(), 0);
        assert_eq!(*sync.state(), SyncState::Idle);
        assert!(sync.messages().is_empty());
        assert!(sync.peer().is_none());
    }
}
