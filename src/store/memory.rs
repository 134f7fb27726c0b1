//! In-process document store
//!
//! Backs the sandbox CLI and the test suite with the same snapshot-push
//! semantics the real store contract promises: every mutation re-delivers
//! the full matching result set to each registered listener, and write
//! timestamps come from a monotonic server-side clock.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;

use crate::models::{Message, MessageDraft, MessageId, ParticipantsPair, PeerProfile, Presence, UserId};

use super::{DocumentStore, SnapshotEvent, StoreError, Subscription, WatchGuard};

struct ProfileWatcher {
    id: u64,
    tx: mpsc::UnboundedSender<SnapshotEvent<PeerProfile>>,
}

struct MessageWatcher {
    id: u64,
    pair: ParticipantsPair,
    tx: mpsc::UnboundedSender<SnapshotEvent<Message>>,
}

struct Inner {
    /// Insertion order is preserved; subscribers see it as store order.
    profiles: Vec<PeerProfile>,
    messages: Vec<Message>,
    /// Last timestamp handed out; never reused or rewound.
    clock: DateTime<Utc>,
    profile_watchers: Vec<ProfileWatcher>,
    message_watchers: Vec<MessageWatcher>,
    next_watcher_id: u64,
}

impl Inner {
    /// Server-assigned timestamp, strictly increasing across all writes.
    fn server_now(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamped = if now > self.clock {
            now
        } else {
            self.clock + Duration::milliseconds(1)
        };
        self.clock = stamped;
        stamped
    }

    /// Conversation snapshot: matching messages ordered by (created_at, id).
    fn conversation_snapshot(&self, pair: &ParticipantsPair) -> Vec<Message> {
        let mut msgs: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| m.participants() == *pair)
            .cloned()
            .collect();
        msgs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        msgs
    }

    fn notify_profile_watchers(&mut self) {
        let snapshot = self.profiles.clone();
        self.profile_watchers
            .retain(|w| w.tx.send(SnapshotEvent::Snapshot(snapshot.clone())).is_ok());
    }

    fn notify_conversation(&mut self, pair: &ParticipantsPair) {
        let snapshot = self.conversation_snapshot(pair);
        self.message_watchers.retain(|w| {
            if w.pair != *pair {
                return true;
            }
            w.tx.send(SnapshotEvent::Snapshot(snapshot.clone())).is_ok()
        });
    }
}

/// In-memory [`DocumentStore`] shared via cheap clones.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                profiles: Vec::new(),
                messages: Vec::new(),
                clock: Utc::now(),
                profile_watchers: Vec::new(),
                message_watchers: Vec::new(),
                next_watcher_id: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("store mutex poisoned")
    }

    /// Number of stored messages, across all conversations.
    #[cfg(test)]
    pub(crate) fn message_count(&self) -> usize {
        self.lock().messages.len()
    }

    #[cfg(test)]
    pub(crate) fn profile_watcher_count(&self) -> usize {
        self.lock().profile_watchers.len()
    }

    #[cfg(test)]
    pub(crate) fn message_watcher_count(&self) -> usize {
        self.lock().message_watchers.len()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_profile(&self, user_id: &UserId) -> Result<Option<PeerProfile>, StoreError> {
        let inner = self.lock();
        Ok(inner.profiles.iter().find(|p| p.id == *user_id).cloned())
    }

    async fn put_profile(&self, mut profile: PeerProfile) -> Result<(), StoreError> {
        let mut inner = self.lock();
        profile.last_active_at = inner.server_now();
        match inner.profiles.iter_mut().find(|p| p.id == profile.id) {
            Some(existing) => *existing = profile,
            None => inner.profiles.push(profile),
        }
        inner.notify_profile_watchers();
        Ok(())
    }

    async fn set_presence(&self, user_id: &UserId, presence: Presence) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let stamped = inner.server_now();
        let profile = inner
            .profiles
            .iter_mut()
            .find(|p| p.id == *user_id)
            .ok_or_else(|| StoreError::NotFound(format!("profile {}", user_id)))?;
        profile.presence = presence;
        profile.last_active_at = stamped;
        inner.notify_profile_watchers();
        Ok(())
    }

    async fn append_message(&self, draft: MessageDraft) -> Result<MessageId, StoreError> {
        let mut inner = self.lock();
        let id = uuid::Uuid::new_v4().to_string();
        let message = Message {
            id: id.clone(),
            sender_id: draft.sender_id,
            receiver_id: draft.receiver_id,
            text: draft.text,
            created_at: inner.server_now(),
            read: false,
        };
        let pair = message.participants();
        inner.messages.push(message);
        inner.notify_conversation(&pair);
        tracing::debug!("appended message {}", id);
        Ok(id)
    }

    async fn mark_read(&self, message_id: &MessageId) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let message = inner
            .messages
            .iter_mut()
            .find(|m| m.id == *message_id)
            .ok_or_else(|| StoreError::NotFound(format!("message {}", message_id)))?;
        if message.read {
            // Repeated idempotent set; nothing changed, nothing to push.
            return Ok(());
        }
        message.read = true;
        let pair = message.participants();
        inner.notify_conversation(&pair);
        Ok(())
    }

    fn watch_profiles(&self) -> Subscription<PeerProfile> {
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher_id = {
            let mut inner = self.lock();
            let id = inner.next_watcher_id;
            inner.next_watcher_id += 1;
            // Initial snapshot is delivered at registration.
            let _ = tx.send(SnapshotEvent::Snapshot(inner.profiles.clone()));
            inner.profile_watchers.push(ProfileWatcher { id, tx });
            id
        };
        let inner = Arc::clone(&self.inner);
        let guard = WatchGuard::new(move || {
            inner
                .lock()
                .expect("store mutex poisoned")
                .profile_watchers
                .retain(|w| w.id != watcher_id);
        });
        Subscription::new(rx, guard)
    }

    fn watch_conversation(&self, pair: ParticipantsPair) -> Subscription<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher_id = {
            let mut inner = self.lock();
            let id = inner.next_watcher_id;
            inner.next_watcher_id += 1;
            let _ = tx.send(SnapshotEvent::Snapshot(inner.conversation_snapshot(&pair)));
            inner.message_watchers.push(MessageWatcher { id, pair, tx });
            id
        };
        let inner = Arc::clone(&self.inner);
        let guard = WatchGuard::new(move || {
            inner
                .lock()
                .expect("store mutex poisoned")
                .message_watchers
                .retain(|w| w.id != watcher_id);
        });
        Subscription::new(rx, guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(sender: &str, receiver: &str, text: &str) -> MessageDraft {
        MessageDraft {
            sender_id: sender.to_string(),
            receiver_id: receiver.to_string(),
            text: text.to_string(),
        }
    }

    async fn expect_snapshot<T>(sub: &mut Subscription<T>) -> Vec<T> {
        match sub.next().await {
            Some(SnapshotEvent::Snapshot(items)) => items,
            other => panic!("expected snapshot, got {:?}", other.map(|e| match e {
                SnapshotEvent::Snapshot(_) => "snapshot",
                SnapshotEvent::Lost(_) => "lost",
            })),
        }
    }

    #[tokio::test]
    async fn test_timestamps_are_monotonic() {
        let store = MemoryStore::new();
        let a = store.append_message(draft("u1", "u2", "one")).await.unwrap();
        let b = store.append_message(draft("u1", "u2", "two")).await.unwrap();

        let mut sub = store.watch_conversation(ParticipantsPair::new("u1".into(), "u2".into()));
        let msgs = expect_snapshot(&mut sub).await;
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].id, a);
        assert_eq!(msgs[1].id, b);
        assert!(msgs[0].created_at < msgs[1].created_at);
    }

    #[tokio::test]
    async fn test_writes_push_snapshots_to_watchers() {
        let store = MemoryStore::new();
        let pair = ParticipantsPair::new("u1".into(), "u2".into());
        let mut sub = store.watch_conversation(pair);

        // Registration snapshot is empty.
        assert!(expect_snapshot(&mut sub).await.is_empty());

        store.append_message(draft("u2", "u1", "hi")).await.unwrap();
        let msgs = expect_snapshot(&mut sub).await;
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].text, "hi");
        assert!(!msgs[0].read);
    }

    #[tokio::test]
    async fn test_conversation_filter_excludes_other_pairs() {
        let store = MemoryStore::new();
        store.append_message(draft("u1", "u2", "ours")).await.unwrap();
        store.append_message(draft("u1", "u3", "theirs")).await.unwrap();

        let mut sub = store.watch_conversation(ParticipantsPair::new("u2".into(), "u1".into()));
        let msgs = expect_snapshot(&mut sub).await;
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].text, "ours");
    }

    #[tokio::test]
    async fn test_mark_read_is_idempotent() {
        let store = MemoryStore::new();
        let id = store.append_message(draft("u1", "u2", "hi")).await.unwrap();
        store.mark_read(&id).await.unwrap();
        store.mark_read(&id).await.unwrap();

        let mut sub = store.watch_conversation(ParticipantsPair::new("u1".into(), "u2".into()));
        let msgs = expect_snapshot(&mut sub).await;
        assert!(msgs[0].read);
    }

    #[tokio::test]
    async fn test_dropping_subscription_unregisters_listener() {
        let store = MemoryStore::new();
        let sub = store.watch_profiles();
        assert_eq!(store.lock().profile_watchers.len(), 1);
        drop(sub);
        assert_eq!(store.lock().profile_watchers.len(), 0);
    }

    #[tokio::test]
    async fn test_presence_update_stamps_last_active() {
        let store = MemoryStore::new();
        let profile = PeerProfile::provisioned("u1".into(), "u1@example.com".into(), "U One".into());
        store.put_profile(profile).await.unwrap();
        let before = store.get_profile(&"u1".to_string()).await.unwrap().unwrap();

        store.set_presence(&"u1".to_string(), Presence::Offline).await.unwrap();
        let after = store.get_profile(&"u1".to_string()).await.unwrap().unwrap();
        assert_eq!(after.presence, Presence::Offline);
        assert!(after.last_active_at > before.last_active_at);
    }
}
