//! Session manager
//!
//! Owns the authenticated-user lifecycle: wraps the identity provider,
//! mirrors presence into the document store on sign-in/out, and runs the
//! single long-lived observer that self-provisions the profile record on
//! every transition to "authenticated" before publishing the identity to
//! the rest of the client.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::auth::{AuthError, IdentityProvider};
use crate::config::SessionCache;
use crate::models::{Identity, PeerProfile, Presence, UserId};
use crate::store::{DocumentStore, StoreError};

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        AuthError::Network(e.to_string())
    }
}

/// Authenticated-user lifecycle owner.
///
/// Consumers observe the current identity through [`SessionManager::identity`];
/// it is published only after the profile upsert for that sign-in completed,
/// so a published identity always has a provisioned profile behind it.
pub struct SessionManager {
    provider: Arc<dyn IdentityProvider>,
    store: Arc<dyn DocumentStore>,
    cache: Arc<SessionCache>,
    published: Arc<watch::Sender<Option<Identity>>>,
    identity: watch::Receiver<Option<Identity>>,
    observer: JoinHandle<()>,
}

impl SessionManager {
    /// Start the manager and its identity observer task.
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        store: Arc<dyn DocumentStore>,
        cache: SessionCache,
    ) -> Self {
        let cache = Arc::new(cache);
        let (tx, rx) = watch::channel(None);
        let published = Arc::new(tx);
        let observer = tokio::spawn(observe_identity(
            provider.watch_identity(),
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::clone(&published),
        ));
        Self {
            provider,
            store,
            cache,
            published,
            identity: rx,
            observer,
        }
    }

    /// Observe the current authenticated identity.
    pub fn identity(&self) -> watch::Receiver<Option<Identity>> {
        self.identity.clone()
    }

    /// Snapshot of the current identity, if signed in.
    pub fn current_identity(&self) -> Option<Identity> {
        self.identity.borrow().clone()
    }

    /// Create an account, then create its peer profile with the given
    /// display name. No profile is written if credential creation fails.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<Identity, AuthError> {
        let identity = self.provider.create_account(email, password).await?;
        // Let the observer finish its default provisioning first, then
        // overwrite with the chosen display name.
        self.wait_published(&identity.id).await;
        self.store
            .put_profile(PeerProfile::provisioned(
                identity.id.clone(),
                identity.email.clone(),
                display_name.to_string(),
            ))
            .await?;

        // The observer cached and published the provider's fallback name;
        // refresh both with the chosen one.
        let identity = Identity {
            display_name: display_name.to_string(),
            ..identity
        };
        if let Err(e) = self.cache.save(&identity) {
            tracing::warn!("session cache write failed: {:#}", e);
        }
        self.published.send_replace(Some(identity.clone()));
        Ok(identity)
    }

    /// Authenticate and mirror presence to online.
    ///
    /// The presence flip (and the profile create on a first federated
    /// login) happens in the observer's provisioning upsert; this call
    /// returns once that upsert is published.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let identity = self.provider.authenticate(email, password).await?;
        self.wait_published(&identity.id).await;

        // Prefer the profile's display name over the provider fallback.
        match self.store.get_profile(&identity.id).await {
            Ok(Some(profile)) => Ok(Identity {
                display_name: profile.display_name,
                ..identity
            }),
            Ok(None) => Ok(identity),
            Err(e) => Err(e.into()),
        }
    }

    /// Mirror presence to offline, then revoke the session.
    ///
    /// The presence write goes first, while still authorized; a failure to
    /// revoke afterwards is tolerated and logged, never fatal. The local
    /// session ends either way: the cache is cleared and `None` published
    /// before this returns, without waiting on a provider transition that
    /// a failed revocation would never deliver.
    pub async fn sign_out(&self) {
        let Some(identity) = self.current_identity() else {
            return;
        };

        if let Err(e) = self
            .store
            .set_presence(&identity.id, Presence::Offline)
            .await
        {
            tracing::warn!("could not mark {} offline: {}", identity.id, e);
        }

        if let Err(e) = self.provider.revoke().await {
            tracing::warn!("session revocation failed: {}", e);
        }

        // The observer repeats this when the provider transition arrives;
        // both steps are idempotent.
        if let Err(e) = self.cache.clear() {
            tracing::warn!("session cache clear failed: {:#}", e);
        }
        self.published.send_replace(None);
    }

    /// Wait until the observer has provisioned and published `id`.
    async fn wait_published(&self, id: &UserId) {
        let mut rx = self.identity.clone();
        loop {
            if rx.borrow_and_update().as_ref().map(|i| &i.id) == Some(id) {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.observer.abort();
    }
}

/// Long-lived observer of the provider's identity channel.
///
/// On every transition to authenticated: run the idempotent provisioning
/// upsert, persist the identity to the session cache, then publish. On
/// sign-out: clear the cache, publish `None`.
async fn observe_identity(
    mut provider_rx: watch::Receiver<Option<Identity>>,
    store: Arc<dyn DocumentStore>,
    cache: Arc<SessionCache>,
    tx: Arc<watch::Sender<Option<Identity>>>,
) {
    loop {
        let current = provider_rx.borrow_and_update().clone();
        match current {
            Some(identity) => {
                if let Err(e) = provision_profile(store.as_ref(), &identity).await {
                    tracing::warn!("profile provisioning for {} failed: {}", identity.id, e);
                }
                if let Err(e) = cache.save(&identity) {
                    tracing::warn!("session cache write failed: {:#}", e);
                }
                tx.send_replace(Some(identity));
            }
            None => {
                if let Err(e) = cache.clear() {
                    tracing::warn!("session cache clear failed: {:#}", e);
                }
                tx.send_replace(None);
            }
        }

        if provider_rx.changed().await.is_err() {
            return;
        }
    }
}

/// Idempotent create-or-update of the profile record.
///
/// Safe to run on every app start: an existing profile only gets its
/// presence and last-active refreshed, never its display name.
async fn provision_profile(store: &dyn DocumentStore, identity: &Identity) -> Result<(), StoreError> {
    match store.get_profile(&identity.id).await? {
        Some(_) => store.set_presence(&identity.id, Presence::Online).await,
        None => {
            tracing::info!("provisioning profile for {}", identity.email);
            store
                .put_profile(PeerProfile::provisioned(
                    identity.id.clone(),
                    identity.email.clone(),
                    identity.display_name.clone(),
                ))
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::memory::MemoryIdentityProvider;
    use crate::store::memory::MemoryStore;

    fn temp_cache() -> SessionCache {
        let path = std::env::temp_dir()
            .join(format!("pairchat-test-{}", uuid::Uuid::new_v4()))
            .join("session.toml");
        SessionCache::at(path)
    }

    fn manager() -> (SessionManager, MemoryStore) {
        let store = MemoryStore::new();
        let provider = Arc::new(MemoryIdentityProvider::new());
        let manager = SessionManager::new(
            provider,
            Arc::new(store.clone()),
            temp_cache(),
        );
        (manager, store)
    }

    #[tokio::test]
    async fn test_sign_up_creates_online_profile() {
        let (manager, store) = manager();
        let identity = manager
            .sign_up("alice@example.com", "hunter22", "Alice")
            .await
            .unwrap();
        assert_eq!(identity.display_name, "Alice");

        let profile = store.get_profile(&identity.id).await.unwrap().unwrap();
        assert_eq!(profile.display_name, "Alice");
        assert_eq!(profile.email, "alice@example.com");
        assert_eq!(profile.presence, Presence::Online);
        assert!(profile.avatar_url.contains("Alice"));
    }

    #[tokio::test]
    async fn test_failed_sign_up_writes_no_profile() {
        let (manager, store) = manager();
        manager
            .sign_up("alice@example.com", "hunter22", "Alice")
            .await
            .unwrap();
        manager.sign_out().await;

        let err = manager
            .sign_up("alice@example.com", "other-pass", "Impostor")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::DuplicateEmail(_)));

        // Only the original profile exists, untouched.
        let mut sub = store.watch_profiles();
        match sub.next().await.unwrap() {
            crate::store::SnapshotEvent::Snapshot(profiles) => {
                assert_eq!(profiles.len(), 1);
                assert_eq!(profiles[0].display_name, "Alice");
            }
            crate::store::SnapshotEvent::Lost(e) => panic!("stream lost: {}", e),
        }
    }

    #[tokio::test]
    async fn test_presence_mirroring_round_trip() {
        let (manager, store) = manager();
        let identity = manager
            .sign_up("alice@example.com", "hunter22", "Alice")
            .await
            .unwrap();
        manager.sign_out().await;

        let signed_in = manager
            .sign_in("alice@example.com", "hunter22")
            .await
            .unwrap();
        assert_eq!(signed_in.display_name, "Alice");
        let online = store.get_profile(&identity.id).await.unwrap().unwrap();
        assert_eq!(online.presence, Presence::Online);
        let signed_in_at = online.last_active_at;

        manager.sign_out().await;
        let offline = store.get_profile(&identity.id).await.unwrap().unwrap();
        assert_eq!(offline.presence, Presence::Offline);
        assert!(offline.last_active_at >= signed_in_at);
        assert!(manager.current_identity().is_none());
    }

    #[tokio::test]
    async fn test_provisioning_is_idempotent() {
        let (manager, store) = manager();
        let identity = manager
            .sign_up("alice@example.com", "hunter22", "Alice")
            .await
            .unwrap();

        // Repeated sign-ins reuse the profile instead of recreating it.
        for _ in 0..3 {
            manager.sign_out().await;
            manager.sign_in("alice@example.com", "hunter22").await.unwrap();
        }

        let profile = store.get_profile(&identity.id).await.unwrap().unwrap();
        assert_eq!(profile.display_name, "Alice");
        assert_eq!(profile.presence, Presence::Online);
    }

    #[tokio::test]
    async fn test_identity_published_and_cached() {
        let store = MemoryStore::new();
        let provider = Arc::new(MemoryIdentityProvider::new());
        let cache_path = std::env::temp_dir()
            .join(format!("pairchat-test-{}", uuid::Uuid::new_v4()))
            .join("session.toml");
        let manager = SessionManager::new(
            provider,
            Arc::new(store),
            SessionCache::at(cache_path.clone()),
        );

        let identity = manager
            .sign_up("alice@example.com", "hunter22", "Alice")
            .await
            .unwrap();
        assert_eq!(
            manager.current_identity().map(|i| i.id),
            Some(identity.id.clone())
        );
        let cached = SessionCache::at(cache_path.clone()).load().unwrap().unwrap();
        assert_eq!(cached.id, identity.id);

        manager.sign_out().await;
        assert!(SessionCache::at(cache_path).load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sign_up_publishes_chosen_display_name() {
        let cache_path = std::env::temp_dir()
            .join(format!("pairchat-test-{}", uuid::Uuid::new_v4()))
            .join("session.toml");
        let manager = SessionManager::new(
            Arc::new(MemoryIdentityProvider::new()),
            Arc::new(MemoryStore::new()),
            SessionCache::at(cache_path.clone()),
        );

        manager
            .sign_up("alice@example.com", "hunter22", "Alice")
            .await
            .unwrap();

        // Channel and cache carry the chosen name, not the provider's
        // email-local-part fallback.
        assert_eq!(
            manager.current_identity().map(|i| i.display_name),
            Some("Alice".to_string())
        );
        let cached = SessionCache::at(cache_path).load().unwrap().unwrap();
        assert_eq!(cached.display_name, "Alice");
    }

    /// Provider whose revocation endpoint is unreachable.
    struct FlakyRevokeProvider {
        inner: MemoryIdentityProvider,
    }

    #[async_trait::async_trait]
    impl IdentityProvider for FlakyRevokeProvider {
        async fn create_account(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
            self.inner.create_account(email, password).await
        }

        async fn authenticate(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
            self.inner.authenticate(email, password).await
        }

        async fn revoke(&self) -> Result<(), AuthError> {
            Err(AuthError::Network(
                "revocation endpoint unreachable".to_string(),
            ))
        }

        fn watch_identity(&self) -> watch::Receiver<Option<Identity>> {
            self.inner.watch_identity()
        }
    }

    #[tokio::test]
    async fn test_sign_out_completes_when_revocation_fails() {
        let store = MemoryStore::new();
        let provider = Arc::new(FlakyRevokeProvider {
            inner: MemoryIdentityProvider::new(),
        });
        let manager = SessionManager::new(provider, Arc::new(store.clone()), temp_cache());
        let identity = manager
            .sign_up("alice@example.com", "hunter22", "Alice")
            .await
            .unwrap();

        // The provider never transitions to signed-out, so the local
        // session must end without waiting on it.
        tokio::time::timeout(std::time::Duration::from_secs(2), manager.sign_out())
            .await
            .expect("sign_out must return even when revocation fails");

        assert!(manager.current_identity().is_none());
        let profile = store.get_profile(&identity.id).await.unwrap().unwrap();
        assert_eq!(profile.presence, Presence::Offline);
    }
}
