//! In-process identity provider
//!
//! Keeps accounts in memory with sha2-digested passwords. Used by the
//! sandbox CLI and the test suite; real deployments supply their own
//! [`IdentityProvider`] implementation.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::watch;

use crate::models::Identity;

use super::{AuthError, IdentityProvider};

/// Minimum accepted password length.
const MIN_PASSWORD_LEN: usize = 6;

struct Account {
    id: String,
    email: String,
    password_digest: [u8; 32],
}

/// In-memory [`IdentityProvider`] holding at most one active session.
pub struct MemoryIdentityProvider {
    accounts: Mutex<HashMap<String, Account>>,
    current: watch::Sender<Option<Identity>>,
}

impl Default for MemoryIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        let (current, _) = watch::channel(None);
        Self {
            accounts: Mutex::new(HashMap::new()),
            current,
        }
    }

    fn digest(password: &str) -> [u8; 32] {
        Sha256::digest(password.as_bytes()).into()
    }

    /// Display name fallback: the local part of the email address.
    fn display_name_for(email: &str) -> String {
        email.split('@').next().unwrap_or(email).to_string()
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn create_account(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        if password.len() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakCredential(MIN_PASSWORD_LEN));
        }
        let mut accounts = self.accounts.lock().expect("account table poisoned");
        if accounts.contains_key(email) {
            return Err(AuthError::DuplicateEmail(email.to_string()));
        }
        let account = Account {
            id: uuid::Uuid::new_v4().to_string(),
            email: email.to_string(),
            password_digest: Self::digest(password),
        };
        let identity = Identity {
            id: account.id.clone(),
            email: account.email.clone(),
            display_name: Self::display_name_for(email),
        };
        accounts.insert(email.to_string(), account);
        drop(accounts);

        tracing::info!("account created for {}", email);
        self.current.send_replace(Some(identity.clone()));
        Ok(identity)
    }

    async fn authenticate(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let accounts = self.accounts.lock().expect("account table poisoned");
        let account = accounts.get(email).ok_or(AuthError::InvalidCredential)?;
        if account.password_digest != Self::digest(password) {
            return Err(AuthError::InvalidCredential);
        }
        let identity = Identity {
            id: account.id.clone(),
            email: account.email.clone(),
            display_name: Self::display_name_for(email),
        };
        drop(accounts);

        self.current.send_replace(Some(identity.clone()));
        Ok(identity)
    }

    async fn revoke(&self) -> Result<(), AuthError> {
        self.current.send_replace(None);
        Ok(())
    }

    fn watch_identity(&self) -> watch::Receiver<Option<Identity>> {
        self.current.subscribe()
    }
}
