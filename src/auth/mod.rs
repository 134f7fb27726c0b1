//! Identity provider interface
//!
//! Credential issuance and verification live outside this client; this
//! module specifies the contract: account creation, authentication, session
//! revocation, and a continuous "current identity changed" observer. The
//! bundled in-process implementation lives in [`memory`].

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

use crate::models::Identity;

/// Authentication failures, worded for direct display to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("an account already exists for {0}")]
    DuplicateEmail(String),
    #[error("password must be at least {0} characters")]
    WeakCredential(usize),
    #[error("invalid email or password")]
    InvalidCredential,
    #[error("identity provider unreachable: {0}")]
    Network(String),
}

/// Contract of the external identity provider.
///
/// The observer channel carries the provider-owned [`Identity`]; `None`
/// means no session is active.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Create credentials for a new account and start a session for it.
    async fn create_account(&self, email: &str, password: &str) -> Result<Identity, AuthError>;

    /// Verify credentials and start a session.
    async fn authenticate(&self, email: &str, password: &str) -> Result<Identity, AuthError>;

    /// End the current session.
    async fn revoke(&self) -> Result<(), AuthError>;

    /// Observe the current authenticated identity. The receiver immediately
    /// holds the present value.
    fn watch_identity(&self) -> watch::Receiver<Option<Identity>>;
}
