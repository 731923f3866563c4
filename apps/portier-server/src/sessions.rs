//! Long-lived login sessions.
//!
//! The client holds a random 256-bit secret; the server stores only its SHA-256 digest.
//! A session is active while it is not revoked and not expired. Every authenticated use
//! slides the expiry forward by the session TTL.

use chrono::Duration;
use portier_crypto::{generate_session_secret, hash_session_secret};
use portier_storage::{Clock, CreateSessionParams, Store, StoreError, UserId};
use std::sync::Arc;

/// Who is opening a session.
#[derive(Clone, Debug, Default)]
pub struct ClientMeta {
    pub user_agent: String,
    pub client_ip: String,
}

#[derive(Clone)]
pub struct Sessions {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl Sessions {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Open a session and return the plaintext secret. It is never persisted.
    pub async fn issue(&self, user_id: &UserId, meta: &ClientMeta) -> Result<String, StoreError> {
        let secret = generate_session_secret();
        self.store
            .create_session(&CreateSessionParams {
                user_id: *user_id,
                token_hash: hash_session_secret(&secret),
                expires_at: self.clock.now() + self.ttl,
                user_agent: meta.user_agent.clone(),
                client_ip: meta.client_ip.clone(),
            })
            .await?;
        Ok(secret)
    }

    /// Resolve a secret to its owner. `NotFound` if absent, revoked or expired.
    pub async fn authenticate(&self, secret: &str) -> Result<UserId, StoreError> {
        let session = self
            .store
            .get_active_session(&hash_session_secret(secret))
            .await?;
        Ok(session.user_id)
    }

    /// Slide the session's expiry. `false` when there was no active session to slide.
    pub async fn refresh(&self, user_id: &UserId, secret: &str) -> Result<bool, StoreError> {
        self.store
            .refresh_session(
                user_id,
                &hash_session_secret(secret),
                self.clock.now() + self.ttl,
            )
            .await
    }

    /// Idempotent.
    pub async fn revoke(&self, user_id: &UserId, secret: &str) -> Result<(), StoreError> {
        self.store
            .revoke_session(user_id, &hash_session_secret(secret))
            .await
    }

    pub async fn revoke_all(&self, user_id: &UserId) -> Result<u64, StoreError> {
        self.store.revoke_user_sessions(user_id).await
    }
}
