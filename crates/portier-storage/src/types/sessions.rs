//! Login session types.

use chrono::{DateTime, Utc};

use super::{SessionId, UserId};

/// Long-lived login session. Only the digest of the client secret is stored.
#[derive(Clone, Debug)]
pub struct UserSession {
    pub id: SessionId,
    pub user_id: UserId,
    pub token_hash: String, // sha256(secret), hex-encoded
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub refreshed_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub user_agent: String,
    pub client_ip: String,
}

impl UserSession {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

/// Parameters for creating a session
#[derive(Clone, Debug)]
pub struct CreateSessionParams {
    pub user_id: UserId,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub user_agent: String,
    pub client_ip: String,
}
