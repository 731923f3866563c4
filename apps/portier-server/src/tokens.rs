//! Confirmation tokens: single-use bearer secrets that gate a pending account change.
//!
//! Lifecycle: created NEW with a TTL, redeemed once (CONSUMED). Expiry is never written;
//! an expired token simply stops being returned by [`ConfirmationTokens::get_active`].

use chrono::Duration;
use portier_crypto::generate_confirmation_token;
use portier_storage::{
    Clock, ConfirmationToken, CreateTokenParams, LanguageId, Store, StoreError, TokenType, UserId,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Regenerate on token collision at most this many times.
const MAX_CREATE_ATTEMPTS: u32 = 3;

/// A token to be issued.
#[derive(Clone, Debug)]
pub struct NewToken {
    pub token_type: TokenType,
    pub owner: Option<UserId>,
    pub payload: serde_json::Value,
    /// Normalized value at most one active token may hold (e.g. the email being claimed).
    pub subject: Option<String>,
    pub ttl: Duration,
}

/// Register token payload: the account to create once the address is confirmed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPayload {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub language_id: LanguageId,
}

/// EmailChange token payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailChangePayload {
    pub new_email: String,
}

/// PasswordChange token payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordChangePayload {
    pub email: String,
}

pub fn decode_payload<T: DeserializeOwned>(token: &ConfirmationToken) -> Result<T, serde_json::Error> {
    serde_json::from_value(token.payload.clone())
}

#[derive(Clone)]
pub struct ConfirmationTokens {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl ConfirmationTokens {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Issue a fresh token with status NEW and `expires_at = now + ttl`.
    ///
    /// Returns `AlreadyExists` when another active token holds the same subject.
    pub async fn create(&self, new: NewToken) -> Result<ConfirmationToken, StoreError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let params = CreateTokenParams {
                token: generate_confirmation_token(),
                token_type: new.token_type,
                owner_user_id: new.owner,
                payload: new.payload.clone(),
                subject: new.subject.clone(),
                expires_at: self.clock.now() + new.ttl,
            };
            match self.store.create_token(&params).await {
                Err(StoreError::Conflict) if attempt < MAX_CREATE_ATTEMPTS => {
                    warn!(attempt, "confirmation token collision, regenerating");
                }
                result => return result,
            }
        }
    }

    /// Cheap duplicate check before [`Self::create`]. The subject index is authoritative.
    /// Tokens of `exclude_owner` do not count.
    pub async fn exists_active_for(
        &self,
        token_type: Option<TokenType>,
        payload_field: &str,
        value: &str,
        exclude_owner: Option<UserId>,
    ) -> Result<bool, StoreError> {
        self.store
            .exists_active_token(token_type, payload_field, value, exclude_owner)
            .await
    }

    /// `NotFound` for unknown, used, canceled, expired or wrong-type tokens alike.
    pub async fn get_active(
        &self,
        token: &str,
        token_type: Option<TokenType>,
    ) -> Result<ConfirmationToken, StoreError> {
        self.store.get_active_token(token, token_type).await
    }

    /// Idempotent: consuming a consumed token succeeds.
    pub async fn consume(&self, token: &str) -> Result<(), StoreError> {
        self.store.consume_token(token).await
    }

    /// Cancel the user's outstanding tokens of one type (superseded requests).
    pub async fn cancel_active(&self, owner: &UserId, token_type: TokenType) -> Result<u64, StoreError> {
        self.store.cancel_active_tokens(owner, token_type).await
    }
}

/// Shortened form of a bearer token for log lines.
pub fn redact(token: &str) -> String {
    let prefix: String = token.chars().take(6).collect();
    format!("{}…", prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use portier_storage::{ManualClock, MockStore, TokenStatus};
    use portier_store_sqlite::SqliteStore;
    use serde_json::json;

    async fn tokens() -> (ConfirmationTokens, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let store = SqliteStore::open_in_memory()
            .await
            .unwrap()
            .with_clock(clock.clone());
        (ConfirmationTokens::new(Arc::new(store), clock.clone()), clock)
    }

    fn register(email: &str) -> NewToken {
        NewToken {
            token_type: TokenType::Register,
            owner: None,
            payload: json!({ "email": email }),
            subject: Some(email.to_string()),
            ttl: Duration::days(1),
        }
    }

    #[tokio::test]
    async fn test_register_token_expires_after_ttl() {
        let (tokens, clock) = tokens().await;
        let created = tokens.create(register("ada@example.com")).await.unwrap();
        assert_eq!(created.token.len(), 32);
        assert_eq!(created.status, TokenStatus::New);

        let active = tokens
            .get_active(&created.token, Some(TokenType::Register))
            .await
            .unwrap();
        assert_eq!(active.id, created.id);

        clock.advance(Duration::days(1) + Duration::seconds(1));
        assert!(matches!(
            tokens.get_active(&created.token, None).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_second_active_token_for_subject_rejected() {
        let (tokens, _) = tokens().await;
        tokens.create(register("ada@example.com")).await.unwrap();

        assert!(tokens
            .exists_active_for(None, "email", "ada@example.com", None)
            .await
            .unwrap());
        assert!(matches!(
            tokens.create(register("ada@example.com")).await,
            Err(StoreError::AlreadyExists)
        ));
    }

    #[tokio::test]
    async fn test_consume_twice() {
        let (tokens, _) = tokens().await;
        let created = tokens.create(register("ada@example.com")).await.unwrap();
        tokens.consume(&created.token).await.unwrap();
        tokens.consume(&created.token).await.unwrap();
        assert!(tokens.get_active(&created.token, None).await.is_err());
    }

    #[tokio::test]
    async fn test_collision_is_retried() {
        let mut store = MockStore::new();
        let mut calls = 0;
        store.expect_create_token().times(2).returning(move |params| {
            calls += 1;
            if calls == 1 {
                return Err(StoreError::Conflict);
            }
            Ok(ConfirmationToken {
                id: portier_storage::TokenId(uuid::Uuid::now_v7()),
                token: params.token.clone(),
                owner_user_id: None,
                token_type: params.token_type,
                payload: params.payload.clone(),
                subject: params.subject.clone(),
                status: TokenStatus::New,
                expires_at: params.expires_at,
                status_changed_at: chrono::Utc::now(),
                created_at: chrono::Utc::now(),
            })
        });

        let clock = Arc::new(ManualClock::default());
        let tokens = ConfirmationTokens::new(Arc::new(store), clock);
        let created = tokens.create(register("ada@example.com")).await.unwrap();
        assert_eq!(created.token.len(), 32);
    }

    #[tokio::test]
    async fn test_collision_gives_up() {
        let mut store = MockStore::new();
        store
            .expect_create_token()
            .times(MAX_CREATE_ATTEMPTS as usize)
            .returning(|_| Err(StoreError::Conflict));

        let tokens = ConfirmationTokens::new(Arc::new(store), Arc::new(ManualClock::default()));
        assert!(matches!(
            tokens.create(register("ada@example.com")).await,
            Err(StoreError::Conflict)
        ));
    }

    #[test]
    fn test_redact() {
        assert_eq!(redact("abcdefghijkl"), "abcdef…");
        assert_eq!(redact("abc"), "abc…");
    }
}
