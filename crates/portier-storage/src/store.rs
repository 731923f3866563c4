//! The Store trait that backends implement.

use chrono::{DateTime, Utc};

use crate::types::*;
use crate::StoreError;

/// Persistence for confirmation tokens, sessions and the account rows they act on.
///
/// "Now" is taken from the backend's [`crate::Clock`]; expiry is enforced by the read
/// predicates, never by a stored status.
#[cfg_attr(feature = "test-support", mockall::automock)]
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    // ───────────────────────────────── Confirmation Tokens ─────────────────────────────────

    /// Insert a token with status NEW.
    ///
    /// Returns `AlreadyExists` if another active token already holds `params.subject`.
    /// An active-status token with the same subject that has already expired is canceled
    /// first, so stale links never block a new request.
    async fn create_token(&self, params: &CreateTokenParams)
        -> Result<ConfirmationToken, StoreError>;

    /// Best-effort duplicate check: is there an active, unexpired token (optionally of one
    /// type) whose JSON payload has `payload_field == value`? Tokens owned by
    /// `exclude_owner` are ignored.
    async fn exists_active_token(
        &self,
        token_type: Option<TokenType>,
        payload_field: &str,
        value: &str,
        exclude_owner: Option<UserId>,
    ) -> Result<bool, StoreError>;

    /// Get a redeemable token (NEW/PROCESSING, unexpired, matching type when given).
    async fn get_active_token(
        &self,
        token: &str,
        token_type: Option<TokenType>,
    ) -> Result<ConfirmationToken, StoreError>;

    /// Get a token regardless of status or expiry.
    async fn get_token(&self, token: &str) -> Result<ConfirmationToken, StoreError>;

    /// Mark a token CONSUMED. A second call is a no-op. `NotFound` only if no such token.
    async fn consume_token(&self, token: &str) -> Result<(), StoreError>;

    /// Cancel the active tokens of one type owned by a user. Returns how many changed.
    async fn cancel_active_tokens(
        &self,
        owner: &UserId,
        token_type: TokenType,
    ) -> Result<u64, StoreError>;

    /// Delete tokens that expired before `before`, or reached a terminal status before it.
    async fn cleanup_tokens(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;

    // ───────────────────────────────────── Sessions ────────────────────────────────────────

    async fn create_session(&self, params: &CreateSessionParams)
        -> Result<UserSession, StoreError>;

    /// Get the active (not revoked, not expired) session with this digest.
    async fn get_active_session(&self, token_hash: &str) -> Result<UserSession, StoreError>;

    /// Get a session by digest regardless of state.
    async fn get_session(&self, token_hash: &str) -> Result<UserSession, StoreError>;

    /// Slide an active session's expiry. Returns false when no active row matched.
    async fn refresh_session(
        &self,
        user_id: &UserId,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Set `revoked_at` once. Revoking an already-revoked or unknown session is a no-op.
    async fn revoke_session(&self, user_id: &UserId, token_hash: &str) -> Result<(), StoreError>;

    /// Revoke every live session of a user (password change). Returns how many changed.
    async fn revoke_user_sessions(&self, user_id: &UserId) -> Result<u64, StoreError>;

    async fn list_active_sessions(&self, user_id: &UserId)
        -> Result<Vec<UserSession>, StoreError>;

    /// Delete sessions that expired or were revoked before `before`.
    async fn cleanup_sessions(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;

    // ─────────────────────────────────────── Users ─────────────────────────────────────────

    /// Create the user and its settings row in one transaction.
    async fn finalize_registration(
        &self,
        user: &NewUser,
        settings: &NewUserSettings,
    ) -> Result<UserId, StoreError>;

    async fn get_user_by_id(&self, user_id: &UserId) -> Result<User, StoreError>;

    /// Get user by (lowercased) email.
    async fn get_user_by_email(&self, email: &str) -> Result<User, StoreError>;

    /// `AlreadyExists` if another user holds the address.
    async fn update_user_email(&self, user_id: &UserId, email: &str) -> Result<(), StoreError>;

    async fn update_user_password(
        &self,
        user_id: &UserId,
        password_hash: &str,
    ) -> Result<(), StoreError>;

    async fn get_user_settings(&self, user_id: &UserId) -> Result<UserSettings, StoreError>;

    /// Set the user's language. `NotFound` if the user has no settings row.
    async fn update_user_settings(
        &self,
        user_id: &UserId,
        language_id: LanguageId,
    ) -> Result<(), StoreError>;

    // ───────────────────────────────────── Languages ───────────────────────────────────────

    async fn get_language(&self, id: &LanguageId) -> Result<Language, StoreError>;

    async fn get_language_by_code(&self, code: &str) -> Result<Language, StoreError>;

    async fn list_languages(&self) -> Result<Vec<Language>, StoreError>;
}
