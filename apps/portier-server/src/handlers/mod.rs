//! Account flow handlers.
//!
//! Free functions over [`Portier`](crate::server::Portier), organized by flow:
//! - register: sign-up request
//! - email_change: change-of-address request
//! - password: reset request and token redemption
//! - confirm: redemption of register and email-change tokens
//! - session: login, per-request authentication, logout
//! - settings: language preference and the `me` profile lookup
//! - decoration: cookies and identity returned to the transport layer

pub mod confirm;
pub mod decoration;
pub mod email_change;
pub mod password;
pub mod register;
pub mod session;
pub mod settings;

pub use decoration::{CookieDirective, ResponseDecoration};

use portier_crypto::CryptoError;
use portier_storage::{StoreError, TokenType, UserId};
use thiserror::Error;
use tracing::warn;

use crate::server::Portier;
use crate::tokens::redact;

pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("unauthorized")]
    Unauthorized,
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for HandlerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => HandlerError::NotFound,
            StoreError::AlreadyExists => HandlerError::AlreadyExists,
            other => HandlerError::Internal(other.to_string()),
        }
    }
}

impl From<CryptoError> for HandlerError {
    fn from(e: CryptoError) -> Self {
        HandlerError::Internal(e.to_string())
    }
}

/// Trimmed, lowercased address. Rejects anything without a local part and a domain.
pub fn normalize_email(email: &str) -> Result<String, HandlerError> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(HandlerError::InvalidInput(format!(
            "invalid email address: {}",
            email
        ))),
    }
}

pub fn validate_password(password: &str) -> Result<(), HandlerError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(HandlerError::InvalidInput(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// Argon2 off the async executor.
pub(crate) async fn hash_password(password: &str) -> Result<String, HandlerError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || portier_crypto::hash_password(&password))
        .await
        .map_err(|e| HandlerError::Internal(e.to_string()))?
        .map_err(HandlerError::from)
}

pub(crate) async fn verify_password(password: &str, phc: &str) -> Result<bool, HandlerError> {
    let password = password.to_string();
    let phc = phc.to_string();
    tokio::task::spawn_blocking(move || portier_crypto::verify_password(&password, &phc))
        .await
        .map_err(|e| HandlerError::Internal(e.to_string()))?
        .map_err(HandlerError::from)
}

/// Mark a token used after its effect is committed. A failure here is logged only: the
/// account change already happened, and the token still expires on its own.
pub(crate) async fn consume_logged(server: &Portier, token: &str) {
    if let Err(e) = server.tokens.consume(token).await {
        warn!(token = %redact(token), error = %e, "failed to consume confirmation token");
    }
}

/// Reject an address held by an account or claimed by a pending registration or
/// email change. Pending changes of `requester` itself are not a conflict.
pub(crate) async fn ensure_email_available(
    server: &Portier,
    email: &str,
    requester: Option<UserId>,
) -> Result<(), HandlerError> {
    match server.store.get_user_by_email(email).await {
        Ok(_) => return Err(HandlerError::AlreadyExists),
        Err(StoreError::NotFound) => {}
        Err(e) => return Err(e.into()),
    }

    if server
        .tokens
        .exists_active_for(Some(TokenType::Register), "email", email, None)
        .await?
        || server
            .tokens
            .exists_active_for(Some(TokenType::EmailChange), "new_email", email, requester)
            .await?
    {
        return Err(HandlerError::AlreadyExists);
    }
    Ok(())
}
