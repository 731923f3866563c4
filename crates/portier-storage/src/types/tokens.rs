//! Confirmation token types.

use chrono::{DateTime, Utc};
use std::str::FromStr;

use super::{TokenId, UserId};

/// The pending account mutation a confirmation token gates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenType {
    Register,
    EmailChange,
    PasswordChange,
}

/// Persisted token status. `Expired` is never stored: see [`ConfirmationToken::is_expired`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenStatus {
    New,
    Processing,
    Consumed,
    Canceled,
    Failed,
}

/// Error type for parsing token enums from their database representation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTokenEnumError(pub String);

impl std::fmt::Display for ParseTokenEnumError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid token enum value: {}", self.0)
    }
}

impl std::error::Error for ParseTokenEnumError {}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Register => "REGISTER",
            TokenType::EmailChange => "EMAIL_CHANGE",
            TokenType::PasswordChange => "PASSWORD_CHANGE",
        }
    }
}

impl FromStr for TokenType {
    type Err = ParseTokenEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REGISTER" => Ok(TokenType::Register),
            "EMAIL_CHANGE" => Ok(TokenType::EmailChange),
            "PASSWORD_CHANGE" => Ok(TokenType::PasswordChange),
            _ => Err(ParseTokenEnumError(s.to_string())),
        }
    }
}

impl TokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::New => "NEW",
            TokenStatus::Processing => "PROCESSING",
            TokenStatus::Consumed => "CONSUMED",
            TokenStatus::Canceled => "CANCELED",
            TokenStatus::Failed => "FAILED",
        }
    }

    /// Statuses that still allow the token to be redeemed.
    pub fn is_active(&self) -> bool {
        matches!(self, TokenStatus::New | TokenStatus::Processing)
    }

    /// Forward-only state machine. Terminal states accept nothing.
    pub fn can_transition_to(&self, next: TokenStatus) -> bool {
        match self {
            TokenStatus::New => next != TokenStatus::New,
            TokenStatus::Processing => matches!(
                next,
                TokenStatus::Consumed | TokenStatus::Canceled | TokenStatus::Failed
            ),
            TokenStatus::Consumed | TokenStatus::Canceled | TokenStatus::Failed => false,
        }
    }
}

impl FromStr for TokenStatus {
    type Err = ParseTokenEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(TokenStatus::New),
            "PROCESSING" => Ok(TokenStatus::Processing),
            "CONSUMED" => Ok(TokenStatus::Consumed),
            "CANCELED" => Ok(TokenStatus::Canceled),
            "FAILED" => Ok(TokenStatus::Failed),
            _ => Err(ParseTokenEnumError(s.to_string())),
        }
    }
}

/// Confirmation token record
#[derive(Clone, Debug)]
pub struct ConfirmationToken {
    pub id: TokenId,
    pub token: String,                 // Opaque bearer value (base36, unique)
    pub owner_user_id: Option<UserId>, // None until the account exists (registration)
    pub token_type: TokenType,
    pub payload: serde_json::Value,
    pub subject: Option<String>, // Normalized identifier guarded against duplicates
    pub status: TokenStatus,
    pub expires_at: DateTime<Utc>,
    pub status_changed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ConfirmationToken {
    /// Derived expiry; never persisted as a status.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Redeemable right now.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status.is_active() && !self.is_expired(now)
    }
}

/// Parameters for creating a confirmation token
#[derive(Clone, Debug)]
pub struct CreateTokenParams {
    pub token: String, // Generated by the caller (portier-crypto)
    pub token_type: TokenType,
    pub owner_user_id: Option<UserId>,
    pub payload: serde_json::Value,
    /// Optional identifier (lowercased email) that at most one active token may hold
    pub subject: Option<String>,
    pub expires_at: DateTime<Utc>,
}
