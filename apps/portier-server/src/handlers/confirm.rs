//! Redemption of emailed confirmation links.

use portier_storage::{NewUser, NewUserSettings, TokenType, UserId};
use tracing::info;

use super::{consume_logged, HandlerError};
use crate::server::Portier;
use crate::tokens::{decode_payload, EmailChangePayload, RegisterPayload};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Confirmed {
    Registered(UserId),
    EmailChanged(UserId),
}

/// Apply the change a Register or EmailChange token stands for, then consume it.
///
/// `NotFound` covers unknown, used, superseded and expired links alike. If applying the
/// change fails the token stays unconsumed and the link can be retried.
pub async fn confirm(server: &Portier, token: &str) -> Result<Confirmed, HandlerError> {
    let record = server.tokens.get_active(token, None).await?;

    let confirmed = match record.token_type {
        TokenType::Register => {
            let payload: RegisterPayload = decode_payload(&record)
                .map_err(|e| HandlerError::Internal(format!("bad register payload: {}", e)))?;
            let user_id = server
                .store
                .finalize_registration(
                    &NewUser {
                        name: payload.name,
                        email: payload.email,
                        password_hash: payload.password_hash,
                        confirmed_at: Some(server.clock.now()),
                    },
                    &NewUserSettings {
                        language_id: payload.language_id,
                    },
                )
                .await?;
            Confirmed::Registered(user_id)
        }
        TokenType::EmailChange => {
            let payload: EmailChangePayload = decode_payload(&record).map_err(|e| {
                HandlerError::Internal(format!("bad email change payload: {}", e))
            })?;
            let owner = record
                .owner_user_id
                .ok_or_else(|| HandlerError::Internal("email change token has no owner".into()))?;
            server
                .store
                .update_user_email(&owner, &payload.new_email)
                .await?;
            Confirmed::EmailChanged(owner)
        }
        TokenType::PasswordChange => {
            return Err(HandlerError::InvalidInput(
                "password reset links are redeemed with a new password".into(),
            ));
        }
    };

    consume_logged(server, token).await;

    match confirmed {
        Confirmed::Registered(user_id) => info!(user_id = %user_id.0, "registration confirmed"),
        Confirmed::EmailChanged(user_id) => info!(user_id = %user_id.0, "email change confirmed"),
    }
    Ok(confirmed)
}
