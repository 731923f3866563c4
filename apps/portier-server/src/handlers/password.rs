//! Password reset: request a link, then redeem it with a new password.

use std::time::Duration;

use portier_storage::{StoreError, TokenType};
use rand::Rng;
use tracing::info;

use super::{consume_logged, hash_password, normalize_email, validate_password, HandlerError};
use crate::server::Portier;
use crate::tasks::{EmailTask, EMAIL_TASKS};
use crate::tokens::{NewToken, PasswordChangePayload};

/// Always succeeds for a well-formed address so callers cannot probe which addresses
/// have accounts. Unknown addresses wait a short random time instead of doing work.
pub async fn request_password_reset(server: &Portier, email: &str) -> Result<(), HandlerError> {
    let email = normalize_email(email)?;

    let user = match server.store.get_user_by_email(&email).await {
        Ok(user) => user,
        Err(StoreError::NotFound) => {
            let delay = Duration::from_millis(rand::thread_rng().gen_range(100..400));
            tokio::time::sleep(delay).await;
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    server
        .tokens
        .cancel_active(&user.id, TokenType::PasswordChange)
        .await?;

    let payload = serde_json::to_value(PasswordChangePayload {
        email: user.email.clone(),
    })
    .map_err(|e| HandlerError::Internal(e.to_string()))?;

    let token = server
        .tokens
        .create(NewToken {
            token_type: TokenType::PasswordChange,
            owner: Some(user.id),
            payload,
            subject: None,
            ttl: server.config.reset_password_ttl,
        })
        .await?;

    server
        .producer
        .publish(&EMAIL_TASKS, &EmailTask::for_token(&token))
        .await;

    info!(user_id = %user.id.0, "password reset requested");
    Ok(())
}

/// Redeem a PasswordChange token. Every session of the user is revoked.
pub async fn change_password(
    server: &Portier,
    token: &str,
    new_password: &str,
) -> Result<(), HandlerError> {
    validate_password(new_password)?;

    let record = server
        .tokens
        .get_active(token, Some(TokenType::PasswordChange))
        .await?;
    let owner = record
        .owner_user_id
        .ok_or_else(|| HandlerError::Internal("password change token has no owner".into()))?;

    let password_hash = hash_password(new_password).await?;
    server
        .store
        .update_user_password(&owner, &password_hash)
        .await?;
    let revoked = server.sessions.revoke_all(&owner).await?;

    consume_logged(server, token).await;

    info!(user_id = %owner.0, revoked_sessions = revoked, "password changed");
    Ok(())
}
