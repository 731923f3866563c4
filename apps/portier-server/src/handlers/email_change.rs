use portier_storage::{ConfirmationToken, TokenType, UserId};
use tracing::info;

use super::{ensure_email_available, normalize_email, HandlerError};
use crate::server::Portier;
use crate::tasks::{EmailTask, EMAIL_TASKS};
use crate::tokens::{EmailChangePayload, NewToken};

/// Ask to move `user_id` to `new_email`. The address changes only once the link sent to
/// the new address is confirmed. A newer request supersedes older pending ones.
pub async fn request_email_change(
    server: &Portier,
    user_id: &UserId,
    new_email: &str,
) -> Result<ConfirmationToken, HandlerError> {
    let new_email = normalize_email(new_email)?;
    let user = server.store.get_user_by_id(user_id).await?;
    if user.email == new_email {
        return Err(HandlerError::InvalidInput(
            "new email matches the current one".into(),
        ));
    }

    // a rejected request leaves the earlier pending change in place
    ensure_email_available(server, &new_email, Some(*user_id)).await?;
    let canceled = server
        .tokens
        .cancel_active(user_id, TokenType::EmailChange)
        .await?;

    let payload = serde_json::to_value(EmailChangePayload {
        new_email: new_email.clone(),
    })
    .map_err(|e| HandlerError::Internal(e.to_string()))?;

    let token = server
        .tokens
        .create(NewToken {
            token_type: TokenType::EmailChange,
            owner: Some(*user_id),
            payload,
            subject: Some(new_email),
            ttl: server.config.confirmation_ttl,
        })
        .await?;

    server
        .producer
        .publish(&EMAIL_TASKS, &EmailTask::for_token(&token))
        .await;

    info!(user_id = %user_id.0, superseded = canceled, "email change requested");
    Ok(token)
}
