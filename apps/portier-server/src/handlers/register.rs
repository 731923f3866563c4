//! Registration request.
//!
//! Nothing is written to the users table here. The would-be account travels in the
//! Register token's payload and is created when the emailed link is confirmed.

use portier_storage::{ConfirmationToken, Language, LanguageId, StoreError, TokenType};
use tracing::info;

use super::{
    ensure_email_available, hash_password, normalize_email, validate_password, HandlerError,
};
use crate::server::Portier;
use crate::tasks::{EmailTask, EMAIL_TASKS};
use crate::tokens::{NewToken, RegisterPayload};

#[derive(Clone, Debug)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    /// Falls back to the configured default language.
    pub language_id: Option<LanguageId>,
}

async fn resolve_language(
    server: &Portier,
    language_id: Option<LanguageId>,
) -> Result<Language, HandlerError> {
    let result = match language_id {
        Some(id) => server.store.get_language(&id).await,
        None => {
            server
                .store
                .get_language_by_code(&server.config.default_language)
                .await
        }
    };
    match result {
        Ok(language) => Ok(language),
        Err(StoreError::NotFound) => Err(HandlerError::InvalidInput("unknown language".into())),
        Err(e) => Err(e.into()),
    }
}

pub async fn register(
    server: &Portier,
    request: RegisterRequest,
) -> Result<ConfirmationToken, HandlerError> {
    let name = request.name.trim().to_string();
    if name.is_empty() {
        return Err(HandlerError::InvalidInput("name is required".into()));
    }
    let email = normalize_email(&request.email)?;
    validate_password(&request.password)?;

    ensure_email_available(server, &email, None).await?;
    let language = resolve_language(server, request.language_id).await?;

    let payload = RegisterPayload {
        name,
        email: email.clone(),
        password_hash: hash_password(&request.password).await?,
        language_id: language.id,
    };
    let payload =
        serde_json::to_value(&payload).map_err(|e| HandlerError::Internal(e.to_string()))?;

    let token = server
        .tokens
        .create(NewToken {
            token_type: TokenType::Register,
            owner: None,
            payload,
            subject: Some(email),
            ttl: server.config.confirmation_ttl,
        })
        .await?;

    server
        .producer
        .publish(&EMAIL_TASKS, &EmailTask::for_token(&token))
        .await;

    info!(language = %language.code, "registration requested");
    Ok(token)
}
