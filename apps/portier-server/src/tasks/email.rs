//! Notification email handler.
//!
//! Resolves the token named by the task, renders the matching template and dispatches it.
//! A token that is no longer active means the notification is moot (already confirmed,
//! expired or superseded), so it is skipped as a success.

use async_trait::async_trait;
use portier_queue::{TaskError, TaskHandler};
use portier_storage::{ConfirmationToken, LanguageId, Store, StoreError, TokenType, UserId};
use std::sync::Arc;
use tracing::{info, warn};

use super::EmailTask;
use crate::config::ServerConfig;
use crate::email::{NotificationContent, NotificationDispatcher, NotificationKind};
use crate::tokens::{decode_payload, redact, EmailChangePayload, RegisterPayload};

struct Recipient {
    email: String,
    name: String,
    language_id: Option<LanguageId>,
}

pub struct EmailTaskHandler {
    store: Arc<dyn Store>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    config: Arc<ServerConfig>,
}

impl EmailTaskHandler {
    pub fn new(
        store: Arc<dyn Store>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        config: Arc<ServerConfig>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            config,
        }
    }

    /// `None` when the owning account no longer exists.
    async fn recipient(&self, token: &ConfirmationToken) -> Result<Option<Recipient>, TaskError> {
        if token.token_type == TokenType::Register {
            let payload: RegisterPayload = decode_payload(token)
                .map_err(|e| TaskError::new(format!("bad register payload: {}", e)))?;
            return Ok(Some(Recipient {
                email: payload.email,
                name: payload.name,
                language_id: Some(payload.language_id),
            }));
        }

        let Some(owner) = token.owner_user_id else {
            return Err(TaskError::new("token has no owner"));
        };
        let user = match self.store.get_user_by_id(&owner).await {
            Ok(user) => user,
            Err(StoreError::NotFound) => return Ok(None),
            Err(e) => return Err(TaskError::new(e.to_string())),
        };

        let email = match token.token_type {
            TokenType::EmailChange => {
                let payload: EmailChangePayload = decode_payload(token)
                    .map_err(|e| TaskError::new(format!("bad email change payload: {}", e)))?;
                payload.new_email
            }
            _ => user.email,
        };

        Ok(Some(Recipient {
            email,
            name: user.name,
            language_id: self.user_language(&owner).await,
        }))
    }

    async fn user_language(&self, user_id: &UserId) -> Option<LanguageId> {
        self.store
            .get_user_settings(user_id)
            .await
            .ok()
            .map(|settings| settings.language_id)
    }

    /// Locale code for a language, falling back to the configured default.
    async fn locale(&self, language_id: Option<LanguageId>) -> String {
        let Some(id) = language_id else {
            return self.config.default_language.clone();
        };
        match self.store.get_language(&id).await {
            Ok(language) => language.code,
            Err(e) => {
                warn!(language_id = %id, error = %e, "unknown language, using default");
                self.config.default_language.clone()
            }
        }
    }
}

#[async_trait]
impl TaskHandler for EmailTaskHandler {
    type Task = EmailTask;

    async fn handle(&self, task: EmailTask) -> Result<(), TaskError> {
        let (token_type, kind) = match &task {
            EmailTask::SendRegisterEmail { .. } => {
                (TokenType::Register, NotificationKind::Register)
            }
            EmailTask::SendEmailChangeEmail { .. } => {
                (TokenType::EmailChange, NotificationKind::EmailChange)
            }
            EmailTask::SendPasswordResetEmail { .. } => {
                (TokenType::PasswordChange, NotificationKind::PasswordReset)
            }
        };
        let value = task.token();

        let token = match self.store.get_active_token(value, Some(token_type)).await {
            Ok(token) => token,
            Err(StoreError::NotFound) => {
                info!(
                    kind = kind.as_str(),
                    token = %redact(value),
                    "token no longer active, skipping notification"
                );
                return Ok(());
            }
            Err(e) => return Err(TaskError::new(e.to_string())),
        };

        let Some(recipient) = self.recipient(&token).await? else {
            warn!(kind = kind.as_str(), token = %redact(value), "token owner is gone, skipping");
            return Ok(());
        };

        let locale = self.locale(recipient.language_id).await;
        let link = match kind {
            NotificationKind::PasswordReset => self.config.reset_password_link(value),
            _ => self.config.confirm_link(value),
        };
        let content = NotificationContent::render(kind, &locale, &recipient.name, &link);

        self.dispatcher
            .send(&recipient.email, &content.subject, &content.html)
            .await
            .map_err(|e| TaskError::new(e.to_string()))?;

        metrics::counter!("portier_notifications_sent_total", "kind" => kind.as_str())
            .increment(1);
        info!(kind = kind.as_str(), locale = %locale, "notification sent");
        Ok(())
    }
}
