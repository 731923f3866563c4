//! Outgoing notifications.
//!
//! The task workers render a template and hand the result to a [`NotificationDispatcher`].
//! Which dispatcher runs is chosen by configuration.

mod log;
#[cfg(feature = "email-smtp")]
mod smtp;
mod templates;

pub use log::LogDispatcher;
pub use templates::{NotificationContent, NotificationKind};

use crate::config::{EmailConfig, EmailProviderConfig};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Email sending error
#[derive(Debug, Error)]
pub enum EmailError {
    #[error("Failed to send email: {0}")]
    SendFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Provider not available: {0}")]
    ProviderNotAvailable(String),
}

/// Sends one rendered notification.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), EmailError>;
}

/// Create a dispatcher from configuration
pub fn create_dispatcher(
    config: &EmailConfig,
) -> Result<Arc<dyn NotificationDispatcher>, EmailError> {
    match &config.provider {
        EmailProviderConfig::Log => Ok(Arc::new(LogDispatcher)),
        #[cfg(feature = "email-smtp")]
        EmailProviderConfig::Smtp {
            host,
            port,
            username,
            password,
            use_tls,
        } => {
            let dispatcher = smtp::SmtpDispatcher::new(
                host.clone(),
                *port,
                username.clone(),
                password.clone(),
                *use_tls,
                config.from_address.clone(),
                config.from_name.clone(),
            )?;
            Ok(Arc::new(dispatcher))
        }
        #[cfg(not(feature = "email-smtp"))]
        EmailProviderConfig::Smtp { .. } => Err(EmailError::ProviderNotAvailable(
            "SMTP support not compiled in. Enable the 'email-smtp' feature.".to_string(),
        )),
    }
}
