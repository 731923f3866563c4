//! Dispatcher that logs notifications instead of delivering them (development).

use super::{EmailError, NotificationDispatcher};
use async_trait::async_trait;
use tracing::info;

pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), EmailError> {
        info!(to, subject, bytes = html.len(), "notification not sent (log provider)");
        Ok(())
    }
}
