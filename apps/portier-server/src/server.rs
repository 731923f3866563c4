use std::sync::Arc;

use portier_crypto::{AccessSigner, CryptoError};
use portier_queue::{Broker, Consumer, Producer};
use portier_storage::{Clock, Store};

use crate::config::ServerConfig;
use crate::email::NotificationDispatcher;
use crate::sessions::Sessions;
use crate::tasks::{EmailTaskHandler, ReportTaskHandler, EMAIL_TASKS, REPORT_TASKS};
use crate::tokens::ConfirmationTokens;

/// Everything a handler needs, wired once at startup and passed by reference.
#[derive(Clone)]
pub struct Portier {
    pub store: Arc<dyn Store>,
    pub broker: Arc<dyn Broker>,
    pub producer: Producer,
    pub tokens: ConfirmationTokens,
    pub sessions: Sessions,
    pub signer: AccessSigner,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<ServerConfig>,
}

impl Portier {
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn Store>,
        broker: Arc<dyn Broker>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CryptoError> {
        let signer = AccessSigner::new(&config.jwt_secret, config.access_token_ttl)?;
        Ok(Self {
            producer: Producer::new(broker.clone()),
            tokens: ConfirmationTokens::new(store.clone(), clock.clone()),
            sessions: Sessions::new(store.clone(), clock.clone(), config.refresh_token_ttl),
            signer,
            store,
            broker,
            clock,
            config: Arc::new(config),
        })
    }

    /// Consumer for the notification family.
    pub fn email_consumer(
        &self,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Consumer<EmailTaskHandler> {
        let handler = EmailTaskHandler::new(self.store.clone(), dispatcher, self.config.clone());
        Consumer::new(self.broker.clone(), EMAIL_TASKS, handler)
    }

    /// Consumer for the report family.
    pub fn report_consumer(&self) -> Consumer<ReportTaskHandler> {
        Consumer::new(self.broker.clone(), REPORT_TASKS, ReportTaskHandler)
    }

    /// Cookies carry `Secure` everywhere except development.
    pub fn secure_cookies(&self) -> bool {
        !self.config.is_development()
    }
}
