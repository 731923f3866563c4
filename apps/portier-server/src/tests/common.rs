//! Common test helpers for server tests.
//!
//! This module provides shared test infrastructure including:
//! - Test server creation (in-memory SQLite, manual clock, in-memory broker)
//! - A dispatcher that records what it would have sent
//! - Inspection of published notification tasks
//! - Registered, confirmed user creation

use async_trait::async_trait;
use chrono::Duration;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use portier_queue::QueueEvent;
use portier_queue_memory::MemoryBroker;
use portier_storage::{ConfirmationToken, LanguageId, ManualClock, Store, UserId};
use portier_store_sqlite::SqliteStore;

use crate::config::{EmailConfig, EmailProviderConfig, Environment, ServerConfig};
use crate::email::{EmailError, NotificationDispatcher};
use crate::handlers::confirm::{confirm, Confirmed};
use crate::handlers::register::{register, RegisterRequest};
use crate::server::Portier;
use crate::tasks::EmailTask;

pub const PASSWORD: &str = "correct horse battery";

pub struct TestServer {
    pub server: Portier,
    pub broker: MemoryBroker,
    pub clock: Arc<ManualClock>,
}

impl TestServer {
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.server.store
    }

    /// Notification tasks waiting in the main email queue, oldest first.
    pub fn email_tasks(&self) -> Vec<EmailTask> {
        self.broker
            .snapshot("email_tasks")
            .iter()
            .map(|body| {
                QueueEvent::from_slice(body)
                    .unwrap()
                    .decode::<EmailTask>()
                    .unwrap()
            })
            .collect()
    }
}

pub fn test_config() -> ServerConfig {
    ServerConfig {
        broker_url: "memory://".to_string(),
        frontend_base_url: "https://app.example.com".to_string(),
        default_language: "en".to_string(),
        jwt_secret: b"test-secret-test-secret-test-secret".to_vec(),
        access_token_ttl: Duration::minutes(15),
        refresh_token_ttl: Duration::days(30),
        confirmation_ttl: Duration::days(2),
        reset_password_ttl: Duration::days(1),
        startup_timeout: std::time::Duration::from_secs(5),
        environment: Environment::Development,
        email: EmailConfig {
            provider: EmailProviderConfig::Log,
            from_address: "noreply@localhost".to_string(),
            from_name: None,
        },
    }
}

/// Test helper: Create a Portier server over in-memory SQLite and an in-memory broker
pub async fn create_test_server() -> TestServer {
    let clock = Arc::new(ManualClock::default());
    let store = SqliteStore::open_in_memory()
        .await
        .unwrap()
        .with_clock(clock.clone());
    let broker = MemoryBroker::new();
    let server = Portier::new(
        test_config(),
        Arc::new(store),
        Arc::new(broker.clone()),
        clock.clone(),
    )
    .unwrap();
    TestServer {
        server,
        broker,
        clock,
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sent {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Records notifications instead of sending them. Optionally fails the first few sends.
#[derive(Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<Sent>>,
    failures: AtomicU32,
    attempts: AtomicU32,
}

impl RecordingDispatcher {
    pub fn failing(failures: u32) -> Self {
        Self {
            failures: AtomicU32::new(failures),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), EmailError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(EmailError::SendFailed("smtp unavailable".into()));
        }
        self.sent.lock().unwrap().push(Sent {
            to: to.to_string(),
            subject: subject.to_string(),
            html: html.to_string(),
        });
        Ok(())
    }
}

pub fn register_request(email: &str) -> RegisterRequest {
    RegisterRequest {
        name: "Ada Lovelace".to_string(),
        email: email.to_string(),
        password: PASSWORD.to_string(),
        language_id: Some(LanguageId(1)),
    }
}

/// Test helper: Register and confirm a user with [`PASSWORD`]
pub async fn create_confirmed_user(ts: &TestServer, email: &str) -> UserId {
    let token: ConfirmationToken = register(&ts.server, register_request(email))
        .await
        .unwrap();
    match confirm(&ts.server, &token.token).await.unwrap() {
        Confirmed::Registered(user_id) => user_id,
        other => panic!("unexpected confirmation: {:?}", other),
    }
}
