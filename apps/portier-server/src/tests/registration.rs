use chrono::Duration;
use portier_storage::{
    Clock, ConfirmationToken, LanguageId, MockStore, StoreError, TokenStatus, TokenType, UserId,
};
use serde_json::json;
use std::sync::Arc;

use super::common::*;
use crate::handlers::confirm::{confirm, Confirmed};
use crate::handlers::register::{register, RegisterRequest};
use crate::handlers::HandlerError;
use crate::server::Portier;
use crate::tasks::EmailTask;
use crate::tokens::{decode_payload, NewToken, RegisterPayload};

#[tokio::test]
async fn test_register_then_confirm_creates_user() {
    let ts = create_test_server().await;

    let token = register(&ts.server, register_request("  Ada@Example.com "))
        .await
        .unwrap();
    assert_eq!(token.token_type, TokenType::Register);
    assert_eq!(token.subject.as_deref(), Some("ada@example.com"));
    assert_eq!(token.expires_at, ts.clock.now() + Duration::days(2));

    // the password never travels in clear
    let payload: RegisterPayload = decode_payload(&token).unwrap();
    assert_eq!(payload.email, "ada@example.com");
    assert_ne!(payload.password_hash, PASSWORD);
    assert!(payload.password_hash.starts_with("$argon2id$"));

    assert_eq!(
        ts.email_tasks(),
        vec![EmailTask::SendRegisterEmail {
            register_token: token.token.clone()
        }]
    );
    assert!(matches!(
        ts.store().get_user_by_email("ada@example.com").await,
        Err(StoreError::NotFound)
    ));

    let user_id = match confirm(&ts.server, &token.token).await.unwrap() {
        Confirmed::Registered(id) => id,
        other => panic!("unexpected: {:?}", other),
    };
    let user = ts.store().get_user_by_id(&user_id).await.unwrap();
    assert_eq!(user.email, "ada@example.com");
    assert_eq!(user.name, "Ada Lovelace");
    assert_eq!(user.confirmed_at, Some(ts.clock.now()));
    assert_eq!(
        ts.store().get_user_settings(&user_id).await.unwrap().language_id,
        LanguageId(1)
    );

    let record = ts.store().get_token(&token.token).await.unwrap();
    assert_eq!(record.status, TokenStatus::Consumed);

    // a used link looks like any other dead link
    assert!(matches!(
        confirm(&ts.server, &token.token).await,
        Err(HandlerError::NotFound)
    ));
}

#[tokio::test]
async fn test_default_language_when_unspecified() {
    let ts = create_test_server().await;
    let mut request = register_request("ada@example.com");
    request.language_id = None;

    let token = register(&ts.server, request).await.unwrap();
    let payload: RegisterPayload = decode_payload(&token).unwrap();
    let language = ts.store().get_language(&payload.language_id).await.unwrap();
    assert_eq!(language.code, "en");
}

#[tokio::test]
async fn test_register_validation() {
    let ts = create_test_server().await;

    let cases = [
        RegisterRequest {
            name: " ".into(),
            ..register_request("ada@example.com")
        },
        register_request("not-an-email"),
        RegisterRequest {
            password: "short".into(),
            ..register_request("ada@example.com")
        },
        RegisterRequest {
            language_id: Some(LanguageId(99)),
            ..register_request("ada@example.com")
        },
    ];
    for request in cases {
        assert!(matches!(
            register(&ts.server, request).await,
            Err(HandlerError::InvalidInput(_))
        ));
    }
    assert!(ts.email_tasks().is_empty());
}

#[tokio::test]
async fn test_duplicate_registration_rejected() {
    let ts = create_test_server().await;

    // pending registration
    register(&ts.server, register_request("ada@example.com"))
        .await
        .unwrap();
    assert!(matches!(
        register(&ts.server, register_request("ADA@example.com")).await,
        Err(HandlerError::AlreadyExists)
    ));

    // existing account
    create_confirmed_user(&ts, "grace@example.com").await;
    assert!(matches!(
        register(&ts.server, register_request("grace@example.com")).await,
        Err(HandlerError::AlreadyExists)
    ));

    assert_eq!(ts.email_tasks().len(), 2);
}

#[tokio::test]
async fn test_expired_registration_frees_the_address() {
    let ts = create_test_server().await;
    let first = register(&ts.server, register_request("ada@example.com"))
        .await
        .unwrap();

    ts.clock.advance(Duration::days(2) + Duration::seconds(1));
    assert!(matches!(
        confirm(&ts.server, &first.token).await,
        Err(HandlerError::NotFound)
    ));

    let second = register(&ts.server, register_request("ada@example.com"))
        .await
        .unwrap();
    assert_ne!(second.token, first.token);
    let stale = ts.store().get_token(&first.token).await.unwrap();
    assert_eq!(stale.status, TokenStatus::Canceled);
}

#[tokio::test]
async fn test_failed_finalization_leaves_token_redeemable() {
    let ts = create_test_server().await;

    // payload pointing at a language that does not exist: the settings insert fails
    let payload = RegisterPayload {
        name: "Ada".into(),
        email: "ada@example.com".into(),
        password_hash: "$argon2id$placeholder".into(),
        language_id: LanguageId(99),
    };
    let token = ts
        .server
        .tokens
        .create(NewToken {
            token_type: TokenType::Register,
            owner: None,
            payload: serde_json::to_value(&payload).unwrap(),
            subject: Some("ada@example.com".into()),
            ttl: Duration::days(1),
        })
        .await
        .unwrap();

    assert!(matches!(
        confirm(&ts.server, &token.token).await,
        Err(HandlerError::Internal(_))
    ));
    assert!(matches!(
        ts.store().get_user_by_email("ada@example.com").await,
        Err(StoreError::NotFound)
    ));
    let record = ts.store().get_token(&token.token).await.unwrap();
    assert_eq!(record.status, TokenStatus::New);
}

#[tokio::test]
async fn test_password_reset_token_not_confirmable() {
    let ts = create_test_server().await;
    let user_id = create_confirmed_user(&ts, "ada@example.com").await;

    let token = ts
        .server
        .tokens
        .create(NewToken {
            token_type: TokenType::PasswordChange,
            owner: Some(user_id),
            payload: json!({ "email": "ada@example.com" }),
            subject: None,
            ttl: Duration::days(1),
        })
        .await
        .unwrap();

    assert!(matches!(
        confirm(&ts.server, &token.token).await,
        Err(HandlerError::InvalidInput(_))
    ));
    let record = ts.store().get_token(&token.token).await.unwrap();
    assert_eq!(record.status, TokenStatus::New);
}

#[tokio::test]
async fn test_consume_failure_does_not_fail_confirmation() {
    let ts = create_test_server().await;
    let now = ts.clock.now();
    let user_id = UserId(uuid::Uuid::now_v7());

    let record = ConfirmationToken {
        id: portier_storage::TokenId(uuid::Uuid::now_v7()),
        token: "abc123".into(),
        owner_user_id: Some(user_id),
        token_type: TokenType::EmailChange,
        payload: json!({ "new_email": "new@example.com" }),
        subject: Some("new@example.com".into()),
        status: TokenStatus::New,
        expires_at: now + Duration::days(1),
        status_changed_at: now,
        created_at: now,
    };

    let mut store = MockStore::new();
    store
        .expect_get_active_token()
        .returning(move |_, _| Ok(record.clone()));
    store
        .expect_update_user_email()
        .times(1)
        .returning(|_, _| Ok(()));
    store
        .expect_consume_token()
        .times(1)
        .returning(|_| Err(StoreError::Backend("database is locked".into())));

    let server = Portier::new(
        test_config(),
        Arc::new(store),
        Arc::new(ts.broker.clone()),
        ts.clock.clone(),
    )
    .unwrap();

    assert_eq!(
        confirm(&server, "abc123").await.unwrap(),
        Confirmed::EmailChanged(user_id)
    );
}
