//! Storage hygiene: dropping dead tokens and sessions.

use chrono::Duration;
use portier_storage::{Clock, Store, StoreError};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How often the worker sweeps.
pub const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60 * 60);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub tokens: u64,
    pub sessions: u64,
}

/// Delete tokens and sessions that died more than `retention` ago.
pub async fn sweep(
    store: &dyn Store,
    clock: &dyn Clock,
    retention: Duration,
) -> Result<SweepReport, StoreError> {
    let before = clock.now() - retention;
    let report = SweepReport {
        tokens: store.cleanup_tokens(before).await?,
        sessions: store.cleanup_sessions(before).await?,
    };
    metrics::counter!("portier_cleanup_deleted_total", "kind" => "tokens")
        .increment(report.tokens);
    metrics::counter!("portier_cleanup_deleted_total", "kind" => "sessions")
        .increment(report.sessions);
    info!(
        tokens = report.tokens,
        sessions = report.sessions,
        cutoff = %before,
        "storage sweep finished"
    );
    Ok(report)
}

/// Sweep every `interval` until `shutdown` fires. Failures are logged and retried on the
/// next tick.
pub async fn run_periodic(
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    retention: Duration,
    interval: std::time::Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                if let Err(e) = sweep(store.as_ref(), clock.as_ref(), retention).await {
                    warn!(error = %e, "storage sweep failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::{ConfirmationTokens, NewToken};
    use portier_storage::{ManualClock, TokenType};
    use portier_store_sqlite::SqliteStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_sweep_keeps_recent_tokens() {
        let clock = Arc::new(ManualClock::default());
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open_in_memory()
                .await
                .unwrap()
                .with_clock(clock.clone()),
        );
        let tokens = ConfirmationTokens::new(store.clone(), clock.clone());
        let expiring = tokens
            .create(NewToken {
                token_type: TokenType::Register,
                owner: None,
                payload: json!({ "email": "old@example.com" }),
                subject: Some("old@example.com".into()),
                ttl: Duration::days(1),
            })
            .await
            .unwrap();

        clock.advance(Duration::days(3));
        let fresh = tokens
            .create(NewToken {
                token_type: TokenType::Register,
                owner: None,
                payload: json!({ "email": "new@example.com" }),
                subject: Some("new@example.com".into()),
                ttl: Duration::days(1),
            })
            .await
            .unwrap();

        let report = sweep(store.as_ref(), clock.as_ref(), Duration::days(1))
            .await
            .unwrap();
        assert_eq!(report.tokens, 1);
        assert!(store.get_token(&expiring.token).await.is_err());
        assert!(store.get_token(&fresh.token).await.is_ok());
    }

    #[tokio::test]
    async fn test_periodic_sweep_stops_on_cancel() {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_periodic(
            store,
            clock,
            Duration::days(7),
            std::time::Duration::from_millis(10),
            shutdown.clone(),
        ));
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        shutdown.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
