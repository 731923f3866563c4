use clap::{Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use portier_server::config::ServerConfig;
use portier_server::email::create_dispatcher;
use portier_server::hygiene;
use portier_server::metrics::init_metrics;
use portier_server::server::Portier;
use portier_server::startup::{self, RetryPolicy};
use portier_server::tasks::{EmailTask, EMAIL_TASKS};
use portier_storage::{Clock, Store, SystemClock};
use portier_store_sqlite::SqliteStore;

// ────────────────────────────────────── CLI Types ──────────────────────────────────────

#[derive(Parser)]
#[command(name = "portier-server")]
#[command(about = "Portier task workers and administration")]
struct Cli {
    /// Database URL (sqlite://path/to/db.db)
    #[arg(
        long,
        global = true,
        env = "DATABASE_URL",
        default_value = "sqlite://portier.db?mode=rwc"
    )]
    database_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run task consumers until SIGINT/SIGTERM
    Worker {
        /// Families to consume (default: all)
        #[arg(long = "family", value_enum)]
        families: Vec<Family>,

        /// Prometheus listener address
        #[arg(long, env = "PORTIER_METRICS_ADDR")]
        metrics_addr: Option<SocketAddr>,

        /// Keep dead tokens and sessions this many days before the sweep deletes them
        #[arg(long, default_value = "7")]
        retention_days: u32,
    },
    /// Republish the notification for an active confirmation token
    Resend {
        /// Confirmation token
        token: String,
    },
    /// Delete expired or finished tokens and sessions
    Cleanup {
        /// Keep dead rows this many days
        #[arg(long, default_value = "7")]
        retention_days: u32,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Family {
    Email,
    Reports,
}

// ────────────────────────────────────── CLI Commands ──────────────────────────────────────

async fn cmd_worker(
    db_url: &str,
    families: Vec<Family>,
    metrics_addr: Option<SocketAddr>,
    retention_days: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::from_env()?;
    startup::require_shared_broker("worker", &config.broker_url)?;
    if let Some(addr) = metrics_addr {
        init_metrics(addr)?;
        info!(%addr, "metrics listener started");
    }

    let (store, broker) = startup::connect(
        db_url,
        &config.broker_url,
        config.startup_timeout,
        RetryPolicy::default(),
    )
    .await?;
    let dispatcher = create_dispatcher(&config.email)?;
    let store: Arc<dyn Store> = Arc::new(store);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let server = Portier::new(config, store.clone(), broker, clock.clone())?;

    let families = if families.is_empty() {
        vec![Family::Email, Family::Reports]
    } else {
        families
    };

    let shutdown = CancellationToken::new();
    let mut workers = JoinSet::new();
    for family in families {
        let token = shutdown.child_token();
        match family {
            Family::Email => {
                let consumer = server.email_consumer(dispatcher.clone());
                workers.spawn(async move { consumer.run(token).await });
            }
            Family::Reports => {
                let consumer = server.report_consumer();
                workers.spawn(async move { consumer.run(token).await });
            }
        }
    }

    let sweeper = tokio::spawn(hygiene::run_periodic(
        store,
        clock,
        chrono::Duration::days(retention_days.into()),
        hygiene::SWEEP_INTERVAL,
        shutdown.child_token(),
    ));

    // A family whose consumer dies does not take the others down with it.
    let mut failed = false;
    let signal = shutdown_signal();
    tokio::pin!(signal);
    loop {
        tokio::select! {
            _ = &mut signal => break,
            result = workers.join_next() => match result {
                Some(result) => report_worker_exit(result, &mut failed),
                None => {
                    error!("all consumers stopped");
                    break;
                }
            },
        }
    }
    shutdown.cancel();

    while let Some(result) = workers.join_next().await {
        report_worker_exit(result, &mut failed);
    }
    let _ = sweeper.await;

    if failed {
        return Err("a consumer stopped with an error".into());
    }
    info!("workers stopped");
    Ok(())
}

fn report_worker_exit(
    result: Result<Result<(), portier_queue::QueueError>, tokio::task::JoinError>,
    failed: &mut bool,
) {
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!(error = %e, "consumer failed");
            *failed = true;
        }
        Err(e) => {
            error!(error = %e, "consumer panicked");
            *failed = true;
        }
    }
}

async fn cmd_resend(db_url: &str, token: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::from_env()?;
    startup::require_shared_broker("resend", &config.broker_url)?;
    let (store, broker) = startup::connect(
        db_url,
        &config.broker_url,
        config.startup_timeout,
        RetryPolicy::default(),
    )
    .await?;
    let server = Portier::new(config, Arc::new(store), broker, Arc::new(SystemClock))?;

    let record = server.tokens.get_active(token, None).await?;
    let task = EmailTask::for_token(&record);
    server.producer.try_publish(&EMAIL_TASKS, &task).await?;

    println!("✓ Notification requeued");
    println!("Type:    {}", record.token_type.as_str());
    println!("Expires: {}", record.expires_at);
    Ok(())
}

async fn cmd_cleanup(db_url: &str, retention_days: u32) -> Result<(), Box<dyn std::error::Error>> {
    let store = SqliteStore::open(db_url).await?;
    let report = hygiene::sweep(
        &store,
        &SystemClock,
        chrono::Duration::days(retention_days.into()),
    )
    .await?;

    println!(
        "✓ Deleted {} tokens and {} sessions",
        report.tokens, report.sessions
    );
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            error!(error = %e, "failed to install signal handlers");
            std::future::pending::<()>().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {
            info!("received SIGTERM, shutting down");
        }
        _ = sigint.recv() => {
            info!("received SIGINT, shutting down");
        }
    }
}

// ────────────────────────────────────── Main ──────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Worker {
            families,
            metrics_addr,
            retention_days,
        } => {
            cmd_worker(&cli.database_url, families, metrics_addr, retention_days).await?;
        }
        Command::Resend { token } => {
            cmd_resend(&cli.database_url, &token).await?;
        }
        Command::Cleanup { retention_days } => {
            cmd_cleanup(&cli.database_url, retention_days).await?;
        }
    }

    Ok(())
}
