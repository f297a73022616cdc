//! Process lifecycle: wiring, signal handling, supervision, and ordered
//! teardown.
//!
//! Shutdown order: signal → root token cancelled → workers drain → DLQ
//! producer flushes and closes → HTTP server stops within its bound →
//! storage closes.

use crate::cache::OrderCache;
use crate::config::{BrokerType, Config, ConfigError, ProbeConfig};
use crate::consumer::ConsumerPool;
use crate::notifier::{notify_best_effort, NoopNotifier, Notifier, TelegramNotifier};
use crate::routes;
use crate::service::OrderService;
use crate::storage::{OrderStore, PgOrderStore};
use event_log::{
    InMemoryLog, KafkaConsumerConfig, KafkaLogConsumer, KafkaLogProducer, KafkaProducerConfig,
    LogConsumer, LogProducer,
};
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("log client error: {0}")]
    Log(#[from] event_log::LogError),

    #[error("server error: {0}")]
    Server(String),

    #[error("emergency shutdown: all consumer workers terminated")]
    Emergency,
}

/// Run the service until a shutdown signal or a fatal condition.
pub async fn run(config: Config) -> Result<(), AppError> {
    let cancel = CancellationToken::new();
    tokio::spawn(watch_signals(cancel.clone()));

    // Storage
    let pool = crate::db::init_pool(&config.database).await?;
    sqlx::migrate!("./db/migrations").run(&pool).await?;
    info!("database migrations applied");
    let store: Arc<dyn OrderStore> = Arc::new(PgOrderStore::new(pool));

    // Cache, warmed from storage (failure logged, cache starts empty)
    let cache = Arc::new(OrderCache::new(&config.cache));
    cache.warm_up(store.as_ref()).await;

    let notifier: Arc<dyn Notifier> = if config.notifier.is_configured() {
        Arc::new(TelegramNotifier::new(
            config.notifier.telegram_bot_token.clone(),
            config.notifier.telegram_chat_id.clone(),
        ))
    } else {
        info!("no alert channel configured, critical notifications are disabled");
        Arc::new(NoopNotifier)
    };

    // Message log + DLQ producer
    let (log_consumer, dlq_producer): (Arc<dyn LogConsumer>, Arc<dyn LogProducer>) =
        match config.consumer.broker_type {
            BrokerType::Kafka => {
                info!(brokers = ?config.consumer.brokers, topic = %config.consumer.topic, "using kafka message log");
                (
                    Arc::new(KafkaLogConsumer::new(&KafkaConsumerConfig {
                        brokers: config.consumer.brokers.clone(),
                        topic: config.consumer.topic.clone(),
                        group_id: config.consumer.group_id.clone(),
                        client_id: config.consumer.client_id.clone(),
                        auto_offset_reset: "earliest".to_string(),
                    })?),
                    Arc::new(KafkaLogProducer::new(&KafkaProducerConfig {
                        brokers: config.dlq.brokers.clone(),
                        client_id: config.dlq.client_id.clone(),
                        acks: config.dlq.acks.clone(),
                        retries: config.dlq.retries,
                        linger_ms: config.dlq.linger_ms,
                        batch_size: config.dlq.batch_size,
                        compression: config.dlq.compression.clone(),
                        idempotence: config.dlq.idempotence,
                        retry_attempts: config.dlq.retry_attempts,
                        produce_retry_delay: config.dlq.produce_retry_delay,
                        event_timeout: config.dlq.event_timeout,
                        flush_timeout: config.dlq.flush_timeout,
                    })?),
                )
            }
            BrokerType::InMemory => {
                info!("using in-memory message log");
                let log = InMemoryLog::new();
                (
                    Arc::new(log.consumer(config.consumer.topic.clone(), config.consumer.group_id.clone())),
                    Arc::new(log.producer()),
                )
            }
        };

    // DB probe feeding the cache sweeper's status signal
    let (status_tx, status_rx) = watch::channel(true);
    let probe = tokio::spawn(run_db_probe(
        Arc::clone(&store),
        Arc::clone(&notifier),
        config.probe.clone(),
        status_tx,
        cancel.clone(),
    ));

    let sweeper = tokio::spawn(Arc::clone(&cache).run_sweeper(cancel.clone(), status_rx));

    // Consumer pool
    let consumer_pool = ConsumerPool::start(
        log_consumer,
        dlq_producer,
        config.dlq.topic.clone(),
        Arc::clone(&store),
        Arc::clone(&notifier),
        config.consumer.clone(),
        config.workers.clone(),
        cancel.clone(),
    );

    // HTTP server
    let service = Arc::new(OrderService::new(Arc::clone(&store), Arc::clone(&cache)));
    let router = routes::router(service)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(config.server.request_timeout()));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::Server(format!("failed to bind {addr}: {e}")))?;
    info!(addr = %addr, "server receiving requests");

    let server = tokio::spawn(run_server(
        listener,
        router,
        cancel.clone(),
        config.server.shutdown_timeout,
    ));

    // Block until something cancels the root token
    cancel.cancelled().await;
    info!("shutting down");

    let pool_clean = consumer_pool.shutdown().await;
    let server_clean = server.await.unwrap_or(false);
    let _ = probe.await;
    let _ = sweeper.await;
    store.close().await;

    if !pool_clean {
        return Err(AppError::Emergency);
    }
    if !server_clean {
        return Err(AppError::Server("server terminated unexpectedly".to_string()));
    }
    info!("shutdown complete");
    Ok(())
}

/// First interrupt or termination signal cancels the root token; the signal
/// name is logged so operators can tell who asked the process to stop.
/// Signals after the first are ignored.
async fn watch_signals(cancel: CancellationToken) {
    let mut interrupt = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to register SIGINT handler");
            return;
        }
    };
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to register SIGTERM handler");
            return;
        }
    };

    let name = tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
    };
    info!(signal = name, "shutdown signal received");
    cancel.cancel();
}

/// Ping storage on a fixed interval and publish DB health to the sweeper.
///
/// Entering the down state takes `max_checks` consecutive failures and emits
/// one critical notification; the first successful ping afterwards clears
/// the suppression and publishes recovery.
async fn run_db_probe(
    store: Arc<dyn OrderStore>,
    notifier: Arc<dyn Notifier>,
    config: ProbeConfig,
    status: watch::Sender<bool>,
    cancel: CancellationToken,
) {
    let mut failures: u32 = 0;
    let mut down = false;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(config.check_interval) => {}
        }
        match store.ping().await {
            Ok(()) => {
                if down {
                    info!("database connection restored");
                    let _ = status.send(true);
                    down = false;
                }
                failures = 0;
            }
            Err(e) => {
                failures += 1;
                warn!(failures, max = config.max_checks, error = %e, "database ping failed");
                if !down && failures >= config.max_checks {
                    error!("database is unreachable");
                    notify_best_effort(
                        notifier.as_ref(),
                        "CRITICAL ERROR — database is unreachable",
                    )
                    .await;
                    let _ = status.send(false);
                    down = true;
                }
            }
        }
    }
}

/// Serve until cancellation, then shut down gracefully within the bound.
/// Returns whether the exit was a normal shutdown.
async fn run_server(
    listener: TcpListener,
    router: axum::Router,
    cancel: CancellationToken,
    shutdown_timeout: Duration,
) -> bool {
    let graceful = axum::serve(listener, router)
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .into_future();

    tokio::select! {
        result = graceful => match result {
            Ok(()) if cancel.is_cancelled() => {
                info!("server shutdown complete");
                true
            }
            Ok(()) => {
                error!("server exited unexpectedly");
                cancel.cancel();
                false
            }
            Err(e) => {
                error!(error = %e, "server failed");
                cancel.cancel();
                false
            }
        },
        _ = async {
            cancel.cancelled().await;
            tokio::time::sleep(shutdown_timeout).await;
        } => {
            warn!("server shutdown timed out, aborting open connections");
            true
        }
    }
}
