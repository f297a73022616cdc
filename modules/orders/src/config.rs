//! Application configuration parsed from environment variables.
//!
//! Every knob has a default except `DATABASE_URL`; durations are integer
//! variables with a `_MS` or `_SECS` suffix.

use std::env;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{0} has an invalid value: {1}")]
    Invalid(&'static str, String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub probe: ProbeConfig,
    pub workers: WorkersConfig,
    pub cache: CacheConfig,
    pub consumer: ConsumerConfig,
    pub dlq: DlqConfig,
    pub notifier: NotifierConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    /// Single request deadline derived from the read/write budgets.
    pub fn request_timeout(&self) -> Duration {
        self.read_timeout.max(self.write_timeout)
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub check_interval: Duration,
    pub max_checks: u32,
}

#[derive(Debug, Clone)]
pub struct WorkersConfig {
    pub count: usize,
    pub restart_on_panic: bool,
    pub restart_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub save_in_cache: bool,
    pub cache_size: usize,
    pub bg_cleanup: bool,
    pub cleanup_interval: Duration,
    pub order_ttl: Duration,
    pub pause_duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerType {
    Kafka,
    InMemory,
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub broker_type: BrokerType,
    pub brokers: Vec<String>,
    pub topic: String,
    pub group_id: String,
    pub client_id: String,
    pub save_order_retry_max: usize,
    pub save_order_retry_delay: Duration,
    pub commit_retry_max: usize,
    pub commit_retry_delay: Duration,
    pub event_type_errors_max: usize,
    pub event_type_error_retry_delay: Duration,
    pub db_conn_check_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct DlqConfig {
    pub topic: String,
    pub brokers: Vec<String>,
    pub client_id: String,
    pub acks: String,
    pub retries: u32,
    pub linger_ms: u64,
    pub batch_size: usize,
    pub compression: String,
    pub idempotence: bool,
    pub retry_attempts: usize,
    pub produce_retry_delay: Duration,
    pub event_timeout: Duration,
    pub flush_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub telegram_bot_token: String,
    pub telegram_chat_id: String,
}

impl NotifierConfig {
    pub fn is_configured(&self) -> bool {
        !self.telegram_bot_token.is_empty() && !self.telegram_chat_id.is_empty()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let broker_list = string_var("KAFKA_BROKERS", "localhost:9092");
        let brokers: Vec<String> = broker_list.split(',').map(|s| s.trim().to_string()).collect();

        Ok(Config {
            server: ServerConfig {
                host: string_var("HOST", "0.0.0.0"),
                port: parse_var("PORT", 8081)?,
                read_timeout: ms_var("SERVER_READ_TIMEOUT_MS", 5000)?,
                write_timeout: ms_var("SERVER_WRITE_TIMEOUT_MS", 5000)?,
                shutdown_timeout: ms_var("SERVER_SHUTDOWN_TIMEOUT_MS", 5000)?,
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
                max_connections: parse_var("DB_MAX_CONNECTIONS", 10)?,
                min_connections: parse_var("DB_MIN_CONNECTIONS", 0)?,
                acquire_timeout: secs_var("DB_ACQUIRE_TIMEOUT_SECS", 3)?,
                idle_timeout: secs_var("DB_IDLE_TIMEOUT_SECS", 300)?,
                max_lifetime: secs_var("DB_MAX_LIFETIME_SECS", 1800)?,
            },
            probe: ProbeConfig {
                check_interval: ms_var("DB_CHECK_INTERVAL_MS", 5000)?,
                max_checks: parse_var("DB_MAX_CHECKS", 3)?,
            },
            workers: WorkersConfig {
                count: parse_var("WORKERS_COUNT", 3)?,
                restart_on_panic: bool_var("WORKERS_RESTART_ON_PANIC", false)?,
                restart_delay: ms_var("WORKERS_RESTART_DELAY_MS", 2000)?,
            },
            cache: CacheConfig {
                save_in_cache: bool_var("CACHE_SAVE_IN_CACHE", true)?,
                cache_size: parse_var("CACHE_SIZE", 100)?,
                bg_cleanup: bool_var("CACHE_BG_CLEANUP", true)?,
                cleanup_interval: ms_var("CACHE_CLEANUP_INTERVAL_MS", 60_000)?,
                order_ttl: ms_var("CACHE_ORDER_TTL_MS", 600_000)?,
                pause_duration: ms_var("CACHE_PAUSE_DURATION_MS", 10_000)?,
            },
            consumer: ConsumerConfig {
                broker_type: broker_type_var()?,
                brokers: brokers.clone(),
                topic: string_var("KAFKA_TOPIC", "orders"),
                group_id: string_var("KAFKA_GROUP_ID", "orders"),
                client_id: string_var("KAFKA_CLIENT_ID", "order-service"),
                save_order_retry_max: parse_var("SAVE_ORDER_RETRY_MAX", 3)?,
                save_order_retry_delay: ms_var("SAVE_ORDER_RETRY_DELAY_MS", 500)?,
                commit_retry_max: parse_var("COMMIT_RETRY_MAX", 3)?,
                commit_retry_delay: ms_var("COMMIT_RETRY_DELAY_MS", 500)?,
                event_type_errors_max: parse_var("EVENT_TYPE_ERRORS_MAX", 5)?,
                event_type_error_retry_delay: ms_var("EVENT_TYPE_ERROR_RETRY_DELAY_MS", 1000)?,
                db_conn_check_delay: ms_var("DB_CONN_CHECK_DELAY_MS", 2000)?,
            },
            dlq: DlqConfig {
                topic: string_var("DLQ_TOPIC", "orders-dlq"),
                brokers: match env::var("DLQ_BROKERS") {
                    Ok(v) => v.split(',').map(|s| s.trim().to_string()).collect(),
                    Err(_) => brokers,
                },
                client_id: string_var("DLQ_CLIENT_ID", "order-service-dlq"),
                acks: string_var("DLQ_ACKS", "all"),
                retries: parse_var("DLQ_RETRIES", 3)?,
                linger_ms: parse_var("DLQ_LINGER_MS", 5)?,
                batch_size: parse_var("DLQ_BATCH_SIZE", 16384)?,
                compression: string_var("DLQ_COMPRESSION", "none"),
                idempotence: bool_var("DLQ_IDEMPOTENCE", true)?,
                retry_attempts: parse_var("DLQ_RETRY_ATTEMPTS", 3)?,
                produce_retry_delay: ms_var("DLQ_PRODUCE_RETRY_DELAY_MS", 500)?,
                event_timeout: ms_var("DLQ_EVENT_TIMEOUT_MS", 5000)?,
                flush_timeout: ms_var("DLQ_FLUSH_TIMEOUT_MS", 5000)?,
            },
            notifier: NotifierConfig {
                telegram_bot_token: string_var("TELEGRAM_BOT_TOKEN", ""),
                telegram_chat_id: string_var("TELEGRAM_CHAT_ID", ""),
            },
        })
    }
}

fn string_var(name: &'static str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid(name, raw)),
        Err(_) => Ok(default),
    }
}

fn bool_var(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match env::var(name) {
        Ok(raw) => match raw.to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(ConfigError::Invalid(name, raw)),
        },
        Err(_) => Ok(default),
    }
}

fn ms_var(name: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
    Ok(Duration::from_millis(parse_var(name, default_ms)?))
}

fn secs_var(name: &'static str, default_secs: u64) -> Result<Duration, ConfigError> {
    Ok(Duration::from_secs(parse_var(name, default_secs)?))
}

fn broker_type_var() -> Result<BrokerType, ConfigError> {
    match string_var("BROKER_TYPE", "inmemory").to_lowercase().as_str() {
        "kafka" => Ok(BrokerType::Kafka),
        "inmemory" => Ok(BrokerType::InMemory),
        other => Err(ConfigError::Invalid("BROKER_TYPE", other.to_string())),
    }
}
