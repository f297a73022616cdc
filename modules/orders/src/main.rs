use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use orders_rs::config::Config;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            return ExitCode::from(1);
        }
    };

    tracing::info!(
        workers = config.workers.count,
        cache_size = config.cache.cache_size,
        broker = ?config.consumer.broker_type,
        "starting order service"
    );

    if let Err(e) = orders_rs::run(config).await {
        tracing::error!(error = %e, "service terminated");
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}
