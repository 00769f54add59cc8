use std::{sync::Arc, time::Duration};

use tokio::signal;
use tracing_subscriber::EnvFilter;

use opsdesk::{config::AppConfig, db, default_handlers, state::AppState, Worker};

const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "worker",
        database_url = %config.redacted_database_url(),
        notifications = config.notification_webhook_url.is_some(),
        s3_bucket = %config.s3_bucket,
        "loaded configuration"
    );

    // One job at a time, so one connection is enough.
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let state = Arc::new(AppState::connect(pool, config).await?);
    let worker = Worker::new(state, default_handlers(), POLL_INTERVAL);

    worker
        .run_until(async {
            let _ = signal::ctrl_c().await;
            tracing::info!("worker received shutdown signal");
        })
        .await;

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
