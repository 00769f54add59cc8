use std::env;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use opsdesk::{
    approvals::escalate_overdue,
    auth::{jwt::JwtService, ROLE_OPERATOR},
    config::AppConfig,
    db::{self, PgPool},
    jobs::{enqueue_job, has_open_job, JOB_FILING_BATCH},
    oauth::state::{OAuthStateStore, PgOAuthStateStore},
    workers::filing::{FilingBatchMode, FilingBatchPayload},
};

const USAGE: &str = "Usage: maintenance <command>

Commands:
  run-migrations              apply pending database migrations
  escalate-approvals          escalate pending approvals past the configured window
  purge-oauth-states          delete expired OAuth state tokens
  queue-filing-batch [mode]   queue a filing run (mode: scan | unprocessed)
  issue-token <name>          print a bearer token for an operator";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let mut args = env::args().skip(1);
    let command = args.next();
    let Some(command) = command.as_deref() else {
        eprintln!("{USAGE}");
        std::process::exit(1);
    };

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        command,
        database_url = %config.redacted_database_url(),
        "loaded configuration"
    );

    match command {
        "run-migrations" => run_migrations(&config)?,
        "escalate-approvals" => escalate_approvals(&config)?,
        "purge-oauth-states" => purge_oauth_states(&config).await?,
        "queue-filing-batch" => queue_filing_batch(&config, args.next().as_deref())?,
        "issue-token" => {
            let Some(name) = args.next() else {
                eprintln!("issue-token requires an operator name\n\n{USAGE}");
                std::process::exit(1);
            };
            issue_token(&config, &name)?;
        }
        other => {
            eprintln!("Unknown command: {other}\n\n{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn pool(config: &AppConfig) -> Result<PgPool> {
    db::init_pool_with_size(&config.database_url, 1)
}

fn run_migrations(config: &AppConfig) -> Result<()> {
    let pool = pool(config)?;
    let mut conn = pool.get().context("failed to get database connection")?;
    let applied = db::run_migrations(&mut conn)?;
    println!("Applied {applied} migrations.");
    Ok(())
}

fn escalate_approvals(config: &AppConfig) -> Result<()> {
    let pool = pool(config)?;
    let mut conn = pool.get().context("failed to get database connection")?;
    let escalated = escalate_overdue(
        &mut conn,
        config.approval_escalation_hours,
        Utc::now().naive_utc(),
    )
    .context("failed to escalate approvals")?;

    for item in &escalated {
        tracing::info!(approval_id = %item.id, title = %item.title, "approval escalated");
    }
    println!("Escalated {} approvals.", escalated.len());
    Ok(())
}

async fn purge_oauth_states(config: &AppConfig) -> Result<()> {
    let store = PgOAuthStateStore::new(pool(config)?, config.oauth_state_ttl_minutes);
    let purged = store
        .purge_expired()
        .await
        .map_err(|err| anyhow::anyhow!("failed to purge oauth states: {err}"))?;
    println!("Purged {purged} expired OAuth states.");
    Ok(())
}

fn queue_filing_batch(config: &AppConfig, mode: Option<&str>) -> Result<()> {
    let mode = match mode {
        None | Some("scan") => FilingBatchMode::Scan,
        Some("unprocessed") => FilingBatchMode::Unprocessed,
        Some(other) => anyhow::bail!("unknown filing mode `{other}`"),
    };

    let pool = pool(config)?;
    let mut conn = pool.get().context("failed to get database connection")?;
    if has_open_job(&mut conn, JOB_FILING_BATCH)? {
        println!("A filing batch is already queued or running.");
        return Ok(());
    }

    let payload = serde_json::to_value(FilingBatchPayload { mode })?;
    let job = enqueue_job(&mut conn, JOB_FILING_BATCH, payload, None)?;
    println!("Queued filing batch {}.", job.id);
    Ok(())
}

fn issue_token(config: &AppConfig, name: &str) -> Result<()> {
    let jwt = JwtService::from_config(config)?;
    let token = jwt.generate_token(Uuid::new_v4(), name, ROLE_OPERATOR)?;
    println!("{token}");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .init();
}
