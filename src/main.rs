mod accounts;
mod config;
mod error;
mod gate;
mod handlers;
mod identity;
mod invoker;
mod metrics;
mod models;
mod rate_limit;
mod state;
mod worker;

#[cfg(test)]
mod testing;

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::accounts::StaticAccounts;
use crate::config::{AccessMode, Args};
use crate::gate::{RequestGate, Tiers};
use crate::invoker::{ModelClient, OpenAiClient};
use crate::models::AnalysisJob;
use crate::rate_limit::{Clock, MemoryLedger, SystemClock, UsageLedger, ledger_sweeper};
use crate::state::AppState;
use crate::worker::analysis_worker;

fn setup_logging() {
    use tracing_subscriber::{
        filter::{EnvFilter, LevelFilter},
        fmt,
    };

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    fmt()
        .with_env_filter(env_filter)
        .with_file(false)
        .with_line_number(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // parse cli arguments
    let args = Args::parse();

    setup_logging();

    let accounts = match &args.accounts_file {
        Some(path) => StaticAccounts::from_file(path)?,
        None => StaticAccounts::default(),
    };
    if accounts.is_empty() && args.access_mode != AccessMode::Anonymous {
        warn!("no accounts loaded, every session will be rejected");
    }
    let accounts = Arc::new(accounts);

    if args.api_key.is_empty() {
        warn!("no upstream API key configured");
    }

    let ledger: Arc<dyn UsageLedger> = Arc::new(MemoryLedger::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let gate = RequestGate::new(
        Arc::clone(&ledger),
        accounts.clone(),
        accounts.clone(),
        Arc::clone(&clock),
        args.access_mode,
        Tiers {
            anonymous: args.anonymous_policy(),
            subscriber: args.subscriber_policy(),
        },
    )
    .charge_invalid_requests(args.charge_invalid_requests);

    let (job_tx, job_rx) = mpsc::channel::<AnalysisJob>(args.queue_capacity.max(1));

    let state = Arc::new(AppState { gate, job_tx });

    // spawn the background worker
    let model: Arc<dyn ModelClient> = Arc::new(OpenAiClient::new(
        reqwest::Client::new(),
        &args.upstream_url,
        args.api_key.clone(),
        args.model.clone(),
        args.temperature,
        args.max_tokens,
        Duration::from_secs(args.upstream_timeout),
    ));
    tokio::spawn(analysis_worker(job_rx, model, args.workers));

    tokio::spawn(ledger_sweeper(
        ledger,
        clock,
        Duration::from_secs(args.sweep_interval),
    ));

    let app = handlers::router(state);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(port = args.port, "gateway running");
    info!(upstream = %args.upstream_url, model = %args.model, "forwarding analyses");
    info!(
        mode = ?args.access_mode,
        accounts = accounts.len(),
        "access mode"
    );
    info!(
        anonymous = %format!("{} {}", args.rate_limit, args.anonymous_policy().cadence()),
        subscriber = %format!("{} {}", args.monthly_quota, args.subscriber_policy().cadence()),
        "usage limits"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
