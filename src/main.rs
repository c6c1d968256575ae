use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveTime;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use ingestd::config::{IngestConfig, SchedulerConfig};
use ingestd::lock::{build_owner_id, DistributedLock};
use ingestd::runner::{JobOutput, JobRunner, JobSpec, TriggerRule, WeekdaySet};
use ingestd::shutdown::install_shutdown_handler;
use ingestd::store::{MemoryJobStateStore, MemoryLeaseStore};

#[derive(Parser, Debug)]
#[command(name = "ingestd")]
#[command(version)]
#[command(about = "A lease-coordinated scheduler for market-data ingestion jobs")]
struct Args {
    /// Scheduling tick interval in seconds
    #[arg(long, default_value = "60")]
    tick_interval: u64,

    /// Lease TTL in seconds for both ingestion locks
    #[arg(long, default_value = "120")]
    lease_seconds: u32,

    /// Explicit owner id for this instance (defaults to host-pid-uuid)
    #[arg(long)]
    instance_id: Option<String>,

    /// Tickers to ingest
    #[arg(long, value_delimiter = ',', default_values = ["TSM", "AAPL", "NVDA", "^GSPC"])]
    tickers: Vec<String>,

    /// Run without the ingestion scheduler (serve-only instance)
    #[arg(long)]
    disable_scheduler: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = {
        let mut cfg = IngestConfig::default()
            .with_tickers(args.tickers)
            .with_lease_seconds(args.lease_seconds)
            .with_scheduler_enabled(!args.disable_scheduler);
        if let Some(id) = args.instance_id {
            cfg = cfg.with_instance_id(id);
        }
        cfg
    };

    if !config.enable_scheduler {
        tracing::info!("scheduler disabled, running without ingestion jobs");
        install_shutdown_handler().cancelled().await;
        tracing::info!("ingestd stopped");
        return Ok(());
    }

    let owner_id = build_owner_id(config.instance_id.as_deref());
    tracing::info!(owner = %owner_id, "starting ingestd");

    // Single-process store. Multi-instance deployments plug in an adapter for
    // their shared store here; the coordination protocol is identical.
    let lease_store = Arc::new(MemoryLeaseStore::new());
    let state_store = Arc::new(MemoryJobStateStore::new());
    let lock = DistributedLock::new(lease_store, owner_id);

    let scheduler_config =
        SchedulerConfig::default().with_tick_interval(Duration::from_secs(args.tick_interval));
    let runner = JobRunner::new(lock, state_store, &scheduler_config);
    let jobs = build_jobs(&config)?;
    let handle = runner.start(jobs);

    install_shutdown_handler().cancelled().await;
    handle.stop().await;
    tracing::info!("ingestd stopped");
    Ok(())
}

fn build_jobs(config: &IngestConfig) -> Result<Vec<JobSpec>, Box<dyn std::error::Error>> {
    let session_open = NaiveTime::from_hms_opt(9, 30, 0).expect("valid session open");
    let session_close = NaiveTime::from_hms_opt(16, 0, 0).expect("valid session close");
    let after_close = NaiveTime::from_hms_opt(16, 20, 0).expect("valid daily run time");

    // Intraday bars: every half hour during the trading session.
    let intraday_trigger = TriggerRule::every_minutes(
        30,
        session_open,
        session_close,
        WeekdaySet::weekdays(),
        config.market_tz,
    )?;
    let intraday_tickers = config.tickers.clone();
    let intraday = JobSpec::new(
        "intraday_ingestion",
        &config.intraday_lock,
        config.lease_seconds,
        intraday_trigger,
        move |cancel| ingest_cycle("30m", intraday_tickers.clone(), cancel),
    )
    .with_timeout(Duration::from_secs(600));

    // Daily bars: once, shortly after the close. The wider grace tolerates a
    // restart in the early evening without dropping the day's run.
    let daily_trigger =
        TriggerRule::daily_at(after_close, WeekdaySet::weekdays(), config.market_tz)?;
    let daily_tickers = config.tickers.clone();
    let daily = JobSpec::new(
        "daily_ingestion",
        &config.daily_lock,
        config.lease_seconds,
        daily_trigger,
        move |cancel| ingest_cycle("1d", daily_tickers.clone(), cancel),
    )
    .with_timeout(Duration::from_secs(1800))
    .with_misfire_grace(Duration::from_secs(3600));

    Ok(vec![intraday, daily])
}

/// One ingestion cycle. This is the collaborator boundary: the real fetch,
/// resample, and upsert logic plugs in here, checking `cancel` between
/// tickers so a lost lease stops further writes.
async fn ingest_cycle(
    interval: &'static str,
    tickers: Vec<String>,
    cancel: CancellationToken,
) -> JobOutput {
    for ticker in &tickers {
        if cancel.is_cancelled() {
            return Err("cancelled before completing all tickers".to_string());
        }
        tracing::info!(ticker = %ticker, interval, "ingesting");
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    Ok(())
}
