use std::time::Duration;

use chrono_tz::America::New_York;
use chrono_tz::Tz;

/// Scheduling-loop configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often trigger rules are evaluated. Coarser than any job period is
    /// fine: firing is keyed by nominal slot, not by elapsed wall time.
    pub tick_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
        }
    }
}

impl SchedulerConfig {
    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }
}

/// Ingestion deployment settings: which symbols, which locks, how long the
/// leases run.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub tickers: Vec<String>,
    /// Lock guarding the intraday (30-minute bar) ingestion job.
    pub intraday_lock: String,
    /// Lock guarding the after-close daily ingestion job.
    pub daily_lock: String,
    /// Lease TTL for both jobs. Must exceed the expected run duration with
    /// margin for the heartbeat to renew.
    pub lease_seconds: u32,
    /// Explicit owner-id override; generated from host/pid/uuid when absent.
    pub instance_id: Option<String>,
    /// Timezone the trigger windows are expressed in.
    pub market_tz: Tz,
    /// When false the instance serves without running any ingestion jobs.
    pub enable_scheduler: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            tickers: ["TSM", "AAPL", "NVDA", "^GSPC"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            intraday_lock: "ingest_30m".to_string(),
            daily_lock: "ingest_daily".to_string(),
            lease_seconds: 120,
            instance_id: None,
            market_tz: New_York,
            enable_scheduler: true,
        }
    }
}

impl IngestConfig {
    pub fn with_tickers(mut self, tickers: Vec<String>) -> Self {
        self.tickers = tickers;
        self
    }

    pub fn with_lease_seconds(mut self, lease_seconds: u32) -> Self {
        self.lease_seconds = lease_seconds;
        self
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    pub fn with_market_tz(mut self, market_tz: Tz) -> Self {
        self.market_tz = market_tz;
        self
    }

    pub fn with_scheduler_enabled(mut self, enable_scheduler: bool) -> Self {
        self.enable_scheduler = enable_scheduler;
        self
    }
}
