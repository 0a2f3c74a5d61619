use serde::{Deserialize, Serialize};

/// Runtime configuration, built once at startup and threaded explicitly.
/// Scheduler, worker pool, and lookup engine each consume a subset.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// In-batch HTTP fan-out of the lookup engine (rolling window size).
    pub concurrency: usize,
    /// Concurrent claim loops per worker process.
    pub workers: usize,
    /// Lookup engine shards; >1 selects the sharded engine (W windows of
    /// `concurrency` each).
    pub lookup_shards: usize,
    /// Slice size claimed per pipeline iteration.
    pub batch_size: usize,
    /// Max stale domains scanned per scheduler tick.
    pub stale_batch: usize,
    /// A domain is stale once last_checked is older than this.
    pub stale_after_hours: i64,
    pub scheduler_interval_secs: u64,
    pub worker_idle_sleep_secs: u64,
    /// WHOIS fallback cap per batch; names over the cap get a synthesized miss.
    pub fallback_cap: usize,
    pub rdap_bootstrap_url: String,
    pub ntfy_server: String,
    pub ntfy_topic: String,
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_user: Option<String>,
    pub smtp_pass: Option<String>,
    pub smtp_from: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigData {
    pub database_url: String,
    pub port: u16,
    pub concurrency: usize,
    pub workers: usize,
    pub lookup_shards: usize,
    pub batch_size: usize,
    pub stale_batch: usize,
    pub stale_after_hours: i64,
    pub scheduler_interval_secs: u64,
    pub worker_idle_sleep_secs: u64,
    pub fallback_cap: usize,
    pub rdap_bootstrap_url: String,
    pub ntfy_server: String,
    pub ntfy_topic: String,
    #[serde(default)]
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_user: Option<String>,
    #[serde(default)]
    pub smtp_pass: Option<String>,
    #[serde(default)]
    pub smtp_from: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let mut settings = config::Config::builder()
            .set_default("database_url", "sqlite://domain-sentry.db")?
            .set_default("port", 3000_i64)?
            .set_default("concurrency", 200_i64)?
            .set_default("workers", 4_i64)?
            .set_default("lookup_shards", 1_i64)?
            .set_default("batch_size", 1000_i64)?
            .set_default("stale_batch", 500_i64)?
            .set_default("stale_after_hours", 24_i64)?
            .set_default("scheduler_interval_secs", 60_i64)?
            .set_default("worker_idle_sleep_secs", 5_i64)?
            .set_default("fallback_cap", 20_i64)?
            .set_default("rdap_bootstrap_url", "https://data.iana.org/rdap/dns.json")?
            .set_default("ntfy_server", "https://ntfy.sh")?
            .set_default("ntfy_topic", "domain-sentry")?
            .set_default("smtp_port", 587_i64)?;

        settings = Self::apply_env_overrides(settings)?;

        let data: ConfigData = settings.build()?.try_deserialize()?;

        Ok(Self::from_data(data))
    }

    fn from_data(data: ConfigData) -> Self {
        Config {
            database_url: data.database_url,
            port: data.port,
            // Out-of-range knobs are clamped, not rejected.
            concurrency: data.concurrency.clamp(10, 1000),
            workers: data.workers.clamp(1, 32),
            lookup_shards: data.lookup_shards.clamp(1, 32),
            batch_size: data.batch_size.clamp(1, 5000),
            stale_batch: data.stale_batch.max(100),
            stale_after_hours: data.stale_after_hours.max(1),
            scheduler_interval_secs: data.scheduler_interval_secs.max(1),
            worker_idle_sleep_secs: data.worker_idle_sleep_secs.clamp(3, 10),
            fallback_cap: data.fallback_cap,
            rdap_bootstrap_url: data.rdap_bootstrap_url,
            ntfy_server: data.ntfy_server,
            ntfy_topic: data.ntfy_topic,
            smtp_host: data.smtp_host.filter(|h| !h.is_empty()),
            smtp_port: data.smtp_port,
            smtp_user: data.smtp_user,
            smtp_pass: data.smtp_pass,
            smtp_from: data.smtp_from,
        }
    }

    fn apply_env_overrides(
        mut settings: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError> {
        let env_mappings = [
            ("DATABASE_URL", "database_url"),
            ("PORT", "port"),
            ("SENTRY_CONCURRENCY", "concurrency"),
            ("SENTRY_WORKERS", "workers"),
            ("SENTRY_LOOKUP_SHARDS", "lookup_shards"),
            ("SENTRY_BATCH_SIZE", "batch_size"),
            ("SENTRY_STALE_BATCH", "stale_batch"),
            ("SENTRY_STALE_AFTER_HOURS", "stale_after_hours"),
            ("SENTRY_SCHEDULER_INTERVAL", "scheduler_interval_secs"),
            ("SENTRY_IDLE_SLEEP", "worker_idle_sleep_secs"),
            ("SENTRY_FALLBACK_CAP", "fallback_cap"),
            ("RDAP_BOOTSTRAP_URL", "rdap_bootstrap_url"),
            ("NTFY_SERVER", "ntfy_server"),
            ("NTFY_TOPIC", "ntfy_topic"),
            ("SMTP_HOST", "smtp_host"),
            ("SMTP_PORT", "smtp_port"),
            ("SMTP_USER", "smtp_user"),
            ("SMTP_PASS", "smtp_pass"),
            ("SMTP_FROM", "smtp_from"),
        ];

        for (env_var, config_key) in env_mappings {
            if let Ok(value) = std::env::var(env_var) {
                settings = settings.set_override(config_key, value)?;
            }
        }

        Ok(settings)
    }

    /// Whether outbound email is configured at all.
    pub fn smtp_enabled(&self) -> bool {
        self.smtp_host.is_some()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_data(ConfigData {
            database_url: "sqlite::memory:".to_string(),
            port: 3000,
            concurrency: 200,
            workers: 4,
            lookup_shards: 1,
            batch_size: 1000,
            stale_batch: 500,
            stale_after_hours: 24,
            scheduler_interval_secs: 60,
            worker_idle_sleep_secs: 5,
            fallback_cap: 20,
            rdap_bootstrap_url: "https://data.iana.org/rdap/dns.json".to_string(),
            ntfy_server: "https://ntfy.sh".to_string(),
            ntfy_topic: "domain-sentry".to_string(),
            smtp_host: None,
            smtp_port: 587,
            smtp_user: None,
            smtp_pass: None,
            smtp_from: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn knobs_are_clamped_to_spec_ranges() {
        let mut data = ConfigData {
            database_url: "sqlite::memory:".into(),
            port: 3000,
            concurrency: 5000,
            workers: 100,
            lookup_shards: 0,
            batch_size: 0,
            stale_batch: 10,
            stale_after_hours: 0,
            scheduler_interval_secs: 0,
            worker_idle_sleep_secs: 60,
            fallback_cap: 20,
            rdap_bootstrap_url: String::new(),
            ntfy_server: String::new(),
            ntfy_topic: String::new(),
            smtp_host: Some(String::new()),
            smtp_port: 587,
            smtp_user: None,
            smtp_pass: None,
            smtp_from: None,
        };
        let cfg = Config::from_data(data.clone());
        assert_eq!(cfg.concurrency, 1000);
        assert_eq!(cfg.workers, 32);
        assert_eq!(cfg.batch_size, 1);
        assert_eq!(cfg.stale_batch, 100);
        assert_eq!(cfg.worker_idle_sleep_secs, 10);
        // Empty SMTP host means email is disabled.
        assert!(!cfg.smtp_enabled());

        data.concurrency = 1;
        let cfg = Config::from_data(data);
        assert_eq!(cfg.concurrency, 10);
    }
}
