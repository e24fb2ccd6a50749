use anyhow::{bail, Context};
use rtmon_collector::RuntimeField;
use rtmon_common::retry::duration_secs;
use rtmon_common::RetryPolicy;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Aggregator address, `host:port` or a full base URL.
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_poll_interval", with = "duration_secs")]
    pub poll_interval: Duration,
    #[serde(default = "default_report_interval", with = "duration_secs")]
    pub report_interval: Duration,
    /// Number of report workers, and the capacity of the report queue.
    #[serde(default = "default_rate_limit")]
    pub rate_limit: usize,
    /// Upper bound on a single report call, retries excluded.
    #[serde(default = "default_report_timeout", with = "duration_secs")]
    pub report_timeout: Duration,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Runtime fields sampled on every poll.
    #[serde(default = "default_metrics")]
    pub metrics: Vec<String>,
    /// HMAC key for signing batches; empty disables signing.
    #[serde(default)]
    pub key: String,
}

fn default_address() -> String {
    "localhost:8080".to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_report_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_rate_limit() -> usize {
    1
}

fn default_report_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_metrics() -> Vec<String> {
    RuntimeField::ALL
        .iter()
        .map(|f| f.name().to_string())
        .collect()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            poll_interval: default_poll_interval(),
            report_interval: default_report_interval(),
            rate_limit: default_rate_limit(),
            report_timeout: default_report_timeout(),
            retry: RetryPolicy::default(),
            metrics: default_metrics(),
            key: String::new(),
        }
    }
}

impl AgentConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Loads `path` if it exists, falls back to defaults otherwise, then
    /// applies environment overrides.
    pub fn resolve(path: &str) -> anyhow::Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::load(path).with_context(|| format!("reading {path}"))?
        } else {
            tracing::info!(path, "Config file not found, using defaults");
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overrides fields from `ADDRESS`, `POLL_INTERVAL`, `REPORT_INTERVAL`,
    /// `RATE_LIMIT` (intervals in seconds) and `KEY`.
    pub fn apply_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(address) = lookup("ADDRESS") {
            self.address = address;
        }
        if let Some(v) = lookup("POLL_INTERVAL") {
            self.poll_interval = parse_secs("POLL_INTERVAL", &v)?;
        }
        if let Some(v) = lookup("REPORT_INTERVAL") {
            self.report_interval = parse_secs("REPORT_INTERVAL", &v)?;
        }
        if let Some(v) = lookup("RATE_LIMIT") {
            self.rate_limit = v
                .trim()
                .parse()
                .with_context(|| format!("RATE_LIMIT: invalid value '{v}'"))?;
        }
        if let Some(key) = lookup("KEY") {
            self.key = key;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.rate_limit == 0 {
            bail!("rate_limit must be at least 1");
        }
        if self.poll_interval.is_zero() || self.report_interval.is_zero() {
            bail!("poll and report intervals must be positive");
        }
        if self.report_timeout.is_zero() {
            bail!("report_timeout must be positive");
        }
        Ok(())
    }

    pub fn signing_key(&self) -> Option<&str> {
        Some(self.key.as_str()).filter(|k| !k.is_empty())
    }
}

fn parse_secs(key: &str, raw: &str) -> anyhow::Result<Duration> {
    let secs: f64 = raw
        .trim()
        .parse()
        .with_context(|| format!("{key}: invalid value '{raw}'"))?;
    if !secs.is_finite() || secs < 0.0 {
        bail!("{key}: must be a non-negative number of seconds");
    }
    Ok(Duration::from_secs_f64(secs))
}
