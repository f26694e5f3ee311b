use anyhow::{bail, Context};
use serde::Deserialize;
use std::path::Path;

/// How the agent ships its snapshot to the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportMode {
    /// The whole snapshot as one JSON array on `/updates/`.
    #[default]
    Batch,
    /// One JSON object per metric on `/update/`.
    PerMetric,
    /// One legacy `/update/{type}/{name}/{value}` request per metric.
    Unary,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// `host:port` or a full base URL of the server.
    #[serde(default = "default_server_address")]
    pub server_address: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
    /// Number of concurrent delivery workers.
    #[serde(default = "default_rate_limit")]
    pub rate_limit: usize,
    /// Shared secret for the `HashSHA256` body signature.
    #[serde(default)]
    pub hash_key: Option<String>,
    #[serde(default)]
    pub report_mode: ReportMode,
    /// Also report host memory and per-core CPU utilization.
    #[serde(default)]
    pub host_metrics: bool,
    #[serde(default = "default_retry_delays")]
    pub retry_delays_ms: Vec<u64>,
}

fn default_server_address() -> String {
    "localhost:8080".to_string()
}

fn default_poll_interval() -> u64 {
    2
}

fn default_report_interval() -> u64 {
    10
}

fn default_rate_limit() -> usize {
    4
}

fn default_retry_delays() -> Vec<u64> {
    vec![1000, 3000, 5000]
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_address: default_server_address(),
            poll_interval_secs: default_poll_interval(),
            report_interval_secs: default_report_interval(),
            rate_limit: default_rate_limit(),
            hash_key: None,
            report_mode: ReportMode::default(),
            host_metrics: false,
            retry_delays_ms: default_retry_delays(),
        }
    }
}

impl AgentConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Loads `path` when given. Without an explicit path the default file is
    /// used if it exists, otherwise built-in defaults apply.
    pub fn resolve(path: Option<&str>, default_path: &str) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path).with_context(|| format!("loading {path}")),
            None if Path::new(default_path).exists() => Self::load(default_path),
            None => Ok(Self::default()),
        }
    }

    /// Applies `ADDRESS`, `POLL_INTERVAL`, `REPORT_INTERVAL`, `KEY` and
    /// `RATE_LIMIT` overrides.
    pub fn apply_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(address) = lookup("ADDRESS") {
            self.server_address = address;
        }
        if let Some(v) = lookup("POLL_INTERVAL") {
            self.poll_interval_secs = v.parse().context("POLL_INTERVAL")?;
        }
        if let Some(v) = lookup("REPORT_INTERVAL") {
            self.report_interval_secs = v.parse().context("REPORT_INTERVAL")?;
        }
        if let Some(key) = lookup("KEY") {
            self.hash_key = Some(key);
        }
        if let Some(v) = lookup("RATE_LIMIT") {
            self.rate_limit = v.parse().context("RATE_LIMIT")?;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server_address.trim().is_empty() {
            bail!("server_address must not be empty");
        }
        if self.poll_interval_secs == 0 || self.report_interval_secs == 0 {
            bail!("poll and report intervals must be positive");
        }
        if self.rate_limit == 0 {
            bail!("rate_limit must be at least 1");
        }
        Ok(())
    }

    /// Base URL of the server, defaulting to plain HTTP.
    pub fn base_url(&self) -> String {
        let addr = self.server_address.trim().trim_end_matches('/');
        if addr.contains("://") {
            return addr.to_string();
        }
        format!("http://{addr}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_uses_defaults() {
        let config: AgentConfig = toml::from_str("").unwrap();
        assert_eq!(config.server_address, "localhost:8080");
        assert_eq!(config.poll_interval_secs, 2);
        assert_eq!(config.report_mode, ReportMode::Batch);
        assert_eq!(config.retry_delays_ms, vec![1000, 3000, 5000]);
    }

    #[test]
    fn report_mode_parses_snake_case() {
        let config: AgentConfig = toml::from_str("report_mode = \"per_metric\"").unwrap();
        assert_eq!(config.report_mode, ReportMode::PerMetric);
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            ("ADDRESS", "metrics:9000"),
            ("REPORT_INTERVAL", "7"),
            ("KEY", "secret"),
            ("RATE_LIMIT", "2"),
        ]
        .into_iter()
        .collect();
        let mut config = AgentConfig::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.base_url(), "http://metrics:9000");
        assert_eq!(config.report_interval_secs, 7);
        assert_eq!(config.poll_interval_secs, 2);
        assert_eq!(config.hash_key.as_deref(), Some("secret"));
        assert_eq!(config.rate_limit, 2);
    }

    #[test]
    fn bad_env_value_is_an_error() {
        let mut config = AgentConfig::default();
        let err = config
            .apply_env(|k| (k == "POLL_INTERVAL").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("POLL_INTERVAL"));
    }

    #[test]
    fn zero_rate_limit_is_rejected() {
        let config = AgentConfig {
            rate_limit: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn explicit_scheme_is_kept() {
        let config = AgentConfig {
            server_address: "https://collector.example/".into(),
            ..Default::default()
        };
        assert_eq!(config.base_url(), "https://collector.example");
    }
}
