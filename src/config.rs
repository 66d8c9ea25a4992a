use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub gateway: GatewayConfig,
    /// Request store; in-memory when absent
    #[serde(default)]
    pub postgres: Option<PostgresConfig>,
    #[serde(default)]
    pub settlement: SettlementConfig,
    pub services: ServicesConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Outbound buffer per live connection
    #[serde(default = "default_ws_buffer")]
    pub ws_buffer: usize,
}

fn default_ws_buffer() -> usize {
    64
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PostgresConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    50
}

fn default_acquire_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SettlementConfig {
    /// Currency every fiat ledger movement is denominated in
    pub currency: String,
    /// Pending requests older than this are cancelled instead of executed
    pub request_ttl_secs: u64,
}

/// Upper bound on the pending window
const MAX_REQUEST_TTL_SECS: u64 = 30 * 24 * 60 * 60;

impl SettlementConfig {
    pub fn request_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.request_ttl_secs.min(MAX_REQUEST_TTL_SECS) as i64)
    }
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            currency: "USD".to_string(),
            request_ttl_secs: 15 * 60,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServiceEndpoint {
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Retries for idempotent reads
    #[serde(default = "default_retries")]
    pub retries: usize,
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_retries() -> usize {
    2
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServicesConfig {
    pub ledger: ServiceEndpoint,
    pub partner: ServiceEndpoint,
    pub custody: ServiceEndpoint,
    pub profile: ServiceEndpoint,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MonitorConfig {
    pub poll_interval_secs: u64,
    pub max_duration_secs: u64,
    /// Re-attach monitors to on-chain requests at startup
    pub resume_on_startup: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 15,
            max_duration_secs: 60 * 60,
            resume_on_startup: true,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", config_path))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
log_level: info
log_dir: ./logs
log_file: multirail.log
use_json: false
rotation: daily
gateway:
  host: 0.0.0.0
  port: 8090
services:
  ledger: { base_url: "http://localhost:7001" }
  partner: { base_url: "http://localhost:7002" }
  custody: { base_url: "http://localhost:7003", timeout_ms: 10000 }
  profile: { base_url: "http://localhost:7004" }
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let cfg = AppConfig::from_yaml(MINIMAL).unwrap();
        assert!(cfg.postgres.is_none());
        assert_eq!(cfg.settlement.currency, "USD");
        assert_eq!(cfg.settlement.request_ttl_secs, 900);
        assert_eq!(cfg.gateway.ws_buffer, 64);
        assert_eq!(cfg.services.ledger.timeout_ms, 5000);
        assert_eq!(cfg.services.custody.timeout_ms, 10000);
        assert!(cfg.monitor.resume_on_startup);
    }

    #[test]
    fn test_missing_services_is_an_error() {
        let broken = MINIMAL.split("services:").next().unwrap();
        assert!(AppConfig::from_yaml(broken).is_err());
    }

    #[test]
    fn test_shipped_dev_config_parses() {
        let content = include_str!("../config/dev.yaml");
        let cfg = AppConfig::from_yaml(content).unwrap();
        assert_eq!(cfg.gateway.port, 8090);
    }
}
