use serde::Deserialize;
use std::fs;

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub uri: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushConfig {
    pub endpoint: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeakConfig {
    pub interval_secs: u64,
    pub run_timeout_secs: u64,
    pub concurrency: usize,
    /// Optional per-user suppression window for repeat alerts. Unset keeps
    /// the historical behavior: a sustained leak re-alerts every cycle.
    pub cooldown_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub http: HttpConfig,
    pub push: PushConfig,
    pub leak: LeakConfig,
    pub metrics: Option<MetricsConfig>,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("BILLING_CONFIG").unwrap_or_else(|_| "billing-config.toml".to_string());
        let contents = fs::read_to_string(&path)?;
        let cfg: AppConfig = toml::from_str(&contents)?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_config() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [database]
            uri = "postgres://localhost/aquameter"
            max_connections = 8

            [http]
            bind_addr = "0.0.0.0:3001"

            [push]
            endpoint = "https://exp.host/--/api/v2/push/send"
            timeout_secs = 10

            [leak]
            interval_secs = 600
            run_timeout_secs = 300
            concurrency = 8

            [metrics]
            bind_addr = "0.0.0.0:9090"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.leak.interval_secs, 600);
        assert_eq!(cfg.leak.cooldown_secs, None);
        assert!(cfg.metrics.is_some());
    }
}
