// [[AgentOps]]/apps/crew-monitor/src/config.rs
// Purpose: Environment-driven configuration, read once at boot.
// Architecture: Application Boot
// Dependencies: thiserror

use std::env;
use thiserror::Error;

use crate::store::DEFAULT_HISTORY_LIMIT;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub port: u16,
    pub api_url: String,
    pub stream_path: String,
    pub history_limit: usize,
    pub sync_on_boot: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            port: 3100,
            api_url: "http://localhost:8000".to_string(),
            stream_path: "/api/crew/stream".to_string(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            sync_on_boot: true,
        }
    }
}

impl MonitorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = MonitorConfig::default();

        if let Some(value) = lookup("CREW_MONITOR_PORT") {
            config.port = value.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "CREW_MONITOR_PORT",
                value,
            })?;
        }
        if let Some(value) = lookup("AGENTOPS_API_URL") {
            config.api_url = value.trim().trim_end_matches('/').to_string();
        }
        if let Some(value) = lookup("CREW_STREAM_PATH") {
            config.stream_path = value.trim().to_string();
        }
        if let Some(value) = lookup("CREW_HISTORY_LIMIT") {
            let parsed = value.trim().parse::<usize>();
            config.history_limit = match parsed {
                Ok(limit) if limit >= 1 => limit,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "CREW_HISTORY_LIMIT",
                        value,
                    })
                }
            };
        }
        if let Some(value) = lookup("CREW_SYNC_ON_BOOT") {
            config.sync_on_boot = match value.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "CREW_SYNC_ON_BOOT",
                        value,
                    })
                }
            };
        }

        Ok(config)
    }

    fn join(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn stream_url(&self) -> String {
        self.join(&self.stream_path)
    }

    pub fn status_url(&self) -> String {
        self.join("/api/crew/status")
    }

    pub fn start_url(&self) -> String {
        self.join("/api/crew/start")
    }

    pub fn investigate_url(&self) -> String {
        self.join("/api/investigate")
    }

    pub fn listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}
