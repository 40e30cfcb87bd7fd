// [[AgentOps]]/apps/crew-monitor/src/backend.rs
// Purpose: REST client for the AgentOps backend (crew start/status, investigation Q&A).
// Architecture: Infrastructure Layer
// Dependencies: reqwest, Serde

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::MonitorConfig;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Backend request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Backend returned {status} for {path}")]
    Status { path: String, status: u16 },
    #[error("Crew is already running")]
    AlreadyRunning,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrewStatus {
    pub running: bool,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
struct InvestigateRequest<'a> {
    query: &'a str,
}

#[derive(Debug, Deserialize)]
struct InvestigateResponse {
    answer: Value,
}

#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    start_url: String,
    status_url: String,
    investigate_url: String,
}

impl BackendClient {
    pub fn new(config: &MonitorConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(http: reqwest::Client, config: &MonitorConfig) -> Self {
        BackendClient {
            http,
            start_url: config.start_url(),
            status_url: config.status_url(),
            investigate_url: config.investigate_url(),
        }
    }

    /// Trigger a crew run. Progress arrives only through the stream.
    pub async fn start_crew(&self) -> Result<(), BackendError> {
        tracing::debug!("Requesting crew start: {}", self.start_url);
        let response = self
            .http
            .post(&self.start_url)
            .json(&serde_json::json!({}))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status == StatusCode::CONFLICT {
            Err(BackendError::AlreadyRunning)
        } else {
            Err(BackendError::Status {
                path: self.start_url.clone(),
                status: status.as_u16(),
            })
        }
    }

    pub async fn crew_status(&self) -> Result<CrewStatus, BackendError> {
        let response = self.http.get(&self.status_url).send().await?;
        if !response.status().is_success() {
            return Err(BackendError::Status {
                path: self.status_url.clone(),
                status: response.status().as_u16(),
            });
        }
        Ok(response.json::<CrewStatus>().await?)
    }

    /// Ask the investigation endpoint a free-form question.
    pub async fn investigate(&self, query: &str) -> Result<String, BackendError> {
        let response = self
            .http
            .post(&self.investigate_url)
            .json(&InvestigateRequest { query })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BackendError::Status {
                path: self.investigate_url.clone(),
                status: response.status().as_u16(),
            });
        }

        let body = response.json::<InvestigateResponse>().await?;
        Ok(match body.answer {
            Value::String(answer) => answer,
            other => other.to_string(),
        })
    }
}
