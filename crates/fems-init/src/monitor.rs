//! Online monitoring client
//!
//! Sends the self-test transcript and reads back whether the remote access
//! tunnel should be running.

use async_trait::async_trait;
use chrono::Utc;
use fems_yaler::TunnelState;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use std::net::Ipv4Addr;
use std::time::Duration;
use thiserror::Error;

/// User agent the monitoring endpoint has always seen from gateways
const USER_AGENT: &str = "Mozilla/4.0 (compatible; MSIE 5.0;Windows98;DigExt)";

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("{0}")]
    Request(#[from] reqwest::Error),
}

/// Body of a system report
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SystemMessage {
    pub version: u32,
    pub apikey: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub content: String,
    pub system: String,
    pub ipv4: Option<String>,
}

impl SystemMessage {
    pub fn new(apikey: &str, system: &str, ipv4: Option<Ipv4Addr>) -> Self {
        Self {
            version: 1,
            apikey: apikey.to_string(),
            timestamp: Utc::now().timestamp_millis(),
            content: "system".to_string(),
            system: system.to_string(),
            ipv4: ipv4.map(|ip| ip.to_string()),
        }
    }
}

/// What the endpoint answered
#[derive(Debug, Clone, PartialEq)]
pub struct ReportResponse {
    pub status: u16,
    /// Status line reason phrase, if known
    pub reason: Option<String>,
    /// JSON object from the first line of the body, if any
    pub reply: Option<Value>,
}

impl ReportResponse {
    pub fn from_parts(status: StatusCode, reply: Option<Value>) -> Self {
        Self {
            status: status.as_u16(),
            reason: status.canonical_reason().map(str::to_string),
            reply,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// Parse the first body line as a JSON object; anything else is no reply
pub fn parse_reply(body: &str) -> Option<Value> {
    let line = body.lines().next()?;
    match serde_json::from_str::<Value>(line) {
        Ok(value) if value.is_object() => Some(value),
        _ => None,
    }
}

/// Tunnel state requested by a monitoring reply
///
/// A `yaler` entry asks for the tunnel through that relay domain; without it
/// the tunnel is switched off.
pub fn desired_tunnel_state(reply: Option<&Value>) -> TunnelState {
    match reply.and_then(|r| r.get("yaler")) {
        Some(Value::String(domain)) => TunnelState::Enabled(domain.clone()),
        Some(Value::Null) | None => TunnelState::Disabled,
        // Non-string domains are passed on and rejected by validation
        Some(other) => TunnelState::Enabled(other.to_string()),
    }
}

/// The online monitoring as seen from the gateway
#[async_trait]
pub trait Monitor: Send + Sync {
    /// Check that the internet (and the monitoring host) can be reached
    async fn check_connectivity(&self) -> Result<(), MonitorError>;

    /// Post a system report
    async fn send_report(&self, message: &SystemMessage) -> Result<ReportResponse, MonitorError>;
}

/// [`Monitor`] over HTTPS
pub struct HttpMonitor {
    client: reqwest::Client,
    monitor_url: String,
    connectivity_url: String,
}

impl HttpMonitor {
    pub fn new(
        monitor_url: impl Into<String>,
        connectivity_url: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, MonitorError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(MonitorError::Client)?;

        Ok(Self {
            client,
            monitor_url: monitor_url.into(),
            connectivity_url: connectivity_url.into(),
        })
    }
}

#[async_trait]
impl Monitor for HttpMonitor {
    async fn check_connectivity(&self) -> Result<(), MonitorError> {
        self.client
            .get(&self.connectivity_url)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn send_report(&self, message: &SystemMessage) -> Result<ReportResponse, MonitorError> {
        let response = self
            .client
            .post(&self.monitor_url)
            .json(message)
            .send()
            .await?;

        let status = response.status();
        let reply = if status.is_success() {
            parse_reply(&response.text().await?)
        } else {
            None
        };

        tracing::debug!("Monitoring answered {} ({:?})", status, reply);

        Ok(ReportResponse::from_parts(status, reply))
    }
}
