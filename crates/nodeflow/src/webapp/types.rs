//! Request and response bodies of the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use nodeflow_runner_state::{LedgerEntry, ProgramState, UnitRecord, UnitStatus};

pub const DEFAULT_WEBAPP_PORT: u16 = 24219;

/// Configuration for the webapp server.
#[derive(Debug, Clone)]
pub struct WebappConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for WebappConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "0.0.0.0".to_string(),
            port: DEFAULT_WEBAPP_PORT,
        }
    }
}

impl WebappConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let enabled = std::env::var("NODEFLOW_WEBAPP_ENABLED")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let (host, port) = std::env::var("NODEFLOW_WEBAPP_ADDR")
            .ok()
            .and_then(|addr| parse_addr(&addr))
            .unwrap_or_else(|| ("0.0.0.0".to_string(), DEFAULT_WEBAPP_PORT));

        Self {
            enabled,
            host,
            port,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_addr(addr: &str) -> Option<(String, u16)> {
    let (host, port) = addr.rsplit_once(':')?;
    let port = port.parse().ok()?;
    Some((host.to_string(), port))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartProgramResponse {
    pub root_unit_id: Uuid,
}

/// Status of one program run, keyed by its root unit.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProgramStatusResponse {
    pub root_unit_id: Uuid,
    pub program_id: Uuid,
    pub status: UnitStatus,
    #[serde(default)]
    pub result: Option<ProgramState>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<UnitRecord> for ProgramStatusResponse {
    fn from(root: UnitRecord) -> Self {
        Self {
            root_unit_id: root.unit_id,
            program_id: root.program_id,
            status: root.status,
            result: root.result().cloned(),
            created_at: root.created_at,
            updated_at: root.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProgramListResponse {
    pub programs: Vec<ProgramStatusResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub root_unit_id: Uuid,
    pub messages: Vec<LedgerEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InputRequest {
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_split_on_the_last_colon() {
        assert_eq!(
            parse_addr("127.0.0.1:8080"),
            Some(("127.0.0.1".to_string(), 8080))
        );
        assert_eq!(parse_addr("localhost"), None);
        assert_eq!(parse_addr("localhost:http"), None);
    }

    #[test]
    fn default_config_is_disabled() {
        let config = WebappConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.bind_addr(), "0.0.0.0:24219");
    }
}
