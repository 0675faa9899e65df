//! Configuration loading from environment variables.
//!
//! A `.env` file in the working directory is loaded first when present.
//!
//! Uses the following environment variables:
//! - `NODEFLOW_POLL_INTERVAL_MS`: Run-loop poll interval when idle (default: 25)
//! - `NODEFLOW_EVENT_BATCH_SIZE`: Max unit events leased at once (default: 64)
//! - `NODEFLOW_EXECUTOR_SHARDS`: Executor shard count (default: CPU count)
//! - `NODEFLOW_EVENT_LEASE_MS`: Lease on claimed events before redelivery (default: 30000)
//! - `NODEFLOW_STATE_FILE`: Snapshot file for the memory backend (optional)
//! - `NODEFLOW_WEBAPP_ENABLED`: Enable the HTTP API (default: false)
//! - `NODEFLOW_WEBAPP_ADDR`: HTTP API bind address (default: 0.0.0.0:24219)

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::runloop::RunLoopSupervisorConfig;
use crate::webapp::WebappConfig;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 25;
pub const DEFAULT_EVENT_BATCH_SIZE: usize = 64;
pub const DEFAULT_EVENT_LEASE_MS: u64 = 30_000;

/// One executor shard per CPU.
pub fn default_executor_shards() -> usize {
    num_cpus::get().max(1)
}

/// Runtime configuration shared by the binaries.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub poll_interval: Duration,
    pub event_batch_size: usize,
    pub executor_shards: usize,
    pub event_lease: Duration,
    /// Memory backend snapshot; state is process-local when unset.
    pub state_file: Option<PathBuf>,
    pub webapp: WebappConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            event_batch_size: DEFAULT_EVENT_BATCH_SIZE,
            executor_shards: default_executor_shards(),
            event_lease: Duration::from_millis(DEFAULT_EVENT_LEASE_MS),
            state_file: None,
            webapp: WebappConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load `.env` if present, then read the `NODEFLOW_*` variables.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let poll_interval_ms = parse_var("NODEFLOW_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)?;
        let event_lease_ms = parse_var("NODEFLOW_EVENT_LEASE_MS", DEFAULT_EVENT_LEASE_MS)?;
        let state_file = env::var("NODEFLOW_STATE_FILE")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            poll_interval: Duration::from_millis(poll_interval_ms),
            event_batch_size: parse_var("NODEFLOW_EVENT_BATCH_SIZE", DEFAULT_EVENT_BATCH_SIZE)?,
            executor_shards: parse_optional_var("NODEFLOW_EXECUTOR_SHARDS")?
                .unwrap_or_else(default_executor_shards),
            event_lease: Duration::from_millis(event_lease_ms),
            state_file,
            webapp: WebappConfig::from_env(),
        })
    }

    /// Run-loop settings under a fresh lease id.
    pub fn runloop(&self) -> RunLoopSupervisorConfig {
        RunLoopSupervisorConfig {
            executor_shards: self.executor_shards,
            event_batch_size: self.event_batch_size,
            poll_interval: self.poll_interval,
            lease_id: Uuid::new_v4(),
            lease_ttl: self.event_lease,
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    Ok(parse_optional_var(name)?.unwrap_or(default))
}

/// Blank counts as unset.
fn parse_optional_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("invalid {name}: {raw:?}")),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_variables_use_defaults() {
        assert_eq!(
            parse_var::<u64>("NODEFLOW_TEST_UNSET_VARIABLE", 7).expect("default"),
            7
        );
        assert_eq!(
            parse_var::<usize>("NODEFLOW_TEST_UNSET_VARIABLE", 12).expect("default"),
            12
        );
    }

    #[test]
    fn from_env_works_without_a_dotenv_file() {
        let config = RuntimeConfig::from_env().expect("config");
        assert!(config.executor_shards >= 1);
        assert!(config.event_batch_size >= 1);
    }

    #[test]
    fn executor_shards_default_to_cpu_count() {
        let config = RuntimeConfig::default();
        assert_eq!(config.executor_shards, num_cpus::get().max(1));
        assert!(config.executor_shards >= 1);
    }

    #[test]
    fn runloop_settings_follow_runtime_config() {
        let config = RuntimeConfig {
            executor_shards: 3,
            event_batch_size: 5,
            ..RuntimeConfig::default()
        };
        let runloop = config.runloop();
        assert_eq!(runloop.executor_shards, 3);
        assert_eq!(runloop.event_batch_size, 5);
        assert_eq!(runloop.poll_interval, Duration::from_millis(25));
        assert_eq!(runloop.lease_ttl, Duration::from_secs(30));
    }
}
