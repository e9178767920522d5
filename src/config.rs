//! Process configuration from the environment

use crate::agent::{AgentConfig, DEFAULT_LOOP_LIMIT, DEFAULT_MAX_PREDICTIONS};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_PORT: u16 = 5005;
const DEFAULT_DOMAIN_PATH: &str = "domain.toml";
const DEFAULT_POLICY_PATH: &str = "policies.toml";
const DEFAULT_ACTION_TIMEOUT_MS: u64 = 10_000;

/// Settings read at startup
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub domain_path: PathBuf,
    pub policy_path: PathBuf,
    /// SQLite tracker store; in-memory when unset
    pub db_path: Option<PathBuf>,
    pub port: u16,
    /// Remote action server webhook
    pub action_endpoint: Option<String>,
    pub action_token: Option<String>,
    pub action_timeout: Duration,
    pub agent: AgentConfig,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            domain_path: non_empty("DIALOGUE_DOMAIN_PATH")
                .map_or_else(|| PathBuf::from(DEFAULT_DOMAIN_PATH), PathBuf::from),
            policy_path: non_empty("DIALOGUE_POLICY_PATH")
                .map_or_else(|| PathBuf::from(DEFAULT_POLICY_PATH), PathBuf::from),
            db_path: non_empty("DIALOGUE_DB_PATH").map(PathBuf::from),
            port: non_empty("DIALOGUE_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            action_endpoint: non_empty("DIALOGUE_ACTION_ENDPOINT"),
            action_token: non_empty("DIALOGUE_ACTION_TOKEN"),
            action_timeout: Duration::from_millis(
                non_empty("DIALOGUE_ACTION_TIMEOUT_MS")
                    .and_then(|ms| ms.parse().ok())
                    .unwrap_or(DEFAULT_ACTION_TIMEOUT_MS),
            ),
            agent: AgentConfig {
                max_predictions: non_empty("DIALOGUE_MAX_PREDICTIONS")
                    .and_then(|n| n.parse().ok())
                    .filter(|n| *n > 0)
                    .unwrap_or(DEFAULT_MAX_PREDICTIONS),
                loop_limit: non_empty("DIALOGUE_LOOP_LIMIT")
                    .and_then(|n| n.parse().ok())
                    .unwrap_or(DEFAULT_LOOP_LIMIT),
            },
        }
    }
}
