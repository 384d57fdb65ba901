use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use snafu::ResultExt;

use crate::constants::DEFAULT_ELECTION_TIMEOUT_MAX_MS;
use crate::constants::DEFAULT_ELECTION_TIMEOUT_MIN_MS;
use crate::constants::DEFAULT_HEARTBEAT_INTERVAL_MS;
use crate::constants::DEFAULT_REUSE_AFTER;
use crate::constants::LOOKUP_INITIAL_BACKOFF_MS;
use crate::constants::LOOKUP_MAX_RETRIES;
use crate::constants::MAX_LOOKUP_RETRIES;
use crate::constants::MAX_REUSE_AFTER_SECS;
use crate::error::ConfigError;
use crate::error::ParseTomlSnafu;
use crate::error::ReadFileSnafu;

/// Configuration for a [`ConsensusIpPool`](crate::ConsensusIpPool).
///
/// Configuration is loaded in layers with the following precedence (lowest to highest):
/// 1. Built-in defaults
/// 2. Environment variables (IPPOOL_*)
/// 3. TOML configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpPoolConfig {
    /// Idle time after which an address may be given to another domain, in seconds.
    #[serde(default = "default_reuse_after_secs")]
    pub reuse_after_secs: u64,

    /// Wait before the first lookup retry; doubles on every retry.
    #[serde(default = "default_lookup_initial_backoff_ms")]
    pub lookup_initial_backoff_ms: u64,

    /// Lookup retries after the first attempt.
    #[serde(default = "default_lookup_max_retries")]
    pub lookup_max_retries: u32,

    /// Raft settings.
    #[serde(default)]
    pub consensus: ConsensusConfig,
}

/// Raft node settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Logical Raft node identifier of this process.
    #[serde(default)]
    pub node_id: u64,

    /// Raft node ids of every voter, this node included.
    #[serde(default)]
    pub members: Vec<u64>,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    #[serde(default = "default_election_timeout_min_ms")]
    pub election_timeout_min_ms: u64,

    #[serde(default = "default_election_timeout_max_ms")]
    pub election_timeout_max_ms: u64,
}

impl Default for IpPoolConfig {
    fn default() -> Self {
        Self {
            reuse_after_secs: default_reuse_after_secs(),
            lookup_initial_backoff_ms: default_lookup_initial_backoff_ms(),
            lookup_max_retries: default_lookup_max_retries(),
            consensus: ConsensusConfig::default(),
        }
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            node_id: 0,
            members: Vec::new(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            election_timeout_min_ms: default_election_timeout_min_ms(),
            election_timeout_max_ms: default_election_timeout_max_ms(),
        }
    }
}

impl IpPoolConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
        toml::from_str(&content).context(ParseTomlSnafu { path })
    }

    /// Load configuration from environment variables.
    ///
    /// Variables follow the pattern IPPOOL_<FIELD_NAME>; consensus fields use
    /// IPPOOL_CONSENSUS_<FIELD_NAME>. Members are comma-separated node ids.
    pub fn from_env() -> Self {
        Self {
            reuse_after_secs: parse_env("IPPOOL_REUSE_AFTER_SECS").unwrap_or_else(default_reuse_after_secs),
            lookup_initial_backoff_ms: parse_env("IPPOOL_LOOKUP_INITIAL_BACKOFF_MS")
                .unwrap_or_else(default_lookup_initial_backoff_ms),
            lookup_max_retries: parse_env("IPPOOL_LOOKUP_MAX_RETRIES").unwrap_or_else(default_lookup_max_retries),
            consensus: ConsensusConfig {
                node_id: parse_env("IPPOOL_CONSENSUS_NODE_ID").unwrap_or(0),
                members: parse_env_list("IPPOOL_CONSENSUS_MEMBERS"),
                heartbeat_interval_ms: parse_env("IPPOOL_CONSENSUS_HEARTBEAT_INTERVAL_MS")
                    .unwrap_or_else(default_heartbeat_interval_ms),
                election_timeout_min_ms: parse_env("IPPOOL_CONSENSUS_ELECTION_TIMEOUT_MIN_MS")
                    .unwrap_or_else(default_election_timeout_min_ms),
                election_timeout_max_ms: parse_env("IPPOOL_CONSENSUS_ELECTION_TIMEOUT_MAX_MS")
                    .unwrap_or_else(default_election_timeout_max_ms),
            },
        }
    }

    /// Merge configuration from another source.
    ///
    /// Fields in `other` that differ from their defaults override fields in `self`.
    pub fn merge(&mut self, other: Self) {
        if other.reuse_after_secs != default_reuse_after_secs() {
            self.reuse_after_secs = other.reuse_after_secs;
        }
        if other.lookup_initial_backoff_ms != default_lookup_initial_backoff_ms() {
            self.lookup_initial_backoff_ms = other.lookup_initial_backoff_ms;
        }
        if other.lookup_max_retries != default_lookup_max_retries() {
            self.lookup_max_retries = other.lookup_max_retries;
        }
        if other.consensus.node_id != 0 {
            self.consensus.node_id = other.consensus.node_id;
        }
        if !other.consensus.members.is_empty() {
            self.consensus.members = other.consensus.members;
        }
        if other.consensus.heartbeat_interval_ms != default_heartbeat_interval_ms() {
            self.consensus.heartbeat_interval_ms = other.consensus.heartbeat_interval_ms;
        }
        if other.consensus.election_timeout_min_ms != default_election_timeout_min_ms() {
            self.consensus.election_timeout_min_ms = other.consensus.election_timeout_min_ms;
        }
        if other.consensus.election_timeout_max_ms != default_election_timeout_max_ms() {
            self.consensus.election_timeout_max_ms = other.consensus.election_timeout_max_ms;
        }
    }

    /// Validate the pool settings.
    ///
    /// Consensus settings are checked separately by [`ConsensusConfig::validate`]
    /// because a pool driven by a custom executor never reads them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reuse_after_secs == 0 {
            return Err(ConfigError::Validation {
                message: "reuse_after_secs must be non-zero".into(),
            });
        }

        if self.reuse_after_secs > MAX_REUSE_AFTER_SECS {
            return Err(ConfigError::Validation {
                message: format!("reuse_after_secs must be at most {MAX_REUSE_AFTER_SECS}"),
            });
        }

        if self.lookup_initial_backoff_ms == 0 {
            return Err(ConfigError::Validation {
                message: "lookup_initial_backoff_ms must be non-zero".into(),
            });
        }

        if self.lookup_max_retries > MAX_LOOKUP_RETRIES {
            return Err(ConfigError::Validation {
                message: format!("lookup_max_retries must be at most {MAX_LOOKUP_RETRIES}"),
            });
        }

        Ok(())
    }

    pub fn reuse_after(&self) -> Duration {
        Duration::from_secs(self.reuse_after_secs)
    }
}

impl ConsensusConfig {
    /// Validate the Raft settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id == 0 {
            return Err(ConfigError::Validation {
                message: "node_id must be non-zero".into(),
            });
        }

        if !self.members.contains(&self.node_id) {
            return Err(ConfigError::Validation {
                message: format!("members must include node_id {}", self.node_id),
            });
        }

        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Validation {
                message: "heartbeat_interval_ms must be non-zero".into(),
            });
        }

        if self.election_timeout_min_ms <= self.heartbeat_interval_ms {
            return Err(ConfigError::Validation {
                message: "election_timeout_min_ms must be greater than heartbeat_interval_ms".into(),
            });
        }

        if self.election_timeout_max_ms <= self.election_timeout_min_ms {
            return Err(ConfigError::Validation {
                message: "election_timeout_max_ms must be greater than election_timeout_min_ms".into(),
            });
        }

        Ok(())
    }
}

// Default value functions
fn default_reuse_after_secs() -> u64 {
    DEFAULT_REUSE_AFTER.as_secs()
}

fn default_lookup_initial_backoff_ms() -> u64 {
    LOOKUP_INITIAL_BACKOFF_MS
}

fn default_lookup_max_retries() -> u32 {
    LOOKUP_MAX_RETRIES
}

fn default_heartbeat_interval_ms() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_MS
}

fn default_election_timeout_min_ms() -> u64 {
    DEFAULT_ELECTION_TIMEOUT_MIN_MS
}

fn default_election_timeout_max_ms() -> u64 {
    DEFAULT_ELECTION_TIMEOUT_MAX_MS
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.parse().ok()
}

fn parse_env_list<T: std::str::FromStr>(key: &str) -> Vec<T> {
    std::env::var(key)
        .ok()
        .map(|s| s.split(',').filter_map(|item| item.trim().parse().ok()).collect())
        .unwrap_or_default()
}
