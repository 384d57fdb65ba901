//! Error types for the IP pool.
//!
//! Errors are split by the layer that produces them:
//!
//! - [`ApplyError`]: deterministic application errors produced inside the state machine. They are
//!   replicated like any other result and reach the submitter inside a successful
//!   [`CommandResult`](crate::command::CommandResult).
//! - [`DispatchError`]: protocol mismatches. A replica that hits one must stop applying.
//! - [`SubmitError`]: the command never got a result (not started, no leader, engine failure).
//! - [`PoolError`]: what callers of [`ConsensusIpPool`](crate::ConsensusIpPool) see.

use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use snafu::Snafu;

use crate::types::PeerId;

/// Errors building an [`AddressSet`](crate::AddressSet) from text.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum AddressSetError {
    /// Not a dotted-quad IPv4 address.
    #[snafu(display("invalid IPv4 address '{input}': {source}"))]
    InvalidAddress {
        /// The rejected text.
        input: String,
        /// Underlying parse failure.
        source: std::net::AddrParseError,
    },

    /// Missing or out-of-range prefix length.
    #[snafu(display("invalid CIDR prefix '{input}'"))]
    InvalidPrefix {
        /// The rejected text.
        input: String,
    },
}

/// Application-level error returned by the state machine.
///
/// These are ordinary, replicated outcomes: every replica computes the same
/// one for the same log entry.
#[derive(Debug, Clone, PartialEq, Eq, Snafu, Serialize, Deserialize)]
#[snafu(visibility(pub))]
pub enum ApplyError {
    /// Every address in the set is held and none is past the reuse deadline.
    #[snafu(display("ip pool exhausted"))]
    Exhausted,

    /// The command name was known but its arguments did not decode.
    #[snafu(display("invalid arguments for {command}: {reason}"))]
    InvalidArguments {
        /// Command name.
        command: String,
        /// Decoder message.
        reason: String,
    },
}

/// Fatal protocol mismatch in the replicated log.
///
/// Continuing past one of these would let replicas diverge, so the replica
/// halts instead.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum DispatchError {
    /// The log contains a command this build does not know.
    #[snafu(display("unknown command: {name}"))]
    UnknownCommand {
        /// The unrecognized command name.
        name: String,
    },

    /// The log entry is not a command envelope at all.
    #[snafu(display("malformed log entry: {reason}"))]
    MalformedEntry {
        /// Decoder message.
        reason: String,
    },
}

/// The consensus layer could not produce a result for a command.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum SubmitError {
    /// No executor is attached to the pool.
    #[snafu(display("consensus not started"))]
    NotStarted,

    /// This node is not the leader and could not forward.
    #[snafu(display("not leader; current leader: {leader_id:?}"))]
    NotLeader {
        /// Known leader, if any.
        leader_id: Option<u64>,
    },

    /// Transient failure (network, quorum loss, shutdown in progress).
    #[snafu(display("consensus unavailable: {reason}"))]
    Unavailable {
        /// Description of the failure.
        reason: String,
    },

    /// The replica has halted and accepts no more commands.
    #[snafu(display("consensus halted: {reason}"))]
    Fatal {
        /// Description of the failure.
        reason: String,
    },
}

impl SubmitError {
    /// Whether resubmitting later may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SubmitError::Fatal { .. })
    }
}

/// Errors returned by [`ConsensusIpPool`](crate::ConsensusIpPool).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PoolError {
    /// Domain rejected before submission.
    #[snafu(display("invalid domain '{domain}': {reason}"))]
    InvalidDomain {
        /// The rejected domain.
        domain: String,
        /// Why it was rejected.
        reason: String,
    },

    /// No address could be allocated for the peer.
    #[snafu(display("ip pool exhausted for peer {peer}"), context(name(PoolExhaustedSnafu)))]
    Exhausted {
        /// Requesting peer.
        peer: PeerId,
    },

    /// The command could not be committed.
    #[snafu(display("command submission failed: {source}"))]
    Submission {
        /// Underlying submission failure.
        source: SubmitError,
    },

    /// The state machine rejected the command.
    #[snafu(display("command rejected: {source}"))]
    Rejected {
        /// Application error from the state machine.
        source: ApplyError,
    },

    /// Command arguments or results failed to encode or decode.
    #[snafu(display("codec error: {source}"))]
    Codec {
        /// Underlying serde_json error.
        source: serde_json::Error,
    },

    /// Consensus settings failed validation.
    #[snafu(display("invalid configuration: {source}"))]
    InvalidConfig {
        /// Validation failure.
        source: ConfigError,
    },

    /// A Raft operation failed.
    #[snafu(display("consensus {operation} failed: {source}"))]
    Consensus {
        /// What was being attempted.
        operation: &'static str,
        /// Underlying openraft error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The wait for a leader ended without one.
    #[snafu(display("node {node_id} knows no leader"))]
    NoLeader {
        /// Raft node that was waiting.
        node_id: u64,
    },

    /// `start_consensus` was called twice.
    #[snafu(display("consensus already started"))]
    AlreadyStarted,
}

impl PoolError {
    /// Whether the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        match self {
            PoolError::Submission { source } => source.is_retryable(),
            _ => false,
        }
    }
}

/// Configuration loading and parsing errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    #[snafu(display("failed to read config file {}: {source}", path.display()))]
    ReadFile { path: PathBuf, source: std::io::Error },

    #[snafu(display("failed to parse TOML config file {}: {source}", path.display()))]
    ParseToml { path: PathBuf, source: toml::de::Error },

    #[snafu(display("configuration validation failed: {message}"))]
    Validation { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_errors_are_retryable_except_fatal() {
        let err = PoolError::Submission {
            source: SubmitError::NotLeader { leader_id: Some(2) },
        };
        assert!(err.is_retryable());

        let err = PoolError::Submission {
            source: SubmitError::Fatal {
                reason: "halted".into(),
            },
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_exhausted_is_final() {
        let err = PoolExhaustedSnafu { peer: PeerId(1) }.build();
        assert!(matches!(err, PoolError::Exhausted { peer: PeerId(1) }));
        assert!(!err.is_retryable());
        // The application-level variant keeps its own selector.
        assert_eq!(ExhaustedSnafu.build(), ApplyError::Exhausted);
    }

    #[test]
    fn test_consensus_error_keeps_source() {
        use std::error::Error as _;

        let io = std::io::Error::new(std::io::ErrorKind::Other, "raft stopped");
        let err = PoolError::Consensus {
            operation: "shutdown",
            source: Box::new(io),
        };
        assert_eq!(err.to_string(), "consensus shutdown failed: raft stopped");
        assert_eq!(err.source().map(|e| e.to_string()).as_deref(), Some("raft stopped"));
    }

    #[test]
    fn test_apply_error_serde() {
        let err = ApplyError::InvalidArguments {
            command: "checkoutAddr".into(),
            reason: "missing field".into(),
        };
        let json = serde_json::to_string(&err).unwrap();
        let back: ApplyError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn test_display() {
        assert_eq!(ApplyError::Exhausted.to_string(), "ip pool exhausted");
        assert_eq!(
            DispatchError::UnknownCommand { name: "bogus".into() }.to_string(),
            "unknown command: bogus"
        );
    }
}
