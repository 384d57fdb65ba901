//! Replicated command envelope and argument shapes.
//!
//! These types are the log format. Every field name here is part of the
//! protocol between replicas.

use std::net::Ipv4Addr;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::CHECKOUT_ADDR_COMMAND;
use crate::constants::MARK_LAST_USED_COMMAND;
use crate::error::ApplyError;
use crate::types::PeerId;

/// A named command with JSON arguments, as stored in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl Command {
    /// Build a command by serializing `args`.
    pub fn new<A: Serialize>(name: impl Into<String>, args: &A) -> Result<Self, serde_json::Error> {
        Ok(Self {
            name: name.into(),
            args: serde_json::to_value(args)?,
        })
    }

    pub fn checkout_addr(args: &CheckoutAddrArgs) -> Result<Self, serde_json::Error> {
        Self::new(CHECKOUT_ADDR_COMMAND, args)
    }

    pub fn mark_last_used(args: &MarkLastUsedArgs) -> Result<Self, serde_json::Error> {
        Self::new(MARK_LAST_USED_COMMAND, args)
    }

    /// Decode the arguments. Failure is an application error, not a protocol one.
    pub fn decode_args<A: DeserializeOwned>(&self) -> Result<A, ApplyError> {
        A::deserialize(&self.args).map_err(|e| ApplyError::InvalidArguments {
            command: self.name.clone(),
            reason: e.to_string(),
        })
    }

    /// Encode the envelope as a log entry.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode a log entry into an envelope.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Arguments of `checkoutAddr`.
///
/// Both timestamps are computed by the submitter so replay is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutAddrArgs {
    pub peer_id: PeerId,
    pub domain: String,
    /// Addresses idle since before this instant may be reclaimed.
    pub reuse_deadline_ms: u64,
    /// Recorded as the new last-used time of the returned address.
    pub now_ms: u64,
}

/// Arguments of `markLastUsed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkLastUsedArgs {
    pub peer_id: PeerId,
    pub addr: Ipv4Addr,
    pub domain: String,
    pub updated_at_ms: u64,
}

/// Result of applying one command.
///
/// `error` carries application errors; submission failures never appear here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    /// Opaque JSON payload. Empty for commands without a result.
    #[serde(default)]
    pub result: Vec<u8>,
    #[serde(default)]
    pub error: Option<ApplyError>,
}

impl CommandResult {
    pub fn ok(result: Vec<u8>) -> Self {
        Self { result, error: None }
    }

    pub fn err(error: ApplyError) -> Self {
        Self {
            result: Vec::new(),
            error: Some(error),
        }
    }

    /// Split into the payload or the application error.
    pub fn into_result(self) -> Result<Vec<u8>, ApplyError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result),
        }
    }
}
