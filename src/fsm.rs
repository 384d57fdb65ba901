//! Deterministic command dispatcher.
//!
//! Every replica feeds committed log entries through [`IpPoolFsm::apply`] in
//! log order. Handlers never read the clock or any other local input, so equal
//! logs produce equal [`PoolState`]s.

use std::net::Ipv4Addr;

use tracing::error;
use tracing::trace;

use crate::address_set::AddressSet;
use crate::allocation::checkout_addr;
use crate::command::CheckoutAddrArgs;
use crate::command::Command;
use crate::command::CommandResult;
use crate::command::MarkLastUsedArgs;
use crate::constants::CHECKOUT_ADDR_COMMAND;
use crate::constants::MARK_LAST_USED_COMMAND;
use crate::error::ApplyError;
use crate::error::DispatchError;
use crate::state::PoolSnapshot;
use crate::state::PoolState;
use crate::usage::mark_last_used;

/// The replicated IP pool state machine.
#[derive(Debug)]
pub struct IpPoolFsm {
    state: PoolState,
    addresses: AddressSet,
}

impl IpPoolFsm {
    pub fn new(addresses: AddressSet) -> Self {
        Self {
            state: PoolState::new(),
            addresses,
        }
    }

    pub fn state(&self) -> &PoolState {
        &self.state
    }

    pub fn addresses(&self) -> &AddressSet {
        &self.addresses
    }

    /// Apply one command.
    ///
    /// `Err` means the log holds something this build cannot interpret; the
    /// caller must stop applying further entries.
    pub fn apply(&self, command: &Command) -> Result<CommandResult, DispatchError> {
        trace!(name = %command.name, "applying command");
        match command.name.as_str() {
            CHECKOUT_ADDR_COMMAND => Ok(self.apply_checkout(command)),
            MARK_LAST_USED_COMMAND => Ok(self.apply_mark(command)),
            name => {
                error!(name, "unknown command in log; halting");
                Err(DispatchError::UnknownCommand { name: name.to_string() })
            }
        }
    }

    /// Decode and apply a raw log entry.
    pub fn apply_entry(&self, entry: &[u8]) -> Result<CommandResult, DispatchError> {
        let command = Command::from_bytes(entry).map_err(|e| {
            error!(error = %e, "undecodable log entry; halting");
            DispatchError::MalformedEntry { reason: e.to_string() }
        })?;
        self.apply(&command)
    }

    /// Ordered image of the current state.
    pub fn snapshot(&self) -> PoolSnapshot {
        self.state.snapshot()
    }

    /// Replace the state with `snapshot`.
    pub fn restore(&self, snapshot: &PoolSnapshot) {
        self.state.restore(snapshot);
    }

    fn apply_checkout(&self, command: &Command) -> CommandResult {
        let args: CheckoutAddrArgs = match command.decode_args() {
            Ok(args) => args,
            Err(e) => return CommandResult::err(e),
        };
        let addr = match checkout_addr(
            &self.state,
            &self.addresses,
            args.peer_id,
            &args.domain,
            args.now_ms,
            args.reuse_deadline_ms,
        ) {
            Ok(addr) => addr,
            Err(e) => return CommandResult::err(e),
        };
        match encode_addr(addr) {
            Ok(bytes) => CommandResult::ok(bytes),
            Err(e) => CommandResult::err(e),
        }
    }

    fn apply_mark(&self, command: &Command) -> CommandResult {
        match command.decode_args::<MarkLastUsedArgs>() {
            Ok(args) => {
                mark_last_used(&self.state, args.peer_id, args.addr, &args.domain, args.updated_at_ms);
                CommandResult::default()
            }
            Err(e) => CommandResult::err(e),
        }
    }
}

fn encode_addr(addr: Ipv4Addr) -> Result<Vec<u8>, ApplyError> {
    serde_json::to_vec(&addr).map_err(|e| ApplyError::InvalidArguments {
        command: CHECKOUT_ADDR_COMMAND.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PeerId;

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    fn fsm() -> IpPoolFsm {
        IpPoolFsm::new(AddressSet::from_addrs([ip("100.64.0.1"), ip("100.64.0.2")]))
    }

    fn checkout(peer: u64, domain: &str, now_ms: u64, reuse_deadline_ms: u64) -> Command {
        Command::checkout_addr(&CheckoutAddrArgs {
            peer_id: PeerId(peer),
            domain: domain.into(),
            reuse_deadline_ms,
            now_ms,
        })
        .unwrap()
    }

    #[test]
    fn test_checkout_returns_json_address() {
        let fsm = fsm();
        let result = fsm.apply(&checkout(1, "a", 10, 0)).unwrap();
        let addr: Ipv4Addr = serde_json::from_slice(&result.into_result().unwrap()).unwrap();
        assert_eq!(addr, ip("100.64.0.1"));
    }

    #[test]
    fn test_exhausted_is_application_error() {
        let fsm = fsm();
        fsm.apply(&checkout(1, "a", 10, 0)).unwrap();
        fsm.apply(&checkout(1, "b", 10, 0)).unwrap();
        let result = fsm.apply(&checkout(1, "c", 10, 0)).unwrap();
        assert_eq!(result.error, Some(ApplyError::Exhausted));
    }

    #[test]
    fn test_mark_returns_empty_result() {
        let fsm = fsm();
        fsm.apply(&checkout(1, "a", 10, 0)).unwrap();
        let cmd = Command::mark_last_used(&MarkLastUsedArgs {
            peer_id: PeerId(1),
            addr: ip("100.64.0.1"),
            domain: "a".into(),
            updated_at_ms: 50,
        })
        .unwrap();
        assert_eq!(fsm.apply(&cmd).unwrap(), CommandResult::default());
        let peer = fsm.state().peer(PeerId(1)).unwrap();
        assert_eq!(peer.where_when(ip("100.64.0.1")).unwrap().last_used_ms, 50);
    }

    #[test]
    fn test_unknown_command_is_fatal() {
        let fsm = fsm();
        let cmd = Command {
            name: "releaseAddr".into(),
            args: serde_json::Value::Null,
        };
        assert_eq!(fsm.apply(&cmd), Err(DispatchError::UnknownCommand { name: "releaseAddr".into() }));
    }

    #[test]
    fn test_malformed_entry_is_fatal() {
        let fsm = fsm();
        assert!(matches!(fsm.apply_entry(b"not json"), Err(DispatchError::MalformedEntry { .. })));
    }

    #[test]
    fn test_bad_args_leave_state_untouched() {
        let fsm = fsm();
        let cmd = Command {
            name: CHECKOUT_ADDR_COMMAND.into(),
            args: serde_json::json!({"peer_id": "x"}),
        };
        let result = fsm.apply(&cmd).unwrap();
        assert!(matches!(result.error, Some(ApplyError::InvalidArguments { .. })));
        assert_eq!(fsm.state().peer_count(), 0);
    }

    #[test]
    fn test_replay_is_deterministic() {
        let log: Vec<Vec<u8>> = vec![
            checkout(1, "a", 10, 0).to_bytes().unwrap(),
            checkout(2, "a", 11, 0).to_bytes().unwrap(),
            checkout(1, "b", 12, 0).to_bytes().unwrap(),
            checkout(1, "c", 100, 11).to_bytes().unwrap(),
        ];
        let left = fsm();
        let right = fsm();
        for entry in &log {
            assert_eq!(left.apply_entry(entry).unwrap(), right.apply_entry(entry).unwrap());
        }
        assert_eq!(left.snapshot(), right.snapshot());
    }
}
