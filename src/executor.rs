//! Command submission boundary.
//!
//! The pool only needs one thing from a consensus engine: commit a command,
//! apply it locally, and hand back the result. Anything that can do that
//! implements [`CommandExecutor`].

use async_trait::async_trait;

use crate::command::Command;
use crate::command::CommandResult;
use crate::error::SubmitError;

/// Submits commands to the replicated log.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Commit `command` and wait for its result.
    ///
    /// Returns once the command is committed and applied on this node, or
    /// with a [`SubmitError`] if it could not be. Application errors come back
    /// inside the `Ok` result.
    async fn execute_command(&self, command: Command) -> Result<CommandResult, SubmitError>;
}
