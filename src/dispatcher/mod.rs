//! Command dispatcher: hand-off point between a session and the debugger backend that
//! actually drives the debugee.
//!
//! Each session type gets a [`Backend`] implementation:
//! * [`SignalBackend`] - suspend/resume with `SIGSTOP`/`SIGCONT`, high level commands are
//!   only logged (used for `node`, `chrome`, `firefox` and for `custom` targets without a
//!   debug port),
//! * [`PdbBackend`] - signals + pdb line commands written into debugee stdin (`python`),
//! * [`DapBackend`] - debug adapter protocol requests over tcp (`custom` targets with a
//!   debug port, where a DAP adapter listens).
//!
//! Browsers expose their own remote protocols on the debug port (CDP for chrome, the
//! `length:json` protocol for firefox), not DAP, so they are driven by signals.

mod dap;
mod pdb;
mod signal;

pub use dap::DapBackend;
pub(crate) use dap::DEFAULT_DEBUG_PORT;
pub use pdb::PdbBackend;
pub use signal::SignalBackend;

use crate::error::Result;
use crate::event::EventBus;
use crate::session::{CallFrame, DebugConfig, SessionId, SessionType};
use nix::unistd::Pid;
use serde::Serialize;
use std::process::ChildStdin;
use std::sync::Arc;
use std::time::Duration;

/// High level debugger command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "name", rename_all = "camelCase")]
pub enum DebugCommand {
    StepOver,
    StepInto,
    StepOut,
    Continue,
    Evaluate { expression: String },
}

impl DebugCommand {
    pub fn name(&self) -> &'static str {
        match self {
            DebugCommand::StepOver => "stepOver",
            DebugCommand::StepInto => "stepInto",
            DebugCommand::StepOut => "stepOut",
            DebugCommand::Continue => "continue",
            DebugCommand::Evaluate { .. } => "evaluate",
        }
    }
}

/// Result of a dispatched command.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum CommandOutcome {
    /// Command delivered, any result arrives asynchronously (as output events).
    Dispatched,
    #[serde(rename_all = "camelCase")]
    Evaluated {
        result: String,
        type_name: Option<String>,
    },
}

/// Debugger backend strategy, one instance per running process.
///
/// Implementations must tolerate being called after the debugee has gone away and must
/// release any waiting caller in [`Backend::shutdown`].
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Suspend debugee execution.
    fn suspend(&self) -> Result<()>;

    /// Resume debugee execution after [`Backend::suspend`].
    fn resume(&self) -> Result<()>;

    fn execute(&self, command: &DebugCommand) -> Result<CommandOutcome>;

    /// Current call stack if a backend is able to provide it.
    fn stack_trace(&self) -> Result<Option<Vec<CallFrame>>> {
        Ok(None)
    }

    /// Release backend resources, called when the session loses its process.
    fn shutdown(&self) {}
}

/// Everything required to build a backend for a freshly launched process.
pub struct BackendContext<'a> {
    pub session_id: &'a SessionId,
    pub r#type: SessionType,
    pub config: &'a DebugConfig,
    pub pid: Pid,
    pub stdin: Option<ChildStdin>,
    pub events: Arc<EventBus>,
    pub connect_timeout: Duration,
}

/// Choose backend for a session type.
pub fn make_backend(ctx: BackendContext) -> Arc<dyn Backend> {
    let signals = SignalBackend::new(ctx.session_id.clone(), ctx.pid);
    match ctx.r#type {
        SessionType::Python => Arc::new(PdbBackend::new(signals, ctx.stdin)),
        SessionType::Custom if ctx.config.port.is_some() => Arc::new(DapBackend::new(&ctx)),
        SessionType::Node | SessionType::Chrome | SessionType::Firefox | SessionType::Custom => {
            Arc::new(signals)
        }
    }
}
