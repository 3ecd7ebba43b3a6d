use crate::dispatcher::{Backend, CommandOutcome, DebugCommand};
use crate::error::{Error, Result};
use crate::orch_info;
use crate::session::SessionId;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

/// Process-signal adapter. POSIX job control only, no protocol channel to the debugee.
pub struct SignalBackend {
    session: SessionId,
    pid: Pid,
}

impl SignalBackend {
    pub fn new(session: SessionId, pid: Pid) -> Self {
        Self { session, pid }
    }

    pub(super) fn send(&self, sig: Signal) -> Result<()> {
        signal::kill(self.pid, sig).map_err(|source| Error::Signal {
            signal: sig,
            pid: self.pid,
            source,
        })
    }
}

impl Backend for SignalBackend {
    fn name(&self) -> &'static str {
        "signal"
    }

    fn suspend(&self) -> Result<()> {
        self.send(Signal::SIGSTOP)
    }

    fn resume(&self) -> Result<()> {
        self.send(Signal::SIGCONT)
    }

    fn execute(&self, command: &DebugCommand) -> Result<CommandOutcome> {
        orch_info!(
            target: "dispatcher",
            "{}: `{}` handed off to debugee {} (no protocol channel attached)",
            self.session,
            command.name(),
            self.pid
        );
        Ok(CommandOutcome::Dispatched)
    }
}
