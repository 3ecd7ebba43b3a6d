use crate::dispatcher::{Backend, CommandOutcome, DebugCommand, SignalBackend};
use crate::error::{Error, Result};
use crate::orch_debug;
use std::io::Write;
use std::process::ChildStdin;
use std::sync::{Mutex, PoisonError};

/// Drives `python -m pdb` through its stdin. Command output comes back with debugee
/// stdout (as output events).
pub struct PdbBackend {
    signals: SignalBackend,
    stdin: Mutex<Option<ChildStdin>>,
}

impl PdbBackend {
    pub fn new(signals: SignalBackend, stdin: Option<ChildStdin>) -> Self {
        Self {
            signals,
            stdin: Mutex::new(stdin),
        }
    }

    fn command_line(command: &DebugCommand) -> Result<String> {
        let line = match command {
            DebugCommand::StepOver => "next".to_string(),
            DebugCommand::StepInto => "step".to_string(),
            DebugCommand::StepOut => "return".to_string(),
            DebugCommand::Continue => "continue".to_string(),
            DebugCommand::Evaluate { expression } => {
                if expression.contains(['\n', '\r']) {
                    return Err(Error::BadRequest(
                        "pdb expression must be a single line".to_string(),
                    ));
                }
                format!("p {expression}")
            }
        };
        Ok(line)
    }
}

impl Backend for PdbBackend {
    fn name(&self) -> &'static str {
        "pdb"
    }

    fn suspend(&self) -> Result<()> {
        self.signals.suspend()
    }

    fn resume(&self) -> Result<()> {
        self.signals.resume()
    }

    fn execute(&self, command: &DebugCommand) -> Result<CommandOutcome> {
        let line = Self::command_line(command)?;
        let mut stdin = self.stdin.lock().unwrap_or_else(PoisonError::into_inner);
        let stdin = stdin.as_mut().ok_or(Error::BackendDisconnected)?;

        orch_debug!(target: "dispatcher", "pdb <- {line}");
        writeln!(stdin, "{line}")
            .and_then(|_| stdin.flush())
            .map_err(|e| Error::Backend {
                backend: "pdb",
                message: format!("write command `{line}`: {e}"),
            })?;

        Ok(CommandOutcome::Dispatched)
    }

    fn shutdown(&self) {
        // closing stdin makes pdb quit if the process is still alive
        self.stdin
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}
