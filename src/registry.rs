//! Session registry: the process wide table of debugging sessions.
//!
//! Every session lives behind its own lock, the table lock is held only for lookups and
//! inserts. Debugger backend calls (which may wait on a remote adapter) are made without
//! holding a session lock, so a concurrent `stop` or process exit is never blocked by a
//! pending command.

use crate::config::OrchestratorConfig;
use crate::dispatcher::{make_backend, Backend, BackendContext, CommandOutcome, DebugCommand};
use crate::error::{Error, Result};
use crate::event::{EventBus, OutputStream, Payload, Subscription};
use crate::launcher::{LaunchSpec, Launched};
use crate::session::{
    Breakpoint, BreakpointPatch, BreakpointSpec, CallFrame, DebugConfig, DebugeeProcess,
    Session, SessionId, SessionSnapshot, SessionStatus, SessionType, Variables,
};
use crate::{orch_debug, orch_info, orch_warn, weak_error};
use indexmap::IndexMap;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::Pid;
use os_pipe::PipeReader;
use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, ExitStatus};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

type SessionCell = Arc<Mutex<Session>>;

fn lock(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct SessionRegistry {
    config: OrchestratorConfig,
    sessions: Mutex<IndexMap<SessionId, SessionCell>>,
    next_id: AtomicU64,
    events: Arc<EventBus>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(OrchestratorConfig::default())
    }
}

impl SessionRegistry {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            events: Arc::new(EventBus::new(config.event_buffer)),
            config,
            sessions: Mutex::default(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    fn table(&self) -> MutexGuard<'_, IndexMap<SessionId, SessionCell>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn session(&self, id: &str) -> Result<SessionCell> {
        self.table()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))
    }

    // ------------------------------------------ registry -----------------------------------------

    /// Register a new session in `stopped` status.
    pub fn create(
        &self,
        name: impl Into<String>,
        r#type: SessionType,
        config: DebugConfig,
    ) -> SessionSnapshot {
        let id = SessionId::from_number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let session = Session::new(id.clone(), name.into(), r#type, config);
        let snapshot = session.snapshot();
        self.table()
            .insert(id.clone(), Arc::new(Mutex::new(session)));

        orch_info!(
            target: "orchestrator",
            "{id}: created {} session `{}`",
            snapshot.r#type,
            snapshot.name
        );
        self.events.emit(&id, Payload::SessionCreated);
        snapshot
    }

    pub fn get(&self, id: &str) -> Result<SessionSnapshot> {
        Ok(lock(&*self.session(id)?).snapshot())
    }

    /// All sessions in creation order.
    pub fn list_all(&self) -> Vec<SessionSnapshot> {
        let cells: Vec<SessionCell> = self.table().values().cloned().collect();
        cells.iter().map(|cell| lock(cell).snapshot()).collect()
    }

    /// Stop session if it owns a process and drop it from the table.
    pub fn remove(&self, id: &str) -> Result<SessionSnapshot> {
        let cell = self.session(id)?;
        let live = matches!(
            lock(&cell).status(),
            SessionStatus::Running | SessionStatus::Paused
        );
        if live {
            weak_error!(self.stop(id), "stop on remove:");
        }
        self.table().shift_remove(id);
        let snapshot = lock(&cell).snapshot();
        Ok(snapshot)
    }

    /// Stop every live session, failures are logged and skipped.
    pub fn shutdown(&self) {
        let cells: Vec<SessionCell> = self.table().values().cloned().collect();
        for cell in cells {
            let (id, status) = {
                let session = lock(&cell);
                (session.id().clone(), session.status())
            };
            if matches!(status, SessionStatus::Running | SessionStatus::Paused) {
                orch_debug!(target: "orchestrator", "{id}: stop on shutdown");
                weak_error!(self.stop(id.as_str()), "stop on shutdown:");
            }
        }
    }

    // ------------------------------------------ lifecycle ----------------------------------------

    /// Launch the debugee. On launch failure the session returns to `stopped`.
    pub fn start(&self, id: &str) -> Result<SessionSnapshot> {
        let cell = self.session(id)?;
        let mut session = lock(&cell);
        session.begin_start()?;

        let spec = LaunchSpec::for_target(session.r#type(), session.config());
        let mut launched = match spec.spawn() {
            Ok(launched) => launched,
            Err(e) => {
                session.rollback_start();
                orch_warn!(target: "orchestrator", "{id}: start failed: {e}");
                return Err(e);
            }
        };
        let pid = launched.pid();

        let backend = make_backend(BackendContext {
            session_id: session.id(),
            r#type: session.r#type(),
            config: session.config(),
            pid,
            stdin: launched.child.stdin.take(),
            events: self.events.clone(),
            connect_timeout: self.config.connect_timeout(),
        });

        session.attach(DebugeeProcess {
            pid,
            backend: backend.clone(),
        });
        orch_info!(
            target: "orchestrator",
            "{id}: started process {pid} ({} backend)",
            backend.name()
        );
        self.events.emit(
            session.id(),
            Payload::SessionStarted { pid: pid.as_raw() },
        );

        if let Err(e) = self.supervise(&cell, session.id(), launched) {
            backend.shutdown();
            session.detach_exited(pid);
            session.rollback_start();
            self.events.emit(
                session.id(),
                Payload::DebugError {
                    message: format!("process supervision failed: {e}"),
                },
            );
            return Err(e.into());
        }
        Ok(session.snapshot())
    }

    /// Spawn output pumps and the exit watcher for a launched process. If the watcher
    /// can't be started the process is killed.
    fn supervise(
        &self,
        cell: &SessionCell,
        id: &SessionId,
        launched: Launched,
    ) -> std::io::Result<()> {
        let pid = launched.pid();
        let Launched {
            child,
            stdout,
            stderr,
        } = launched;

        let watched = cell.clone();
        let events = self.events.clone();
        let spawned = thread::Builder::new()
            .name(format!("{id}-watcher"))
            .spawn(move || watch_exit(child, pid, &watched, &events));
        if let Err(e) = spawned {
            // the child went away with the closure, reap it by pid
            let _ = signal::kill(pid, Signal::SIGKILL);
            let _ = waitpid(pid, None);
            return Err(e);
        }

        let events = self.events.clone();
        let session_id = id.clone();
        weak_error!(
            thread::Builder::new()
                .name(format!("{id}-stdout"))
                .spawn(move || pump_lines(stdout, |text| {
                    events.emit(
                        &session_id,
                        Payload::Output {
                            stream: OutputStream::Stdout,
                            text,
                        },
                    )
                })),
            "stdout capture:"
        );

        let events = self.events.clone();
        let session_id = id.clone();
        weak_error!(
            thread::Builder::new()
                .name(format!("{id}-stderr"))
                .spawn(move || pump_lines(stderr, |message| {
                    events.emit(&session_id, Payload::DebugError { message })
                })),
            "stderr capture:"
        );

        Ok(())
    }

    /// Terminate session process. Stop of a `stopped` session moves it straight to
    /// `terminated`, stop of a `terminated` one changes nothing. The session is released
    /// even if the stop signal can't be delivered, the failure is reported as a
    /// `debugError` event.
    pub fn stop(&self, id: &str) -> Result<SessionSnapshot> {
        let cell = self.session(id)?;
        let mut session = lock(&cell);
        let status = session.status();
        if status == SessionStatus::Terminated {
            orch_debug!(target: "orchestrator", "{id}: already terminated");
            return Ok(session.snapshot());
        }

        if let Some(process) = session.terminate() {
            process.backend.shutdown();
            let delivered = self
                .signal_process(process.pid, self.config.stop_signal)
                .and_then(|_| match status {
                    // stopped process must run to receive the signal
                    SessionStatus::Paused => self.signal_process(process.pid, Signal::SIGCONT),
                    _ => Ok(()),
                });
            match delivered {
                Ok(()) => orch_info!(
                    target: "orchestrator",
                    "{id}: process {} signaled with {}",
                    process.pid,
                    self.config.stop_signal
                ),
                Err(e) => {
                    orch_warn!(target: "orchestrator", "{id}: stop: {e}");
                    self.events.emit(
                        session.id(),
                        Payload::DebugError {
                            message: format!("stop: {e}"),
                        },
                    );
                }
            }
        }

        self.events.emit(session.id(), Payload::SessionStopped);
        Ok(session.snapshot())
    }

    /// Send a signal, a process that is already gone is not an error.
    fn signal_process(&self, pid: Pid, sig: Signal) -> Result<()> {
        match signal::kill(pid, sig) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(source) => Err(Error::Signal {
                signal: sig,
                pid,
                source,
            }),
        }
    }

    /// Run backend call without holding the session lock. Errors of a process that
    /// disappeared in the meantime are reported as [`Error::NotRunning`].
    fn dispatch<T>(
        &self,
        cell: &SessionCell,
        call: impl FnOnce(&dyn Backend) -> Result<T>,
    ) -> Result<(Pid, T)> {
        let (pid, backend) = lock(cell).backend()?;
        match call(backend.as_ref()) {
            Ok(value) => Ok((pid, value)),
            Err(e) => {
                let session = lock(cell);
                if session.pid() != Some(pid) {
                    orch_debug!(
                        target: "orchestrator",
                        "{}: backend error after exit: {e}",
                        session.id()
                    );
                    return Err(Error::NotRunning(session.id().to_string()));
                }
                Err(e)
            }
        }
    }

    fn set_live_status(&self, id: &str, status: SessionStatus) -> Result<SessionSnapshot> {
        let cell = self.session(id)?;
        let operation: fn(&dyn Backend) -> Result<()> = match status {
            SessionStatus::Paused => |b| b.suspend(),
            _ => |b| b.resume(),
        };
        let (pid, ()) = self.dispatch(&cell, operation)?;

        let mut session = lock(&cell);
        if !session.set_live_status(pid, status) {
            return Err(Error::NotRunning(id.to_string()));
        }
        let payload = match status {
            SessionStatus::Paused => Payload::SessionPaused,
            _ => Payload::SessionResumed,
        };
        self.events.emit(session.id(), payload);
        Ok(session.snapshot())
    }

    /// Suspend the debugee. Pausing a paused session suspends it again and keeps
    /// `paused` status.
    pub fn pause(&self, id: &str) -> Result<SessionSnapshot> {
        self.set_live_status(id, SessionStatus::Paused)
    }

    pub fn resume(&self, id: &str) -> Result<SessionSnapshot> {
        self.set_live_status(id, SessionStatus::Running)
    }

    // ------------------------------------------ breakpoints --------------------------------------

    pub fn add_breakpoint(&self, id: &str, spec: BreakpointSpec) -> Result<Breakpoint> {
        let cell = self.session(id)?;
        let mut session = lock(&cell);
        let breakpoint = session.breakpoints_mut().add(spec).clone();
        self.events.emit(
            session.id(),
            Payload::BreakpointAdded {
                breakpoint: breakpoint.clone(),
            },
        );
        Ok(breakpoint)
    }

    /// Remove a breakpoint. Unknown id is ignored unless strict removal is configured.
    pub fn remove_breakpoint(&self, id: &str, breakpoint_id: &str) -> Result<()> {
        let cell = self.session(id)?;
        let mut session = lock(&cell);
        match session.breakpoints_mut().remove(breakpoint_id) {
            Some(breakpoint) => self.events.emit(
                session.id(),
                Payload::BreakpointRemoved {
                    breakpoint_id: breakpoint.id,
                },
            ),
            None if self.config.strict_breakpoint_removal => {
                return Err(Error::BreakpointNotFound {
                    session: id.to_string(),
                    breakpoint: breakpoint_id.to_string(),
                })
            }
            None => {
                orch_debug!(
                    target: "orchestrator",
                    "{id}: remove of unknown breakpoint {breakpoint_id}"
                )
            }
        }
        Ok(())
    }

    pub fn update_breakpoint(
        &self,
        id: &str,
        breakpoint_id: &str,
        patch: BreakpointPatch,
    ) -> Result<Breakpoint> {
        let cell = self.session(id)?;
        let mut session = lock(&cell);
        let breakpoint = session
            .breakpoints_mut()
            .update(breakpoint_id, patch)
            .cloned()
            .ok_or_else(|| Error::BreakpointNotFound {
                session: id.to_string(),
                breakpoint: breakpoint_id.to_string(),
            })?;
        self.events.emit(
            session.id(),
            Payload::BreakpointUpdated {
                breakpoint: breakpoint.clone(),
            },
        );
        Ok(breakpoint)
    }

    pub fn get_breakpoint(&self, id: &str, breakpoint_id: &str) -> Result<Breakpoint> {
        let cell = self.session(id)?;
        let session = lock(&cell);
        session
            .breakpoints()
            .get(breakpoint_id)
            .cloned()
            .ok_or_else(|| Error::BreakpointNotFound {
                session: id.to_string(),
                breakpoint: breakpoint_id.to_string(),
            })
    }

    pub fn list_breakpoints(&self, id: &str) -> Result<HashMap<String, Breakpoint>> {
        Ok(lock(&*self.session(id)?).breakpoints().snapshot())
    }

    // ------------------------------------------ frames and variables -----------------------------

    pub fn get_variables(&self, id: &str, frame_id: Option<i64>) -> Result<Variables> {
        lock(&*self.session(id)?).variables(frame_id)
    }

    pub fn set_variable(&self, id: &str, name: &str, value: serde_json::Value) -> Result<()> {
        lock(&*self.session(id)?).set_variable(name, value);
        Ok(())
    }

    pub fn get_call_stack(&self, id: &str) -> Result<Vec<CallFrame>> {
        Ok(lock(&*self.session(id)?).frames().frames().to_vec())
    }

    pub fn set_current_frame(&self, id: &str, frame_id: i64) -> Result<()> {
        let cell = self.session(id)?;
        let mut session = lock(&cell);
        if !session.frames_mut().select(frame_id) {
            return Err(Error::FrameNotFound {
                session: id.to_string(),
                frame: frame_id,
            });
        }
        Ok(())
    }

    /// Install a new call stack snapshot. A frame selected before becomes stale.
    pub fn replace_call_stack(&self, id: &str, frames: Vec<CallFrame>) -> Result<()> {
        let cell = self.session(id)?;
        let mut session = lock(&cell);
        let frame_count = frames.len();
        session.frames_mut().replace(frames);
        self.events
            .emit(session.id(), Payload::CallStackChanged { frame_count });
        Ok(())
    }

    /// Ask the backend for the current stack. Backends without stack introspection leave
    /// the stored stack untouched.
    pub fn refresh_call_stack(&self, id: &str) -> Result<Vec<CallFrame>> {
        let cell = self.session(id)?;
        let (pid, frames) = self.dispatch(&cell, |b| b.stack_trace())?;
        let Some(frames) = frames else {
            return Ok(lock(&cell).frames().frames().to_vec());
        };

        let mut session = lock(&cell);
        if session.pid() != Some(pid) {
            return Err(Error::NotRunning(id.to_string()));
        }
        session.frames_mut().replace(frames.clone());
        self.events.emit(
            session.id(),
            Payload::CallStackChanged {
                frame_count: frames.len(),
            },
        );
        Ok(frames)
    }

    // ------------------------------------------ commands -----------------------------------------

    fn command(&self, id: &str, command: DebugCommand) -> Result<CommandOutcome> {
        let cell = self.session(id)?;
        let (_, outcome) = self.dispatch(&cell, |b| b.execute(&command))?;
        self.events.emit(
            lock(&cell).id(),
            Payload::CommandDispatched { command },
        );
        Ok(outcome)
    }

    pub fn step_over(&self, id: &str) -> Result<CommandOutcome> {
        self.command(id, DebugCommand::StepOver)
    }

    pub fn step_into(&self, id: &str) -> Result<CommandOutcome> {
        self.command(id, DebugCommand::StepInto)
    }

    pub fn step_out(&self, id: &str) -> Result<CommandOutcome> {
        self.command(id, DebugCommand::StepOut)
    }

    pub fn continue_(&self, id: &str) -> Result<CommandOutcome> {
        self.command(id, DebugCommand::Continue)
    }

    pub fn evaluate(&self, id: &str, expression: impl Into<String>) -> Result<CommandOutcome> {
        self.command(
            id,
            DebugCommand::Evaluate {
                expression: expression.into(),
            },
        )
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Forward every line of a pipe to `emit` until EOF.
fn pump_lines(pipe: PipeReader, emit: impl Fn(String)) {
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                emit(line.trim_end_matches(['\r', '\n']).to_string());
            }
            Err(e) => {
                orch_debug!(target: "orchestrator", "pipe read: {e}");
                break;
            }
        }
    }
}

fn exit_payload(status: &ExitStatus) -> Payload {
    Payload::SessionTerminated {
        code: status.code(),
        signal: status
            .signal()
            .map(|raw| match Signal::try_from(raw) {
                Ok(sig) => sig.to_string(),
                Err(_) => raw.to_string(),
            }),
    }
}

/// Wait for process exit and move the session into `terminated`. Runs on a dedicated
/// thread per process.
fn watch_exit(mut child: Child, pid: Pid, cell: &Mutex<Session>, events: &EventBus) {
    let status = child.wait();

    let mut session = lock(cell);
    let process = session.detach_exited(pid);
    let requested = process.is_none();
    if let Some(process) = process {
        process.backend.shutdown();
    }
    session.terminate();

    match status {
        Ok(status) => {
            orch_info!(
                target: "orchestrator",
                "{}: process {pid} exited with {status}",
                session.id()
            );
            if !requested && !status.success() {
                events.emit(
                    session.id(),
                    Payload::DebugError {
                        message: format!("process {pid} exited unexpectedly: {status}"),
                    },
                );
            }
            events.emit(session.id(), exit_payload(&status));
        }
        Err(e) => {
            orch_warn!(
                target: "orchestrator",
                "{}: wait for process {pid}: {e}",
                session.id()
            );
            events.emit(
                session.id(),
                Payload::DebugError {
                    message: format!("wait for process {pid}: {e}"),
                },
            );
            events.emit(
                session.id(),
                Payload::SessionTerminated {
                    code: None,
                    signal: None,
                },
            );
        }
    }
}
