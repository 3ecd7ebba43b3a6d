//! Debug session model: identity, configuration, lifecycle status and per-session state
//! (breakpoints, call stack, variables).

pub mod breakpoint;
pub mod frame;

pub use breakpoint::{Breakpoint, BreakpointPatch, BreakpointRegistry, BreakpointSpec};
pub use frame::{CallFrame, CallFrameTracker, CurrentFrame, SourceLocation, Variables};

use crate::dispatcher::Backend;
use crate::error::Error;
use chrono::{DateTime, Utc};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use strum_macros::{Display, EnumString, IntoStaticStr};

/// Session identity, `debug-<n>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn from_number(n: u64) -> Self {
        Self(format!("debug-{n}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Debug target type, selects a launch strategy and a debugger backend.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SessionType {
    Node,
    Python,
    Chrome,
    Firefox,
    Custom,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SessionStatus {
    Stopped,
    Running,
    Paused,
    Terminated,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, EnumString)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum ConsoleMode {
    IntegratedTerminal,
    #[default]
    InternalConsole,
    ExternalTerminal,
}

/// Caller supplied launch configuration, immutable after session creation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub runtime_args: Vec<String>,
    #[serde(default)]
    pub console: ConsoleMode,
    #[serde(default)]
    pub stop_on_entry: bool,
    #[serde(default)]
    pub auto_attach: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Network target timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl DebugConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn with_args<I: Into<String>>(mut self, args: impl IntoIterator<Item = I>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

/// Process owned by a session together with the backend that drives it.
pub(crate) struct DebugeeProcess {
    pub(crate) pid: Pid,
    pub(crate) backend: Arc<dyn Backend>,
}

/// Point-in-time copy of a session, safe to hand out to callers.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub name: String,
    #[serde(rename = "type")]
    pub r#type: SessionType,
    pub config: DebugConfig,
    pub status: SessionStatus,
    /// Pid of the owned process, `None` when the session owns no process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<i32>,
    pub breakpoints: HashMap<String, Breakpoint>,
    pub variables: Variables,
    pub call_stack: Vec<CallFrame>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_frame: Option<i64>,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

/// One tracked debugging attempt. Owns at most one external process.
pub struct Session {
    id: SessionId,
    name: String,
    r#type: SessionType,
    config: DebugConfig,
    status: SessionStatus,
    process: Option<DebugeeProcess>,
    breakpoints: BreakpointRegistry,
    frames: CallFrameTracker,
    variables: Variables,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(id: SessionId, name: String, r#type: SessionType, config: DebugConfig) -> Self {
        Self {
            id,
            name,
            r#type,
            config,
            status: SessionStatus::Stopped,
            process: None,
            breakpoints: BreakpointRegistry::default(),
            frames: CallFrameTracker::default(),
            variables: Variables::new(),
            start_time: Utc::now(),
            end_time: None,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn r#type(&self) -> SessionType {
        self.r#type
    }

    pub fn config(&self) -> &DebugConfig {
        &self.config
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn pid(&self) -> Option<Pid> {
        self.process.as_ref().map(|p| p.pid)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            r#type: self.r#type,
            config: self.config.clone(),
            status: self.status,
            pid: self.pid().map(Pid::as_raw),
            breakpoints: self.breakpoints.snapshot(),
            variables: self.variables.clone(),
            call_stack: self.frames.frames().to_vec(),
            current_frame: match self.frames.current() {
                CurrentFrame::Frame(frame) => Some(frame.id),
                CurrentFrame::Unset | CurrentFrame::Stale(_) => None,
            },
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }

    fn ensure_status(&self, operation: &'static str, expected: SessionStatus) -> Result<(), Error> {
        if self.status != expected {
            return Err(Error::InvalidState {
                session: self.id.to_string(),
                operation,
                expected,
                actual: self.status,
            });
        }
        Ok(())
    }

    /// Enter `running` before the process is launched. Only a `stopped` session may start.
    pub(crate) fn begin_start(&mut self) -> Result<(), Error> {
        self.ensure_status("start", SessionStatus::Stopped)?;
        self.status = SessionStatus::Running;
        Ok(())
    }

    /// Return to `stopped` after a failed launch, the session stays usable for retry.
    pub(crate) fn rollback_start(&mut self) {
        debug_assert!(self.process.is_none());
        self.status = SessionStatus::Stopped;
    }

    pub(crate) fn attach(&mut self, process: DebugeeProcess) {
        debug_assert_eq!(self.status, SessionStatus::Running);
        self.process = Some(process);
    }

    /// Backend of the owned process, [`Error::NotRunning`] if there is no process.
    pub(crate) fn backend(&self) -> Result<(Pid, Arc<dyn Backend>), Error> {
        self.process
            .as_ref()
            .map(|p| (p.pid, p.backend.clone()))
            .ok_or_else(|| Error::NotRunning(self.id.to_string()))
    }

    /// Apply `paused` or `running` status if process `pid` is still owned by the session.
    /// Return false when the process is gone (e.g. exited while a command was in flight).
    pub(crate) fn set_live_status(&mut self, pid: Pid, status: SessionStatus) -> bool {
        debug_assert!(matches!(
            status,
            SessionStatus::Running | SessionStatus::Paused
        ));
        if self.pid() != Some(pid) {
            return false;
        }
        self.status = status;
        true
    }

    /// Move into absorbing `terminated` status. `end_time` is written once, later calls
    /// keep the first value. Return an owned process if any.
    pub(crate) fn terminate(&mut self) -> Option<DebugeeProcess> {
        self.status = SessionStatus::Terminated;
        self.end_time.get_or_insert_with(Utc::now);
        self.process.take()
    }

    /// Release process `pid` after it exits on its own. Returns `None` if the session
    /// no longer owns this process (an explicit stop came first).
    pub(crate) fn detach_exited(&mut self, pid: Pid) -> Option<DebugeeProcess> {
        if self.pid() == Some(pid) {
            self.process.take()
        } else {
            None
        }
    }

    pub fn breakpoints(&self) -> &BreakpointRegistry {
        &self.breakpoints
    }

    pub fn breakpoints_mut(&mut self) -> &mut BreakpointRegistry {
        &mut self.breakpoints
    }

    pub fn frames(&self) -> &CallFrameTracker {
        &self.frames
    }

    pub fn frames_mut(&mut self) -> &mut CallFrameTracker {
        &mut self.frames
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: serde_json::Value) {
        self.variables.insert(name.into(), value);
    }

    /// Variables of a frame `frame_id` if given and exists, else of the current frame,
    /// else session scoped variables.
    pub fn variables(&self, frame_id: Option<i64>) -> Result<Variables, Error> {
        if let Some(frame) = frame_id.and_then(|id| self.frames.frame(id)) {
            return Ok(frame.variables.clone());
        }

        match self.frames.current() {
            CurrentFrame::Frame(frame) => Ok(frame.variables.clone()),
            CurrentFrame::Stale(frame) => Err(Error::FrameNotFound {
                session: self.id.to_string(),
                frame,
            }),
            CurrentFrame::Unset => Ok(self.variables.clone()),
        }
    }
}
