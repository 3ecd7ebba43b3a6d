use crate::session::SessionStatus;
use nix::unistd::Pid;
use serde::Serialize;
use strum_macros::{Display, IntoStaticStr};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- entity not found ------------------------------------------
    #[error("session `{0}` not found")]
    SessionNotFound(String),
    #[error("breakpoint `{breakpoint}` not found in session `{session}`")]
    BreakpointNotFound { session: String, breakpoint: String },
    #[error("frame {frame} not found in call stack of session `{session}`")]
    FrameNotFound { session: String, frame: i64 },

    // --------------------------------- lifecycle errors ------------------------------------------
    #[error("session `{session}` is {actual}, `{operation}` requires status {expected}")]
    InvalidState {
        session: String,
        operation: &'static str,
        expected: SessionStatus,
        actual: SessionStatus,
    },
    #[error("session `{0}` has no running process")]
    NotRunning(String),

    // --------------------------------- process errors --------------------------------------------
    #[error("launch `{program}`: {source}")]
    LaunchFailure {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("send {signal} to process {pid}: {source}")]
    Signal {
        signal: nix::sys::signal::Signal,
        pid: Pid,
        #[source]
        source: nix::Error,
    },

    // --------------------------------- debugger backend errors -----------------------------------
    #[error("backend `{backend}`: {message}")]
    Backend {
        backend: &'static str,
        message: String,
    },
    #[error("backend request `{command}` rejected: {message}")]
    BackendRequest { command: String, message: String },
    #[error("backend request `{0}` timed out")]
    BackendTimeout(String),
    #[error("backend connection closed")]
    BackendDisconnected,

    // --------------------------------- generic errors --------------------------------------------
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy visible to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, IntoStaticStr, Serialize)]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    NotRunning,
    LaunchFailure,
    Backend,
    BadRequest,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::SessionNotFound(_) => ErrorKind::NotFound,
            Error::BreakpointNotFound { .. } => ErrorKind::NotFound,
            Error::FrameNotFound { .. } => ErrorKind::NotFound,
            Error::InvalidState { .. } => ErrorKind::InvalidState,
            Error::NotRunning(_) => ErrorKind::NotRunning,
            Error::LaunchFailure { .. } => ErrorKind::LaunchFailure,
            Error::Signal { .. } => ErrorKind::Backend,
            Error::Backend { .. } => ErrorKind::Backend,
            Error::BackendRequest { .. } => ErrorKind::Backend,
            Error::BackendTimeout(_) => ErrorKind::Backend,
            Error::BackendDisconnected => ErrorKind::Backend,
            Error::BadRequest(_) => ErrorKind::BadRequest,
            Error::IO(_) => ErrorKind::Internal,
            Error::Config(_) => ErrorKind::Internal,
            Error::Json(_) => ErrorKind::Internal,
        }
    }

    /// HTTP status a transport should answer with.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::NotFound => 404,
            ErrorKind::InvalidState | ErrorKind::NotRunning => 409,
            ErrorKind::BadRequest => 400,
            ErrorKind::Backend => 502,
            ErrorKind::LaunchFailure | ErrorKind::Internal => 500,
        }
    }
}

#[macro_export]
macro_rules! _error {
    ($log_fn: path, $res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "orchestrator", "{:#}", e);
                None
            }
        }
    };
    ($log_fn: path, $res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "orchestrator", concat!($msg, " {:#}"), e);
                None
            }
        }
    };
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        $crate::_error!(log::warn, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::warn, $res, $msg)
    };
}

/// Transforms `Result` into `Option` and put error into debug logs if it occurs.
#[macro_export]
macro_rules! muted_error {
    ($res: expr) => {
        $crate::_error!(log::debug, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::debug, $res, $msg)
    };
}
