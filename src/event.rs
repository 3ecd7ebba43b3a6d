//! Event channel: a single multiplexed stream of session events.
//!
//! Producers never block. Every subscriber owns a bounded buffer, events addressed to a
//! full buffer are dropped and disconnected subscribers are pruned on the next publish.

use crate::dispatcher::DebugCommand;
use crate::session::{Breakpoint, SessionId};
use crate::{orch_debug, orch_warn};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use strum_macros::{Display, IntoStaticStr};

pub const DEFAULT_BUFFER: usize = 1024;

/// Externally visible event classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Display, IntoStaticStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EventKind {
    Started,
    Stopped,
    Paused,
    Resumed,
    Breakpoint,
    Exception,
    Output,
    Terminated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    /// Output relayed from a debugger backend.
    Console,
}

/// Event data, tagged by event name.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum Payload {
    SessionCreated,
    #[serde(rename_all = "camelCase")]
    SessionStarted {
        pid: i32,
    },
    SessionPaused,
    SessionResumed,
    SessionStopped,
    /// Process exit, `code` is set for a normal exit, `signal` when killed by a signal.
    #[serde(rename_all = "camelCase")]
    SessionTerminated {
        code: Option<i32>,
        signal: Option<String>,
    },
    BreakpointAdded {
        breakpoint: Breakpoint,
    },
    #[serde(rename_all = "camelCase")]
    BreakpointRemoved {
        breakpoint_id: String,
    },
    BreakpointUpdated {
        breakpoint: Breakpoint,
    },
    Output {
        stream: OutputStream,
        text: String,
    },
    DebugError {
        message: String,
    },
    CommandDispatched {
        command: DebugCommand,
    },
    /// Debugee halted as reported by the debugger backend.
    Halted {
        reason: String,
        description: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    CallStackChanged {
        frame_count: usize,
    },
}

impl Payload {
    pub fn kind(&self) -> EventKind {
        match self {
            Payload::SessionCreated => EventKind::Stopped,
            Payload::SessionStarted { .. } => EventKind::Started,
            Payload::SessionPaused => EventKind::Paused,
            Payload::SessionResumed => EventKind::Resumed,
            Payload::SessionStopped => EventKind::Terminated,
            Payload::SessionTerminated { .. } => EventKind::Terminated,
            Payload::BreakpointAdded { .. }
            | Payload::BreakpointRemoved { .. }
            | Payload::BreakpointUpdated { .. } => EventKind::Breakpoint,
            Payload::Output { .. } => EventKind::Output,
            Payload::DebugError { .. } => EventKind::Exception,
            Payload::CommandDispatched { command } => match command {
                DebugCommand::Evaluate { .. } => EventKind::Output,
                _ => EventKind::Resumed,
            },
            Payload::Halted { reason, .. } => match reason.as_str() {
                "breakpoint" | "function breakpoint" | "data breakpoint" => EventKind::Breakpoint,
                "exception" => EventKind::Exception,
                _ => EventKind::Paused,
            },
            Payload::CallStackChanged { .. } => EventKind::Paused,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub session_id: SessionId,
    pub data: Payload,
    pub timestamp: DateTime<Utc>,
}

impl DebugEvent {
    pub fn new(session_id: SessionId, data: Payload) -> Self {
        Self {
            kind: data.kind(),
            session_id,
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Receiving end of an event subscription.
pub struct Subscription {
    receiver: Receiver<DebugEvent>,
}

impl Subscription {
    pub fn recv(&self) -> Option<DebugEvent> {
        self.receiver.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<DebugEvent> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_iter(&self) -> impl Iterator<Item = DebugEvent> + '_ {
        self.receiver.try_iter()
    }
}

impl IntoIterator for Subscription {
    type Item = DebugEvent;
    type IntoIter = mpsc::IntoIter<DebugEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.receiver.into_iter()
    }
}

/// Broadcast bus shared by all sessions of a registry.
pub struct EventBus {
    capacity: usize,
    subscribers: Mutex<Vec<SyncSender<DebugEvent>>>,
    dropped: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: Mutex::default(),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::sync_channel(self.capacity);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sender);
        Subscription { receiver }
    }

    pub fn publish(&self, event: DebugEvent) {
        orch_debug!(target: "orchestrator", "{} event: {:?}", event.session_id, event.data);

        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|subscriber| match subscriber.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                orch_warn!(target: "orchestrator", "slow event subscriber, event dropped (total dropped: {dropped})");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    pub fn emit(&self, session_id: &SessionId, data: Payload) {
        self.publish(DebugEvent::new(session_id.clone(), data));
    }

    /// Number of events dropped because of full subscriber buffers.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
