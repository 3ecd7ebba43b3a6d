use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named values in some scope (a frame or the whole session).
pub type Variables = BTreeMap<String, serde_json::Value>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

/// One stack entry. Frame id is unique only within a single call stack snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    pub id: i64,
    pub name: String,
    pub source: SourceLocation,
    pub line: u32,
    #[serde(default)]
    pub column: u32,
    #[serde(default)]
    pub variables: Variables,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct FrameRef {
    id: i64,
    generation: u64,
}

/// Result of a current frame lookup.
#[derive(Debug, PartialEq)]
pub enum CurrentFrame<'a> {
    /// No frame selected.
    Unset,
    Frame(&'a CallFrame),
    /// Selected frame belongs to a call stack that was replaced since selection.
    Stale(i64),
}

/// Ordered call stack (index 0 is the innermost frame) with a frame selector.
#[derive(Default)]
pub struct CallFrameTracker {
    frames: Vec<CallFrame>,
    current: Option<FrameRef>,
    generation: u64,
}

impl CallFrameTracker {
    pub fn frames(&self) -> &[CallFrame] {
        &self.frames
    }

    pub fn frame(&self, id: i64) -> Option<&CallFrame> {
        self.frames.iter().find(|f| f.id == id)
    }

    /// Replace the whole stack. A selection made before the replacement becomes stale even
    /// if the new stack reuses the same frame id.
    pub fn replace(&mut self, frames: Vec<CallFrame>) {
        self.frames = frames;
        self.generation += 1;
    }

    /// Bring frame into focus, return false if there is no such frame in current stack.
    pub fn select(&mut self, id: i64) -> bool {
        if self.frame(id).is_none() {
            return false;
        }
        self.current = Some(FrameRef {
            id,
            generation: self.generation,
        });
        true
    }

    pub fn current(&self) -> CurrentFrame<'_> {
        let Some(current) = self.current else {
            return CurrentFrame::Unset;
        };
        if current.generation != self.generation {
            return CurrentFrame::Stale(current.id);
        }
        match self.frame(current.id) {
            Some(frame) => CurrentFrame::Frame(frame),
            None => CurrentFrame::Stale(current.id),
        }
    }
}
