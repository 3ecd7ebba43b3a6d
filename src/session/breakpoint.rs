use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

const ID_RANDOM_LEN: usize = 9;

/// Requested suspension point at a file/line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoint {
    pub id: String,
    pub file: String,
    pub line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hit_count: Option<u32>,
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

/// Breakpoint description without an identity, used to add a new breakpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointSpec {
    pub file: String,
    pub line: u32,
    #[serde(default)]
    pub column: Option<u32>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub hit_count: Option<u32>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

impl BreakpointSpec {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column: None,
            condition: None,
            hit_count: None,
            enabled: true,
        }
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }
}

/// Distinguish an absent field (`None`) from an explicit `null` (`Some(None)`).
fn nullable<'de, D, T>(d: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(d).map(Some)
}

/// Partial breakpoint update, only present fields are merged. Optional fields are
/// cleared with `Some(None)` (`null` on the wire).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub column: Option<Option<u32>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub condition: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub hit_count: Option<Option<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl Breakpoint {
    fn merge(&mut self, patch: BreakpointPatch) {
        if let Some(file) = patch.file {
            self.file = file;
        }
        if let Some(line) = patch.line {
            self.line = line;
        }
        if let Some(column) = patch.column {
            self.column = column;
        }
        if let Some(condition) = patch.condition {
            self.condition = condition;
        }
        if let Some(hit_count) = patch.hit_count {
            self.hit_count = hit_count;
        }
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
    }
}

/// Generate a breakpoint id in `bp-<unix millis>-<9 base36 chars>` form.
fn generate_id(rng: &mut impl Rng) -> String {
    let suffix: String = (0..ID_RANDOM_LEN)
        .filter_map(|_| char::from_digit(rng.gen_range(0..36), 36))
        .collect();
    format!("bp-{}-{suffix}", Utc::now().timestamp_millis())
}

/// Per-session breakpoint storage.
#[derive(Default)]
pub struct BreakpointRegistry {
    breakpoints: HashMap<String, Breakpoint>,
}

impl BreakpointRegistry {
    /// Store a new breakpoint under a freshly generated id unique within this registry.
    pub fn add(&mut self, spec: BreakpointSpec) -> &Breakpoint {
        let mut rng = rand::thread_rng();
        let id = loop {
            let id = generate_id(&mut rng);
            if !self.breakpoints.contains_key(&id) {
                break id;
            }
        };

        let brkpt = Breakpoint {
            id: id.clone(),
            file: spec.file,
            line: spec.line,
            column: spec.column,
            condition: spec.condition,
            hit_count: spec.hit_count,
            enabled: spec.enabled,
        };
        self.breakpoints.entry(id).or_insert(brkpt)
    }

    pub fn remove(&mut self, id: &str) -> Option<Breakpoint> {
        self.breakpoints.remove(id)
    }

    pub fn update(&mut self, id: &str, patch: BreakpointPatch) -> Option<&Breakpoint> {
        let brkpt = self.breakpoints.get_mut(id)?;
        brkpt.merge(patch);
        Some(brkpt)
    }

    pub fn get(&self, id: &str) -> Option<&Breakpoint> {
        self.breakpoints.get(id)
    }

    pub fn len(&self) -> usize {
        self.breakpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
    }

    pub fn snapshot(&self) -> HashMap<String, Breakpoint> {
        self.breakpoints.clone()
    }
}
