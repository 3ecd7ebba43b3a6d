use crate::error::Result;
use crate::event::DEFAULT_BUFFER;
use crate::{muted_error, weak_error};
use nix::sys::signal::Signal;
use serde::{de, Deserialize, Deserializer};
use std::fs::read_to_string;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Orchestrator settings, loaded from a TOML file.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// Default `env_logger` filter, `RUST_LOG` takes precedence.
    pub log_filter: String,
    /// Raise not-found error on removal of an unknown breakpoint instead of ignoring it.
    pub strict_breakpoint_removal: bool,
    /// Signal used to terminate a debugee on stop.
    #[serde(deserialize_with = "deserialize_signal")]
    pub stop_signal: Signal,
    /// Per subscriber event buffer.
    pub event_buffer: usize,
    /// How long to wait for a remote debug adapter to accept a connection.
    pub connect_timeout_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            strict_breakpoint_removal: false,
            stop_signal: Signal::SIGTERM,
            event_buffer: DEFAULT_BUFFER,
            connect_timeout_ms: 10_000,
        }
    }
}

/// Accepts both `SIGTERM` and `TERM` forms.
pub fn parse_signal(name: &str) -> std::result::Result<Signal, String> {
    let name = name.trim().to_ascii_uppercase();
    Signal::from_str(&name)
        .or_else(|_| Signal::from_str(&format!("SIG{name}")))
        .map_err(|_| format!("unknown signal `{name}`"))
}

fn deserialize_signal<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Signal, D::Error> {
    let name = String::deserialize(d)?;
    parse_signal(&name).map_err(de::Error::custom)
}

impl OrchestratorConfig {
    const DEFAULT_PATH: &'static str = ".config/dorch/config.toml";

    /// Load configuration from `path`, or from `~/.config/dorch/config.toml` when no path
    /// given. Missing or broken default file means default configuration, an explicit file
    /// must exist and be valid.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            None => {
                let Some(home) = home::home_dir() else {
                    return Ok(Self::default());
                };
                let data = muted_error!(read_to_string(home.join(Self::DEFAULT_PATH)));
                Ok(data
                    .and_then(|data| weak_error!(Self::from_toml(&data), "default config:"))
                    .unwrap_or_default())
            }
            Some(path) => Self::from_toml(&read_to_string(path)?),
        }
    }

    pub fn from_toml(data: &str) -> Result<Self> {
        Ok(toml::de::from_str(data)?)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
