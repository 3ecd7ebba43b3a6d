//! Debug session orchestrator.
//!
//! Tracks debugging sessions for several target types (`node`, `python`, `chrome`,
//! `firefox` and arbitrary `custom` programs): launches debuggee processes, keeps their
//! lifecycle status, breakpoints and call stacks, forwards high level commands to a
//! debugger backend and reports everything that happens as a stream of events.
//!
//! ```no_run
//! use debug_orchestrator::session::{BreakpointSpec, DebugConfig, SessionType};
//! use debug_orchestrator::SessionRegistry;
//!
//! let registry = SessionRegistry::default();
//! let events = registry.subscribe();
//! let session = registry.create("app", SessionType::Node, DebugConfig::new("app.js"));
//! registry.add_breakpoint(session.id.as_str(), BreakpointSpec::new("app.js", 10)).unwrap();
//! registry.start(session.id.as_str()).unwrap();
//! for event in events.try_iter() {
//!     println!("{:?}", event.data);
//! }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod launcher;
pub mod log;
pub mod registry;
pub mod service;
pub mod session;

pub use error::{Error, ErrorKind, Result};
pub use registry::SessionRegistry;
