use crate::dispatcher::DEFAULT_DEBUG_PORT;
use crate::error::{Error, Result};
use crate::orch_info;
use crate::session::{DebugConfig, SessionType};
use itertools::Itertools;
use nix::unistd::Pid;
use os_pipe::PipeReader;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

const CHROME_USER_DATA_DIR: &str = "/tmp/chrome-debug";

/// Concrete invocation of a debug target: binary, argument list, working directory and
/// environment overrides.
#[derive(Clone, Debug, PartialEq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Merged on top of the orchestrator environment, these values win on conflict.
    pub env: BTreeMap<String, String>,
}

/// Freshly spawned debugee with captured stdio.
pub struct Launched {
    pub child: Child,
    pub stdout: PipeReader,
    pub stderr: PipeReader,
}

impl Launched {
    pub fn pid(&self) -> Pid {
        Pid::from_raw(self.child.id() as i32)
    }
}

impl LaunchSpec {
    /// Build invocation for a target type.
    pub fn for_target(r#type: SessionType, config: &DebugConfig) -> Self {
        let debug_port = match config.port {
            None | Some(0) => DEFAULT_DEBUG_PORT,
            Some(port) => port,
        };

        let (program, args): (&str, Vec<String>) = match r#type {
            SessionType::Node => (
                "node",
                ["--inspect".to_string()]
                    .into_iter()
                    .chain(config.runtime_args.iter().cloned())
                    .chain([config.program.clone()])
                    .chain(config.args.iter().cloned())
                    .collect(),
            ),
            SessionType::Python => (
                "python",
                ["-m", "pdb", config.program.as_str()]
                    .into_iter()
                    .map(str::to_string)
                    .chain(config.args.iter().cloned())
                    .collect(),
            ),
            SessionType::Chrome => (
                "google-chrome",
                vec![
                    format!("--remote-debugging-port={debug_port}"),
                    format!("--user-data-dir={CHROME_USER_DATA_DIR}"),
                    config.program.clone(),
                ],
            ),
            SessionType::Firefox => (
                "firefox",
                vec![
                    format!("--start-debugger-server={debug_port}"),
                    config.program.clone(),
                ],
            ),
            SessionType::Custom => (config.program.as_str(), config.args.clone()),
        };

        Self {
            program: program.to_string(),
            args,
            cwd: config.cwd.clone(),
            env: config.env.clone(),
        }
    }

    /// Bare command names are looked up in `PATH`, anything with a path separator is
    /// used as is.
    fn resolve_program(&self) -> PathBuf {
        let program = Path::new(&self.program);
        if program.components().count() > 1 {
            return program.to_path_buf();
        }
        which::which(program).unwrap_or_else(|_| program.to_path_buf())
    }

    /// Spawn the process. Stdin is piped for command backends, stdout and stderr
    /// are captured, nothing is inherited from the orchestrator.
    pub fn spawn(&self) -> Result<Launched> {
        let failure = |source| Error::LaunchFailure {
            program: self.program.clone(),
            source,
        };

        let (stdout_reader, stdout_writer) = os_pipe::pipe().map_err(failure)?;
        let (stderr_reader, stderr_writer) = os_pipe::pipe().map_err(failure)?;

        let mut command = Command::new(self.resolve_program());
        command
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(stdout_writer)
            .stderr(stderr_writer);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }

        orch_info!(
            target: "launcher",
            "spawn `{} {}`{}",
            self.program,
            self.args.iter().join(" "),
            self.cwd
                .as_ref()
                .map(|cwd| format!(" in {}", cwd.display()))
                .unwrap_or_default()
        );
        let child = command.spawn().map_err(failure)?;
        // drop the write ends held by `command`, readers get EOF once the child exits
        drop(command);

        Ok(Launched {
            child,
            stdout: stdout_reader,
            stderr: stderr_reader,
        })
    }
}
