use anyhow::Context;
use clap::{Parser, Subcommand};
use debug_orchestrator::config::{parse_signal, OrchestratorConfig};
use debug_orchestrator::event::Payload;
use debug_orchestrator::service::Service;
use debug_orchestrator::session::{DebugConfig, SessionType};
use debug_orchestrator::SessionRegistry;
use log::info;
use nix::sys::signal::Signal;
use std::io;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (default: ~/.config/dorch/config.toml)
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, `RUST_LOG` takes precedence
    #[clap(long, global = true)]
    log: Option<String>,

    /// Report removal of an unknown breakpoint as an error
    #[clap(long, global = true)]
    strict_breakpoints: bool,

    /// Signal used to stop a debugee (e.g. SIGTERM, KILL)
    #[clap(long, global = true, value_parser = parse_signal)]
    stop_signal: Option<Signal>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve JSON requests from stdin, write responses and events to stdout
    Serve,
    /// Debug a single program, print session events until it terminates
    Launch {
        /// Debug target type: node, python, chrome, firefox or custom
        #[clap(long = "type", default_value = "custom")]
        target: SessionType,

        /// Working directory of the debugee
        #[clap(long)]
        cwd: Option<PathBuf>,

        /// Debug port for network attached targets
        #[clap(long)]
        port: Option<u16>,

        program: String,

        #[clap(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

impl Args {
    fn orchestrator_config(&self) -> anyhow::Result<OrchestratorConfig> {
        let mut config = OrchestratorConfig::load(self.config.as_deref())
            .context("load orchestrator configuration")?;
        if let Some(filter) = &self.log {
            config.log_filter = filter.clone();
        }
        if self.strict_breakpoints {
            config.strict_breakpoint_removal = true;
        }
        if let Some(signal) = self.stop_signal {
            config.stop_signal = signal;
        }
        Ok(config)
    }
}

fn launch(
    registry: &SessionRegistry,
    target: SessionType,
    config: DebugConfig,
) -> anyhow::Result<()> {
    let events = registry.subscribe();
    let program = config.program.clone();
    let session = registry.create(program.clone(), target, config);
    let id = session.id.as_str();

    let (interrupt_tx, interrupt_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        _ = interrupt_tx.send(());
    })
    .context("install Ctrl-C handler")?;

    registry
        .start(id)
        .with_context(|| format!("start `{program}`"))?;

    loop {
        if interrupt_rx.try_recv().is_ok() {
            info!(target: "service", "interrupted, stopping {id}");
            registry.stop(id)?;
        }
        let Some(event) = events.recv_timeout(Duration::from_millis(100)) else {
            continue;
        };
        println!("{}", serde_json::to_string(&event)?);
        if matches!(event.data, Payload::SessionTerminated { .. }) {
            break;
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = args.orchestrator_config()?;
    debug_orchestrator::log::init(&config.log_filter);

    let registry = Arc::new(SessionRegistry::new(config));
    match args.command {
        Command::Serve => {
            let service = Service::new(registry.clone());
            service
                .serve(io::stdin().lock(), io::stdout())
                .context("serve requests")?;
        }
        Command::Launch {
            target,
            cwd,
            port,
            program,
            args,
        } => {
            let mut config = DebugConfig::new(program).with_args(args);
            config.cwd = cwd;
            config.port = port;
            launch(&registry, target, config)?;
        }
    }
    Ok(())
}
