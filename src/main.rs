//! fsmkit - finite-state-machine runner
//!
//! Loads a machine definition and drives a list of events through one of the
//! concurrent drivers, logging every transition.

use clap::{Parser, Subcommand, ValueEnum};
use fsmkit_core::{
    BoxError, Decider, MachineDefinition, MachineView, NodeState, Signal, StateCatalog,
    TracingAspect,
};
use fsmkit_runtime::{
    rayon_pool, Config, MachineActor, MachineHandle, PoolActor, Reply, SynchronizedMachine,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

type Sig = Signal<String>;

#[derive(Parser)]
#[command(name = "fsmkit")]
#[command(about = "Run finite state machines from declarative definitions")]
#[command(version)]
struct Cli {
    /// Runtime config file (overrides FSMKIT_CONFIG)
    #[arg(short, long, env = "FSMKIT_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive events through a machine and print the visited nodes
    Run {
        /// Definition file (YAML or JSON)
        #[arg(short, long)]
        definition: PathBuf,

        /// Comma-separated event symbols, e.g. A,C,A,B
        #[arg(short, long, value_delimiter = ',')]
        events: Vec<String>,

        /// Driver to run the machine on
        #[arg(short, long, value_enum, default_value_t = Mode::Sync)]
        mode: Mode,
    },

    /// Validate a definition and print its summary
    Validate {
        /// Definition file (YAML or JSON)
        definition: PathBuf,
    },

    /// Write the effective runtime configuration as YAML
    DumpConfig {
        /// Output file
        output: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Mutex-guarded, runs on the calling thread
    Sync,
    /// Dedicated worker thread
    Actor,
    /// Shared rayon pool
    Pool,
}

/// Logs every entry into its node.
struct Announce;

impl NodeState<Sig> for Announce {
    fn on_entering(&self, event: &Sig, machine: &mut MachineView<'_, Sig>) -> Result<(), BoxError> {
        tracing::info!("entered '{}' on {}", machine.current_name(), event.0);
        Ok(())
    }
}

/// Custom-transition state that follows the `route` property.
struct Router;

impl NodeState<Sig> for Router {
    fn as_decider(&self) -> Option<&dyn Decider<Sig>> {
        Some(self)
    }
}

impl Decider<Sig> for Router {
    fn next_state(&self, _event: &Sig, machine: &MachineView<'_, Sig>) -> Option<String> {
        machine
            .property("route")
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

fn catalog(machine: &str) -> StateCatalog<Sig> {
    StateCatalog::new()
        .register("announce", || Announce)
        .register("router", || Router)
        .register_aspect("tracing", Arc::new(TracingAspect::new(machine)))
}

fn load_config(path: Option<&Path>) -> Result<Config, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            let mut config = Config::from_file(path)?;
            config.apply_env_overrides();
            config.validate()?;
            tracing::info!("Loaded config from {}", path.display());
            Ok(config)
        }
        None => {
            tracing::debug!("Using default configuration");
            Ok(Config::from_env()?)
        }
    }
}

fn load_definition(path: &Path) -> Result<MachineDefinition, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    // YAML is a superset of JSON, so one parser covers both.
    let value: serde_json::Value = serde_yaml::from_str(&content)?;
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("machine")
        .to_string();
    Ok(MachineDefinition::from_json(name, &value)?)
}

fn run(
    config: &Config,
    definition: &MachineDefinition,
    events: Vec<String>,
    mode: Mode,
) -> Result<(), Box<dyn std::error::Error>> {
    let machine = definition
        .to_builder(&catalog(&definition.name))?
        .build()?;

    let handle: Box<dyn MachineHandle<Sig>> = match mode {
        Mode::Sync => Box::new(SynchronizedMachine::new(machine)?),
        Mode::Actor => Box::new(MachineActor::spawn(machine, &config.actor)?),
        Mode::Pool => {
            let executor = rayon_pool(config.pool.threads)?;
            Box::new(PoolActor::new(machine, executor, config.pool.backlog())?)
        }
    };

    tracing::info!(
        "Running '{}' ({:?} mode, {} event(s))",
        definition.name,
        mode,
        events.len()
    );

    let mut visited = vec![handle.current_name()];
    let mut failures = 0usize;
    for symbol in events {
        match handle.transit(Signal(symbol.clone())) {
            Ok(Reply::Transited { outcome, stamp }) => {
                tracing::debug!("{} -> {} ({:?})", symbol, stamp.name(), outcome);
                visited.push(stamp.name().to_string());
            }
            Ok(other) => tracing::debug!("{}: {:?}", symbol, other),
            Err(e) if e.is_invalid_event() => {
                failures += 1;
                tracing::warn!("event {} rejected: {}", symbol, e);
            }
            Err(e) => return Err(e.into()),
        }
    }

    println!("{}", visited.join(" -> "));
    if failures > 0 {
        println!("{} event(s) rejected", failures);
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            definition,
            events,
            mode,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let definition = load_definition(&definition)?;
            run(&config, &definition, events, mode)?;
        }
        Commands::Validate { definition } => {
            let definition = load_definition(&definition)?;
            // Resolving against the catalog catches unknown state keys and symbols.
            definition.to_builder(&catalog(&definition.name))?.build()?;

            println!("{} (checksum {})", definition.name, definition.checksum);
            for state in &definition.raw.states {
                let events = definition.events_from(&state.name);
                println!("  {}: [{}]", state.name, events.join(", "));
            }
        }
        Commands::DumpConfig { output } => {
            let config = load_config(cli.config.as_deref())?;
            config.save(&output)?;
            println!("Wrote {}", output.display());
        }
    }

    Ok(())
}
