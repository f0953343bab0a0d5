//! Thin driver around the co-simulation core.
//!
//! Resolves a model reference, builds a fixed-step simulation, optionally
//! attaches a scenario, runs to the stop time and terminates. Exit code 0
//! on normal completion, 1 on any error surfaced to the top level.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use cosim_core::scenario::loader::load_scenario;
use cosim_core::{FixedStepAlgorithm, ModelResolver, Simulation, SimulationError};

#[derive(Parser)]
#[command(name = "cosim", version, about = "Fixed-step co-simulation driver")]
struct Cli {
    /// Model reference to simulate (resolved through registered sub-resolvers)
    path: PathBuf,

    /// Base step size in seconds
    #[arg(long, default_value_t = 1.0 / 100.0)]
    step_size: f64,

    /// Simulation start time
    #[arg(long)]
    start_time: Option<f64>,

    /// Simulation stop time
    #[arg(long)]
    stop_time: Option<f64>,

    /// Named parameter set applied at init
    #[arg(long)]
    parameter_set: Option<String>,

    /// Scenario config (JSON) with timed property assignments
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Log level filter (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), SimulationError> {
    // Concrete model providers register their sub-resolvers here; the
    // bare driver ships with none and reports unresolvable references.
    let mut resolver = ModelResolver::new();

    let base = cli
        .path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let uri = cli.path.display().to_string();
    let model = resolver.resolve(&base, &uri)?;

    let instance_name = cli
        .path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "instance".to_string());
    let instance = model.instantiate(&instance_name, None)?;

    let algorithm = FixedStepAlgorithm::new(cli.step_size);
    let mut sim = Simulation::new(Box::new(algorithm));
    sim.add_slave(instance)?;

    if let Some(scenario_path) = &cli.scenario {
        load_scenario(scenario_path, &mut sim)?;
    }

    sim.init(cli.start_time, cli.parameter_set.as_deref())?;
    if let Some(stop_time) = cli.stop_time {
        sim.step_until(stop_time)?;
    }
    sim.terminate()
}
