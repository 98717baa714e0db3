//! LANDMARK PF SIM: runs the landmark particle filter over recorded or synthetic data.
//!
//! The program has three subcommands:
//!
//! - `run`: localize against a landmark map from recorded controls and observations, optionally
//!   scoring the best particle against ground truth.
//! - `simulate`: drive a control sequence through the noiseless motion model and write the
//!   resulting ground truth and landmark observations in the layout `run` reads.
//! - `config`: write a template filter configuration file.
//!
//! Filter parameters come from a configuration file (TOML/JSON/YAML) given with `--config`, or
//! from the built-in defaults; selected values can be overridden per run on the command line.

mod common;

use clap::{Args, Parser, Subcommand};
use common::{init_logger, validate_input_file, validate_output_dir, validate_output_file};
use landmark_pf::map::Map;
use landmark_pf::particle::{ParticleAveragingStrategy, ParticleResamplingStrategy};
use landmark_pf::sim::{FilterConfig, ParticleLog, Scenario, read_csv, run_localization};
use landmark_pf::{ControlInput, Pose};
use log::{error, info};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::error::Error;
use std::path::PathBuf;

const LONG_ABOUT: &str =
    "LANDMARK PF SIM: runs a particle filter that localizes a planar agent against a known landmark map.

Inputs are headed CSV files:
  map           id,x,y
  controls      velocity,yaw_rate      (one row per step)
  observations  step,x,y               (vehicle-frame sightings, zero-based step)
  ground truth  x,y,theta              (optional, one row per step)

Filter parameters are read from --config (TOML/JSON/YAML) or default values.";

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Landmark particle filter simulator.", long_about = LONG_ABOUT)]
struct Cli {
    /// Filter configuration file (TOML/JSON/YAML); defaults are used when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand, Clone, Debug)]
enum Command {
    #[command(
        name = "run",
        about = "Run the particle filter over recorded data",
        long_about = "Run the particle filter over a recorded scenario. The filter is seeded around the first ground truth pose, or around --init-x/--init-y/--init-theta when no ground truth is given. One row per step is written to the output CSV."
    )]
    Run(RunArgs),
    #[command(
        name = "simulate",
        about = "Generate a synthetic scenario",
        long_about = "Drive a control sequence through the noiseless motion model from a starting pose and record the landmarks visible at every step. Writes map.csv, controls.csv, observations.csv and ground_truth.csv into the output directory."
    )]
    Simulate(SimulateArgs),
    #[command(name = "config", about = "Generate a template configuration file")]
    CreateConfig(CreateConfigArgs),
}

#[derive(Args, Clone, Debug)]
struct RunArgs {
    /// Landmark map CSV (id,x,y)
    #[arg(long, value_parser)]
    map: PathBuf,

    /// Control CSV (velocity,yaw_rate)
    #[arg(long, value_parser)]
    controls: PathBuf,

    /// Observation CSV (step,x,y)
    #[arg(long, value_parser)]
    observations: PathBuf,

    /// Ground truth CSV (x,y,theta)
    #[arg(long, value_parser)]
    ground_truth: Option<PathBuf>,

    /// Initial pose, required when no ground truth is given
    #[command(flatten)]
    init: InitialPoseArgs,

    /// Output CSV file path
    #[arg(short, long, value_parser)]
    output: PathBuf,

    /// Append every resampled particle cloud to this file as `x y theta` lines
    #[arg(long, value_parser)]
    particle_log: Option<PathBuf>,

    /// Override the configured RNG seed
    #[arg(long)]
    seed: Option<u64>,

    /// Override the configured number of particles
    #[arg(long)]
    num_particles: Option<usize>,

    /// Override the configured resampling strategy
    #[arg(long, value_enum)]
    resampling: Option<ParticleResamplingStrategy>,

    /// Override the configured averaging strategy
    #[arg(long, value_enum)]
    averaging: Option<ParticleAveragingStrategy>,
}

#[derive(Args, Clone, Debug)]
struct InitialPoseArgs {
    #[arg(long, allow_hyphen_values = true, requires_all = ["init_y", "init_theta"])]
    init_x: Option<f64>,
    #[arg(long, allow_hyphen_values = true, requires_all = ["init_x", "init_theta"])]
    init_y: Option<f64>,
    /// Heading in radians
    #[arg(long, allow_hyphen_values = true, requires_all = ["init_x", "init_y"])]
    init_theta: Option<f64>,
}

impl InitialPoseArgs {
    fn pose(&self) -> Option<Pose> {
        match (self.init_x, self.init_y, self.init_theta) {
            (Some(x), Some(y), Some(theta)) => Some(Pose::new(x, y, theta)),
            _ => None,
        }
    }
}

#[derive(Args, Clone, Debug)]
struct SimulateArgs {
    /// Landmark map CSV (id,x,y)
    #[arg(long, value_parser)]
    map: PathBuf,

    /// Control CSV (velocity,yaw_rate)
    #[arg(long, value_parser)]
    controls: PathBuf,

    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    start_x: f64,
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    start_y: f64,
    /// Starting heading in radians
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    start_theta: f64,

    /// Perturb observations with the configured landmark noise
    #[arg(long)]
    noisy: bool,

    /// Directory to write the scenario into
    #[arg(short, long, value_parser)]
    output: PathBuf,
}

/// Arguments for create-config command
#[derive(Args, Clone, Debug)]
struct CreateConfigArgs {
    /// Output file path for the config file
    /// File extension determines format: .json, .yaml/.yml, or .toml (recommended)
    #[arg(short, long, value_parser)]
    output: PathBuf,
}

fn load_config(path: Option<&PathBuf>) -> Result<FilterConfig, Box<dyn Error>> {
    match path {
        Some(path) => {
            validate_input_file(path)?;
            info!("Loading filter configuration from {}", path.display());
            Ok(FilterConfig::from_file(path)?)
        }
        None => Ok(FilterConfig::default()),
    }
}

fn apply_overrides(mut config: FilterConfig, args: &RunArgs) -> FilterConfig {
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(num_particles) = args.num_particles {
        config.num_particles = num_particles;
    }
    if let Some(resampling) = args.resampling {
        config.resampling_strategy = resampling;
    }
    if let Some(averaging) = args.averaging {
        config.averaging_strategy = averaging;
    }
    config
}

fn run(config: FilterConfig, args: &RunArgs) -> Result<(), Box<dyn Error>> {
    validate_input_file(&args.map)?;
    validate_input_file(&args.controls)?;
    validate_input_file(&args.observations)?;
    if let Some(ground_truth) = &args.ground_truth {
        validate_input_file(ground_truth)?;
    }
    validate_output_file(&args.output)?;

    let initial_pose = args.init.pose();
    if initial_pose.is_none() && args.ground_truth.is_none() {
        return Err("--init-x, --init-y and --init-theta are required without --ground-truth".into());
    }
    let config = apply_overrides(config, args);
    info!(
        "Running with {} particles, seed {}, {:?} resampling, {:?} averaging",
        config.num_particles, config.seed, config.resampling_strategy, config.averaging_strategy
    );

    let scenario = Scenario::load(
        &args.map,
        &args.controls,
        &args.observations,
        args.ground_truth.as_ref(),
    )?;
    let mut particle_log = match &args.particle_log {
        Some(path) => {
            validate_output_file(path)?;
            Some(ParticleLog::open(path)?)
        }
        None => None,
    };
    let result = run_localization(&config, &scenario, initial_pose, particle_log.as_mut())?;

    if let Some(mae) = result.mean_absolute_error() {
        info!(
            "Mean absolute error of best particle: x {:.4}, y {:.4}, theta {:.4} rad",
            mae.x, mae.y, mae.theta
        );
    }
    result.to_csv(&args.output)?;
    info!("Results written to {}", args.output.display());
    Ok(())
}

fn simulate(config: FilterConfig, args: &SimulateArgs) -> Result<(), Box<dyn Error>> {
    validate_input_file(&args.map)?;
    validate_input_file(&args.controls)?;
    validate_output_dir(&args.output)?;
    let params = config.validate()?;

    let map = Map::from_csv(&args.map)?;
    let controls: Vec<ControlInput> = read_csv(&args.controls)?;
    let start = Pose::new(args.start_x, args.start_y, args.start_theta);
    let mut rng = StdRng::seed_from_u64(config.seed);
    let noise = args.noisy.then_some(&params.landmark_std);
    let scenario = Scenario::simulate(
        map,
        start,
        controls,
        config.delta_t,
        config.sensor_range,
        noise,
        &mut rng,
    );

    scenario.map.to_csv(args.output.join("map.csv"))?;
    scenario.to_csv(
        args.output.join("controls.csv"),
        args.output.join("observations.csv"),
        args.output.join("ground_truth.csv"),
    )?;
    info!(
        "Wrote {} step scenario to {}",
        scenario.num_steps(),
        args.output.display()
    );
    Ok(())
}

fn create_config_file(args: &CreateConfigArgs) -> Result<(), Box<dyn Error>> {
    validate_output_file(&args.output)?;
    FilterConfig::default().to_file(&args.output)?;
    info!("Template configuration written to {}", args.output.display());
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logger(&cli.log_level, cli.log_file.as_ref())?;

    let outcome = match &cli.command {
        Command::Run(args) => load_config(cli.config.as_ref()).and_then(|c| run(c, args)),
        Command::Simulate(args) => {
            load_config(cli.config.as_ref()).and_then(|c| simulate(c, args))
        }
        Command::CreateConfig(args) => create_config_file(args),
    };
    if let Err(e) = &outcome {
        error!("{}", e);
    }
    outcome
}
