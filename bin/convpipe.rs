use clap::Parser;
use convpipe::arch::conv::LayerId;
use convpipe::simulator::config::{load_and_merge_configs, CliOverrides};
use convpipe::simulator::sim::mode::RunMode;
use convpipe::simulator::utils::log::init_log;
use convpipe::simulator::utils::report::print_run_summary;
use convpipe::simulator::{SimError, Simulator};
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;

/// convpipe - cycle-level model of a fixed-point 3x3 convolution layer
#[derive(Parser, Debug)]
#[command(name = "convpipe")]
#[command(version = "0.1.0")]
#[command(about = "Q1.6 convolution layer pipeline simulator", long_about = None)]
struct Args {
  /// Custom config file (TOML), layered over the built-in defaults
  #[arg(short, long, value_name = "FILE")]
  config: Option<String>,

  /// Layer to build: conv1 or conv2
  #[arg(short, long, value_name = "LAYER")]
  layer: Option<String>,

  /// Weight table file (TOML)
  #[arg(short, long, value_name = "FILE")]
  weights: Option<String>,

  /// Input feature map (.toml or .json)
  #[arg(short, long, value_name = "FILE")]
  input: Option<String>,

  /// Run mode: cycle or event
  #[arg(short, long, value_name = "MODE")]
  mode: Option<String>,

  /// Enable step mode (interactive stepping)
  #[arg(short, long)]
  step: bool,

  /// Quiet mode (warnings and errors only)
  #[arg(short, long)]
  quiet: bool,

  /// Output trace file path
  #[arg(long, value_name = "FILE")]
  trace_file: Option<String>,

  /// Give up after this many cycles
  #[arg(long, value_name = "N")]
  max_cycles: Option<u64>,

  /// Upstream response latency in cycles
  #[arg(long, value_name = "N")]
  latency: Option<u32>,

  /// Write the results as JSON to this file
  #[arg(short, long, value_name = "FILE")]
  output: Option<PathBuf>,
}

fn run(args: Args) -> Result<(), SimError> {
  let layer = args.layer.as_deref().map(str::parse::<LayerId>).transpose()?;
  let run_mode = args.mode.as_deref().map(str::parse::<RunMode>).transpose()?;

  let cli = CliOverrides {
    layer,
    weights_file: args.weights,
    input_file: args.input,
    run_mode,
    quiet: args.quiet,
    step: args.step,
    trace_file: args.trace_file,
    max_cycles: args.max_cycles,
    upstream_latency: args.latency,
  };

  let root = std::env::current_dir()?;
  let config = load_and_merge_configs(args.config.as_deref(), &root, &cli)?;
  let mut simulator = Simulator::new(config)?;
  let report = simulator.run()?;
  print_run_summary(&report);

  if let Some(path) = args.output {
    std::fs::write(&path, serde_json::to_string_pretty(&report)?)?;
    info!("results written to {}", path.display());
  }
  Ok(())
}

fn main() -> ExitCode {
  init_log();

  match run(Args::parse()) {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      error!("{}", e);
      ExitCode::FAILURE
    },
  }
}
