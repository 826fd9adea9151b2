use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::arch::conv::LayerId;
use crate::simulator::error::SimError;
use crate::simulator::sim::mode::RunMode;

const DEFAULT_CONFIG: &str = include_str!("default.toml");
const ENV_PREFIX: &str = "CONVPIPE";

/// Which layer to build and where its weights come from
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LayerSection {
  pub id: LayerId,
  #[serde(default)]
  pub weights_file: String,
}

impl Default for LayerSection {
  fn default() -> Self {
    Self {
      id: LayerId::Conv1,
      weights_file: String::new(),
    }
  }
}

/// Input feature map
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InputSection {
  #[serde(default)]
  pub file: String,
  #[serde(default = "default_ramp_base")]
  pub ramp_base: i8,
}

fn default_ramp_base() -> i8 {
  2
}

impl Default for InputSection {
  fn default() -> Self {
    Self {
      file: String::new(),
      ramp_base: default_ramp_base(),
    }
  }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationSection {
  #[serde(default = "default_run_mode")]
  pub run_mode: RunMode,
  #[serde(default)]
  pub quiet: bool,
  #[serde(default)]
  pub step_mode: bool,
  #[serde(default)]
  pub trace_file: String,
  #[serde(default = "default_max_cycles")]
  pub max_cycles: u64,
  #[serde(default = "default_upstream_latency")]
  pub upstream_latency: u32,
  #[serde(default)]
  pub ready_period: u32,
  #[serde(default = "default_window")]
  pub window: usize,
}

fn default_run_mode() -> RunMode {
  RunMode::Cycle
}

fn default_max_cycles() -> u64 {
  1_000_000
}

fn default_upstream_latency() -> u32 {
  1
}

fn default_window() -> usize {
  2
}

impl Default for SimulationSection {
  fn default() -> Self {
    Self {
      run_mode: default_run_mode(),
      quiet: false,
      step_mode: false,
      trace_file: String::new(),
      max_cycles: default_max_cycles(),
      upstream_latency: default_upstream_latency(),
      ready_period: 0,
      window: default_window(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
  #[serde(default)]
  pub layer: LayerSection,
  #[serde(default)]
  pub input: InputSection,
  #[serde(default)]
  pub simulation: SimulationSection,
}

/// Settings given on the command line, applied after every file source.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
  pub layer: Option<LayerId>,
  pub weights_file: Option<String>,
  pub input_file: Option<String>,
  pub run_mode: Option<RunMode>,
  pub quiet: bool,
  pub step: bool,
  pub trace_file: Option<String>,
  pub max_cycles: Option<u64>,
  pub upstream_latency: Option<u32>,
}

/// Layer the built-in defaults, an optional TOML file and `CONVPIPE__*`
/// environment variables, later sources winning.
pub fn load_layered(custom_config_path: Option<&Path>) -> Result<AppConfig, SimError> {
  let mut builder = Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));
  if let Some(path) = custom_config_path {
    builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
  }
  builder = builder.add_source(
    Environment::with_prefix(ENV_PREFIX)
      .separator("__")
      .try_parsing(true),
  );

  Ok(builder.build()?.try_deserialize::<AppConfig>()?)
}

/// Parse a standalone TOML config, without defaults or environment.
pub fn load_config_str(content: &str) -> Result<AppConfig, SimError> {
  toml::from_str::<AppConfig>(content).map_err(|e| SimError::Parse {
    path: "<inline>".to_string(),
    message: e.to_string(),
  })
}

pub fn apply_cli_overrides(config: &mut AppConfig, cli: &CliOverrides) {
  if let Some(layer) = cli.layer {
    config.layer.id = layer;
  }
  if let Some(file) = &cli.weights_file {
    config.layer.weights_file = file.clone();
  }
  if let Some(file) = &cli.input_file {
    config.input.file = file.clone();
  }
  if let Some(mode) = cli.run_mode {
    config.simulation.run_mode = mode;
  }
  if cli.quiet {
    config.simulation.quiet = true;
  }
  if cli.step {
    config.simulation.step_mode = true;
  }
  if let Some(file) = &cli.trace_file {
    config.simulation.trace_file = file.clone();
  }
  if let Some(max_cycles) = cli.max_cycles {
    config.simulation.max_cycles = max_cycles;
  }
  if let Some(latency) = cli.upstream_latency {
    config.simulation.upstream_latency = latency;
  }
}

pub fn validate_config(config: &AppConfig) -> Result<(), SimError> {
  let sim = &config.simulation;
  if sim.max_cycles == 0 {
    return Err(SimError::Settings("max_cycles must be greater than 0".to_string()));
  }
  if sim.window == 0 {
    return Err(SimError::Settings("window must be at least 1".to_string()));
  }
  if sim.step_mode && sim.run_mode == RunMode::Event {
    return Err(SimError::Settings(
      "step mode is only available with run_mode = \"cycle\"".to_string(),
    ));
  }
  if config.layer.id == LayerId::Conv2 && config.layer.weights_file.trim().is_empty() {
    return Err(SimError::Settings(
      "conv2 has no built-in weights, set layer.weights_file".to_string(),
    ));
  }
  Ok(())
}

/// Make relative paths relative to `root`
pub fn resolve_paths(config: &mut AppConfig, root: &Path) {
  config.layer.weights_file = resolve_single_path(&config.layer.weights_file, root);
  config.input.file = resolve_single_path(&config.input.file, root);
  config.simulation.trace_file = resolve_single_path(&config.simulation.trace_file, root);
}

fn resolve_single_path(path_str: &str, root: &Path) -> String {
  if path_str.is_empty() {
    return String::new();
  }
  let path = Path::new(path_str);
  if path.is_absolute() {
    return path_str.to_string();
  }
  root.join(path).to_string_lossy().to_string()
}

/// Load and merge configuration
///
/// 1. built-in defaults
/// 2. custom config file, if given
/// 3. environment
/// 4. CLI overrides
/// 5. relative paths completed against `root`
/// 6. validation
pub fn load_and_merge_configs(
  custom_config_path: Option<&str>,
  root: &Path,
  cli: &CliOverrides,
) -> Result<AppConfig, SimError> {
  let custom = custom_config_path.map(|p| {
    let path = PathBuf::from(p);
    if path.is_absolute() {
      path
    } else {
      root.join(path)
    }
  });

  let mut config = load_layered(custom.as_deref())?;
  apply_cli_overrides(&mut config, cli);
  resolve_paths(&mut config, root);
  validate_config(&config)?;
  Ok(config)
}
