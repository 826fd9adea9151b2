use log::{info, warn};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::config::AppConfig;
use super::error::SimError;
use super::files::{load_feature_map, WeightFile};
use super::harness::{CycleHarness, DownstreamSink, ReadyPolicy, RunReport, UpstreamSource};
use super::sim::inject::inject_message;
use super::sim::mode::{RunMode, StepMode};
use super::sim::model_step;
use super::sim::shell::{Command, Shell};
use super::utils::log::set_quiet;
use super::utils::report::print_simulation_records;
use crate::arch::conv::main::{ACCEL_ID, ACCEL_RESULT_PORT, DRIVER_ID, DRIVER_START_PORT};
use crate::arch::conv::{create_simulation, BuiltinWeights, ConvLayer, ConvOutput, FeatureMap};

pub struct Simulator {
  config: AppConfig,
  layer: ConvLayer,
  map: FeatureMap,
  trace: Option<BufWriter<File>>,
}

impl Simulator {
  pub fn new(config: AppConfig) -> Result<Self, SimError> {
    set_quiet(config.simulation.quiet);

    let layer_id = config.layer.id;
    let layer = if config.layer.weights_file.is_empty() {
      ConvLayer::from_store("conv", layer_id, &BuiltinWeights)?
    } else {
      let table = WeightFile::load(Path::new(&config.layer.weights_file))?.to_table()?;
      ConvLayer::from_store("conv", layer_id, &table)?
    };

    let geometry = layer.geometry();
    let map = if config.input.file.is_empty() {
      FeatureMap::ramp(geometry.image_size, geometry.in_channels, config.input.ramp_base)
    } else {
      load_feature_map(Path::new(&config.input.file))?
    };
    map.check_shape(&geometry)?;

    let trace = if config.simulation.trace_file.is_empty() {
      None
    } else {
      info!("tracing to {}", config.simulation.trace_file);
      Some(BufWriter::new(File::create(&config.simulation.trace_file)?))
    };

    Ok(Self {
      config,
      layer,
      map,
      trace,
    })
  }

  pub fn run(&mut self) -> Result<RunReport, SimError> {
    let step_mode = StepMode::from_flag(self.config.simulation.step_mode);
    match self.config.simulation.run_mode {
      RunMode::Cycle => self.run_cycle(step_mode),
      RunMode::Event => self.run_event(),
    }
  }

  fn harness(&self) -> CycleHarness {
    let sim = &self.config.simulation;
    CycleHarness::new(
      self.layer.clone(),
      UpstreamSource::new(self.map.clone(), sim.upstream_latency),
      DownstreamSink::raster(
        self.layer.geometry().out_size(),
        ReadyPolicy::from_period(sim.ready_period),
      ),
    )
  }

  fn run_cycle(&mut self, step_mode: StepMode) -> Result<RunReport, SimError> {
    let max_cycles = self.config.simulation.max_cycles;
    let mut harness = self.harness();

    if step_mode == StepMode::Continuous {
      let report = harness.run(max_cycles)?;
      self.trace_outputs(&report.outputs)?;
      return Ok(report);
    }

    info!("Step mode - Enter to step one cycle, 'si N', 'p', 'c', 'q'");
    let mut shell = Shell::new()?;
    let mut delivered = 0;
    while !harness.is_done() {
      match shell.read_command()? {
        Command::Step(n) => {
          for _ in 0..n {
            if harness.is_done() {
              break;
            }
            harness.step()?;
          }
          print_state(&harness);
        },
        Command::Print => print_state(&harness),
        Command::Continue => {
          harness.run(max_cycles)?;
        },
        Command::Quit => break,
      }
      let outputs = harness.sink.results();
      self.trace_outputs(&outputs[delivered..])?;
      delivered = outputs.len();
    }
    Ok(harness.report())
  }

  fn run_event(&mut self) -> Result<RunReport, SimError> {
    let sim = &self.config.simulation;
    let max_time = sim.max_cycles as f64;
    let expected = self.layer.geometry().positions();

    let mut simulation = create_simulation(
      self.layer.clone(),
      self.map.clone(),
      sim.upstream_latency as f64,
      sim.window,
    );
    inject_message(&mut simulation, DRIVER_ID, None, None, Some(DRIVER_START_PORT), "{}");

    let mut outputs = Vec::with_capacity(expected);
    while outputs.len() < expected {
      if simulation.get_global_time() > max_time {
        return Err(SimError::Timeout {
          cycles: sim.max_cycles,
          outputs: outputs.len(),
          expected,
        });
      }
      for msg in model_step(&mut simulation, &mut self.trace)? {
        if msg.source_id() == ACCEL_ID && msg.source_port() == ACCEL_RESULT_PORT {
          outputs.push(serde_json::from_str::<ConvOutput>(msg.content())?);
        }
      }
    }

    if !sim.quiet {
      print_simulation_records(&mut simulation);
    }
    Ok(RunReport {
      layer: self.layer.geometry().layer,
      cycles: simulation.get_global_time() as u64,
      stats: None,
      outputs,
    })
  }

  fn trace_outputs(&mut self, outputs: &[ConvOutput]) -> Result<(), SimError> {
    if let Some(writer) = &mut self.trace {
      for output in outputs {
        writeln!(writer, "{}", serde_json::to_string(output)?)?;
      }
      writer.flush()?;
    }
    Ok(())
  }
}

fn print_state(harness: &CycleHarness) {
  let state = harness.layer.controller.state();
  let stats = harness.layer.stats();
  info!(
    "cycle {}: phase={:?} pos=({}, {}) tap={} channel={} outputs={}",
    harness.cycle(),
    state.phase,
    state.pos.row,
    state.pos.col,
    state.tap,
    state.channel,
    stats.outputs
  );
  if stats.acc_saturations + stats.rescale_saturations > 0 {
    warn!(
      "saturations so far: accumulator={} rescale={}",
      stats.acc_saturations, stats.rescale_saturations
    );
  }
}
