//! Conv Layer - ties the controller, position generator, weight bank, MAC
//! array and rescale stage together and handles the wiring between them.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::controller::{ConvOutput, Controller, Phase, PixelAddr};
use super::error::{ConfigError, ProtocolError};
use super::fixed::Q6;
use super::layers::{LayerGeometry, LayerId};
use super::mac::MacArray;
use super::position::{OutputPos, PositionGenerator};
use super::relu::relu_stage;
use super::rescale::BiasRescale;
use super::weight_bank::{WeightBank, WeightStore, WeightTable};
use crate::builtin::{Module, Wire};

/// Counters kept across the life of a layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerStats {
  pub cycles: u64,
  pub accepted: u64,
  pub outputs: u64,
  pub accumulates: u64,
  pub clears: u64,
  pub acc_saturations: u64,
  pub rescale_saturations: u64,
  pub raster_completions: u64,
  pub upstream_stall_cycles: u64,
  pub downstream_stall_cycles: u64,
}

#[derive(Debug, Clone)]
pub struct ConvLayer {
  name: String,
  geometry: LayerGeometry,
  stats: LayerStats,

  pub controller: Controller,
  pub positions: PositionGenerator,
  pub bank: WeightBank,
  pub macs: MacArray,
  pub rescale: BiasRescale,

  // downstream, in
  pub down_req: Wire<OutputPos>,
  pub down_ready: bool,
  // upstream, in
  pub up_resp: Wire<Q6>,

  // downstream, out
  pub down_req_ready: bool,
  pub result: Wire<ConvOutput>,
  pub result_taken: bool,
  pub raster_done: bool,
  // upstream, out
  pub up_req: Wire<PixelAddr>,
  pub up_ready: bool,
}

impl ConvLayer {
  pub fn new(name: impl Into<String>, table: WeightTable) -> Result<Self, ConfigError> {
    let bank = WeightBank::new("weight_bank", table)?;
    let geometry = bank.geometry();
    let name = name.into();
    info!(
      "{}: {} {}x{}x{} -> {}x{}x{}",
      name,
      geometry.layer,
      geometry.image_size,
      geometry.image_size,
      geometry.in_channels,
      geometry.out_size(),
      geometry.out_size(),
      geometry.filters
    );

    Ok(Self {
      name,
      geometry,
      stats: LayerStats::default(),
      controller: Controller::new("controller", geometry),
      positions: PositionGenerator::new("position_gen", geometry.out_size()),
      macs: MacArray::new("mac_array", geometry.filters),
      rescale: BiasRescale::new("bias_rescale", bank.biases().to_vec()),
      bank,
      down_req: Wire::default(),
      down_ready: false,
      up_resp: Wire::default(),
      down_req_ready: false,
      result: Wire::default(),
      result_taken: false,
      raster_done: false,
      up_req: Wire::default(),
      up_ready: false,
    })
  }

  pub fn from_store(name: impl Into<String>, layer: LayerId, store: &dyn WeightStore) -> Result<Self, ConfigError> {
    let table = store.table(layer).ok_or(ConfigError::MissingTable(layer))?;
    if table.layer != layer {
      return Err(ConfigError::LayerMismatch {
        expected: layer,
        found: table.layer,
      });
    }
    Self::new(name, table)
  }

  pub fn geometry(&self) -> LayerGeometry {
    self.geometry
  }

  pub fn stats(&self) -> LayerStats {
    self.stats
  }

  pub fn phase(&self) -> Phase {
    self.controller.phase()
  }

  pub fn is_idle(&self) -> bool {
    self.phase() == Phase::Idle
  }

  /// Advance one clock cycle.
  pub fn tick(&mut self) -> Result<(), ProtocolError> {
    self.run()
  }

  fn update_stats(&mut self) {
    let out = &self.controller.outputs;
    let state = self.controller.state();
    let stats = &mut self.stats;

    stats.cycles += 1;
    stats.accepted += out.down_req_ready as u64;
    stats.outputs += out.result_taken as u64;
    stats.accumulates += out.mac_operand.valid as u64;
    stats.clears += out.mac_clear as u64;
    stats.raster_completions += out.raster_done as u64;
    if state.phase == Phase::LoadWeight && state.pixel_pending() {
      stats.upstream_stall_cycles += 1;
    }
    if out.result.valid && !out.result_taken {
      stats.downstream_stall_cycles += 1;
    }
    stats.acc_saturations = self.macs.saturations();
    stats.rescale_saturations = self.rescale.saturations();
  }
}

impl Module for ConvLayer {
  type Error = ProtocolError;

  fn run(&mut self) -> Result<(), ProtocolError> {
    // external inputs are seen this cycle
    self.controller.inputs.down_req = self.down_req.clone();
    self.controller.inputs.down_ready = self.down_ready;
    self.controller.inputs.up_resp = self.up_resp.clone();

    // back to front, every unit reads what was latched last cycle
    self.rescale.run()?;
    self.macs.run()?;
    self.bank.run()?;
    self.positions.run()?;
    self.controller.run()?;

    // wiring: this cycle's outputs -> next cycle's inputs
    let out = &self.controller.outputs;
    self.positions.request = out.pos_req.clone();
    self.positions.advance = out.pos_advance;
    self.bank.req = out.weight_req.clone();
    self.macs.clear = out.mac_clear;
    self.macs.operand = out.mac_operand.clone();
    self.rescale.finalize = out.finalize;
    self.rescale.sums = self.macs.results();

    let inputs = &mut self.controller.inputs;
    inputs.tap = self.positions.tap.clone();
    inputs.raster_done = self.positions.raster_done;
    inputs.weights = self.bank.resp.clone();
    inputs.compute_done = self.macs.all_done();
    inputs.activations = relu_stage(&self.rescale.out);

    // external outputs
    let out = &self.controller.outputs;
    self.down_req_ready = out.down_req_ready;
    self.result = out.result.clone();
    self.result_taken = out.result_taken;
    self.raster_done = out.raster_done;
    self.up_req = out.up_req.clone();
    self.up_ready = out.up_ready;

    if self.result_taken {
      debug!(
        "{}: output ({}, {}) delivered",
        self.name, self.result.value.pos.row, self.result.value.pos.col
      );
    }
    self.update_stats();
    Ok(())
  }

  fn reset(&mut self) {
    self.controller.reset();
    self.positions.reset();
    self.bank.reset();
    self.macs.reset();
    self.rescale.reset();
    self.stats = LayerStats::default();
    self.down_req = Wire::default();
    self.down_ready = false;
    self.up_resp = Wire::default();
    self.down_req_ready = false;
    self.result = Wire::default();
    self.result_taken = false;
    self.raster_done = false;
    self.up_req = Wire::default();
    self.up_ready = false;
  }

  fn name(&self) -> &str {
    &self.name
  }
}
