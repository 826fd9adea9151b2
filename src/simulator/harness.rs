//! Cycle-level test bench: an upstream feature-map memory with a fixed
//! response latency and a downstream consumer that may withhold ready.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::arch::conv::{ConvLayer, ConvOutput, FeatureMap, LayerId, LayerStats, OutputPos, PixelAddr, Q6};
use crate::builtin::Wire;
use crate::simulator::error::SimError;

/// When the downstream consumer is ready to take a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyPolicy {
  Always,
  /// Ready on one cycle out of every `period`. A period of 0 or 1 is always ready.
  Periodic { period: u32 },
}

impl ReadyPolicy {
  pub fn from_period(period: u32) -> Self {
    if period <= 1 {
      ReadyPolicy::Always
    } else {
      ReadyPolicy::Periodic { period }
    }
  }

  pub fn ready(&self, cycle: u64) -> bool {
    match *self {
      ReadyPolicy::Periodic { period } if period > 1 => cycle % period as u64 == period as u64 - 1,
      _ => true,
    }
  }
}

#[derive(Debug, Clone)]
pub struct UpstreamSource {
  map: FeatureMap,
  latency: u32,
  inflight: Option<(PixelAddr, u32)>,
  presenting: Option<Q6>,
}

impl UpstreamSource {
  /// A pull seen at the end of cycle `t` is answered in cycle `t + 1 + latency`.
  pub fn new(map: FeatureMap, latency: u32) -> Self {
    Self {
      map,
      latency,
      inflight: None,
      presenting: None,
    }
  }

  fn lookup(&self, addr: PixelAddr) -> Result<Q6, SimError> {
    self.map.get(addr).ok_or(SimError::PixelOutOfRange { addr })
  }

  pub fn drive(&self, layer: &mut ConvLayer) {
    layer.up_resp = Wire::from_option(self.presenting);
  }

  pub fn observe(&mut self, layer: &ConvLayer) -> Result<(), SimError> {
    if layer.up_ready {
      self.presenting = None;
    }

    match self.inflight {
      Some((addr, 0)) => {
        self.presenting = Some(self.lookup(addr)?);
        self.inflight = None;
      },
      Some((addr, remaining)) => self.inflight = Some((addr, remaining - 1)),
      None => {
        if layer.up_req.valid && self.presenting.is_none() {
          let addr = layer.up_req.value;
          if self.latency == 0 {
            self.presenting = Some(self.lookup(addr)?);
          } else {
            self.inflight = Some((addr, self.latency - 1));
          }
        }
      },
    }
    Ok(())
  }
}

#[derive(Debug, Clone)]
pub struct DownstreamSink {
  pending: VecDeque<OutputPos>,
  expected: usize,
  policy: ReadyPolicy,
  results: Vec<ConvOutput>,
}

impl DownstreamSink {
  pub fn new(requests: impl IntoIterator<Item = OutputPos>, policy: ReadyPolicy) -> Self {
    let pending: VecDeque<OutputPos> = requests.into_iter().collect();
    Self {
      expected: pending.len(),
      pending,
      policy,
      results: Vec::new(),
    }
  }

  /// Every output position in row-major order.
  pub fn raster(out_size: usize, policy: ReadyPolicy) -> Self {
    Self::new(
      (0..out_size).flat_map(|row| (0..out_size).map(move |col| OutputPos::new(row, col))),
      policy,
    )
  }

  pub fn results(&self) -> &[ConvOutput] {
    &self.results
  }

  pub fn expected(&self) -> usize {
    self.expected
  }

  pub fn is_done(&self) -> bool {
    self.results.len() == self.expected
  }

  pub fn drive(&self, layer: &mut ConvLayer, cycle: u64) {
    layer.down_req = Wire::from_option(self.pending.front().copied());
    layer.down_ready = self.policy.ready(cycle);
  }

  pub fn observe(&mut self, layer: &ConvLayer) {
    if layer.down_req_ready {
      self.pending.pop_front();
    }
    if layer.result_taken {
      self.results.push(layer.result.value.clone());
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
  pub layer: LayerId,
  pub cycles: u64,
  /// Only available when the layer was driven directly.
  pub stats: Option<LayerStats>,
  pub outputs: Vec<ConvOutput>,
}

pub struct CycleHarness {
  pub layer: ConvLayer,
  pub source: UpstreamSource,
  pub sink: DownstreamSink,
  cycle: u64,
}

impl CycleHarness {
  pub fn new(layer: ConvLayer, source: UpstreamSource, sink: DownstreamSink) -> Self {
    Self {
      layer,
      source,
      sink,
      cycle: 0,
    }
  }

  pub fn cycle(&self) -> u64 {
    self.cycle
  }

  pub fn is_done(&self) -> bool {
    self.sink.is_done()
  }

  pub fn step(&mut self) -> Result<(), SimError> {
    self.source.drive(&mut self.layer);
    self.sink.drive(&mut self.layer, self.cycle);

    let cycle = self.cycle;
    self.layer.tick().map_err(|source| SimError::Protocol { cycle, source })?;

    self.source.observe(&self.layer)?;
    self.sink.observe(&self.layer);
    if self.layer.result_taken {
      let pos = self.layer.result.value.pos;
      debug!("cycle {}: result ({}, {})", cycle, pos.row, pos.col);
    }
    self.cycle += 1;
    Ok(())
  }

  /// Step until every requested output is delivered or `max_cycles` have run.
  pub fn run(&mut self, max_cycles: u64) -> Result<RunReport, SimError> {
    while !self.is_done() {
      if self.cycle >= max_cycles {
        return Err(SimError::Timeout {
          cycles: self.cycle,
          outputs: self.sink.results().len(),
          expected: self.sink.expected(),
        });
      }
      self.step()?;
    }
    info!(
      "{} outputs in {} cycles",
      self.sink.results().len(),
      self.cycle
    );
    Ok(self.report())
  }

  pub fn report(&self) -> RunReport {
    RunReport {
      layer: self.layer.geometry().layer,
      cycles: self.cycle,
      stats: Some(self.layer.stats()),
      outputs: self.sink.results().to_vec(),
    }
  }
}

/// Compute the whole output raster of `layer` over `map`.
pub fn run_raster(
  layer: ConvLayer,
  map: FeatureMap,
  latency: u32,
  policy: ReadyPolicy,
  max_cycles: u64,
) -> Result<RunReport, SimError> {
  map.check_shape(&layer.geometry())?;
  let sink = DownstreamSink::raster(layer.geometry().out_size(), policy);
  let mut harness = CycleHarness::new(layer, UpstreamSource::new(map, latency), sink);
  harness.run(max_cycles)
}
