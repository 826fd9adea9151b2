//! Per-position sequencing and the two external handshakes.
//!
//! Downstream pushes output positions in and takes results out. Upstream is
//! pulled for one sample per (tap, channel). In between, the controller walks
//! the weight bank and the MAC array through nine taps times every channel.
//!
//! The controller is a pure next-state function over registered inputs:
//! `next` reads the current state and the wires latched last cycle and
//! returns the state and outputs for this cycle. `run` commits them.

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use super::error::ProtocolError;
use super::fixed::Q6;
use super::layers::LayerGeometry;
use super::mac::MacOperand;
use super::position::{OutputPos, Tap};
use super::relu::Activations;
use super::weight_bank::WeightAddr;
use crate::builtin::{Module, Wire};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
  Idle,
  LoadWeight,
  Accumulate,
  /// Last operand issued, waiting for every lane's `compute_done`.
  Drain,
  Finalize,
  OutputReady,
}

/// Address of one input sample requested from upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PixelAddr {
  pub row: usize,
  pub col: usize,
  pub channel: usize,
}

/// Result for one output position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvOutput {
  pub pos: OutputPos,
  /// After ReLU, one per filter.
  pub activations: Vec<Q6>,
  /// Before ReLU.
  pub pre_activation: Vec<Q6>,
}

#[derive(Debug, Clone, Default)]
pub struct ControllerInputs {
  // downstream
  pub down_req: Wire<OutputPos>,
  pub down_ready: bool,
  // upstream
  pub up_resp: Wire<Q6>,
  // internal
  pub tap: Wire<Tap>,
  pub raster_done: bool,
  pub weights: Wire<Vec<Q6>>,
  pub compute_done: bool,
  pub activations: Wire<Activations>,
}

#[derive(Debug, Clone, Default)]
pub struct ControllerOutputs {
  // downstream
  pub down_req_ready: bool,
  pub result: Wire<ConvOutput>,
  pub result_taken: bool,
  /// With `result_taken`: this result completes the output raster.
  pub raster_done: bool,
  // upstream
  pub up_req: Wire<PixelAddr>,
  pub up_ready: bool,
  // internal
  pub pos_req: Wire<OutputPos>,
  pub pos_advance: bool,
  pub weight_req: Wire<WeightAddr>,
  pub mac_clear: bool,
  pub mac_operand: Wire<MacOperand>,
  pub finalize: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerState {
  pub phase: Phase,
  pub pos: OutputPos,
  pub tap: usize,
  pub channel: usize,
  pub issued: usize,
  /// The generator flagged the current tap as the last of the sweep.
  tap_last: bool,
  /// The generator finished the raster during this position.
  closes_raster: bool,
  weights: Option<Vec<Q6>>,
  sample: Option<Q6>,
  weight_pending: bool,
  pixel: Option<PixelAddr>,
  result: Option<ConvOutput>,
  /// Downstream request seen last cycle and not yet accepted.
  offered: Option<OutputPos>,
}

impl Default for ControllerState {
  fn default() -> Self {
    Self {
      phase: Phase::Idle,
      pos: OutputPos::default(),
      tap: 0,
      channel: 0,
      issued: 0,
      tap_last: false,
      closes_raster: false,
      weights: None,
      sample: None,
      weight_pending: false,
      pixel: None,
      result: None,
      offered: None,
    }
  }
}

impl ControllerState {
  /// Waiting on an upstream sample.
  pub fn pixel_pending(&self) -> bool {
    self.pixel.is_some()
  }
}

#[derive(Debug, Clone)]
pub struct Controller {
  name: String,
  geometry: LayerGeometry,
  state: ControllerState,

  pub inputs: ControllerInputs,
  pub outputs: ControllerOutputs,
}

impl Controller {
  pub fn new(name: impl Into<String>, geometry: LayerGeometry) -> Self {
    Self {
      name: name.into(),
      geometry,
      state: ControllerState::default(),
      inputs: ControllerInputs::default(),
      outputs: ControllerOutputs::default(),
    }
  }

  pub fn state(&self) -> &ControllerState {
    &self.state
  }

  pub fn phase(&self) -> Phase {
    self.state.phase
  }

  /// Compute this cycle's state and outputs without committing them.
  pub fn next(&self) -> Result<(ControllerState, ControllerOutputs), ProtocolError> {
    let inputs = &self.inputs;
    let cur = &self.state;
    let mut s = cur.clone();
    let mut o = ControllerOutputs::default();

    if let Some(offered) = cur.offered {
      if !inputs.down_req.valid || inputs.down_req.value != offered {
        return Err(ProtocolError::RequestWithdrawn { pos: offered });
      }
    }

    if inputs.up_resp.valid {
      if !cur.pixel_pending() {
        return Err(ProtocolError::UnsolicitedSample);
      }
      trace!("{}: sample {} captured", self.name, inputs.up_resp.value);
      s.sample = Some(inputs.up_resp.value);
      s.pixel = None;
      o.up_ready = true;
    }

    if inputs.weights.valid {
      if !cur.weight_pending {
        return Err(ProtocolError::UnsolicitedWeights);
      }
      s.weights = Some(inputs.weights.value.clone());
      s.weight_pending = false;
    }

    if inputs.raster_done {
      debug!("{}: raster complete at ({}, {})", self.name, cur.pos.row, cur.pos.col);
      s.closes_raster = true;
    }

    let mut accepted = false;
    match cur.phase {
      Phase::Idle => {
        accepted = self.accept(&mut s, &mut o)?;
      },
      Phase::LoadWeight => {
        if let Some(tap) = inputs.tap.get().filter(|t| t.index == cur.tap) {
          s.tap_last = tap.last;
          if s.weights.is_none() && !s.weight_pending {
            o.weight_req.set(WeightAddr {
              kernel_row: tap.kernel_row,
              kernel_col: tap.kernel_col,
              channel: cur.channel,
            });
            s.weight_pending = true;
          }
          if s.sample.is_none() && s.pixel.is_none() {
            s.pixel = Some(PixelAddr {
              row: tap.in_row,
              col: tap.in_col,
              channel: cur.channel,
            });
          }
        }
        if s.weights.is_some() && s.sample.is_some() {
          s.phase = Phase::Accumulate;
        }
      },
      Phase::Accumulate => {
        let (weights, sample) = match (s.weights.take(), s.sample.take()) {
          (Some(w), Some(x)) => (w, x),
          _ => return Err(ProtocolError::OperandNotReady),
        };
        let channels = self.geometry.in_channels;
        let last_channel = cur.channel + 1 == channels;
        let last_tap = cur.tap_last;

        o.mac_operand.set(MacOperand {
          sample,
          weights,
          last: last_channel && last_tap,
        });
        s.issued += 1;

        if !last_channel {
          s.channel += 1;
          s.phase = Phase::LoadWeight;
        } else {
          s.channel = 0;
          o.pos_advance = true;
          if last_tap {
            s.phase = Phase::Drain;
          } else {
            s.tap += 1;
            s.tap_last = false;
            s.phase = Phase::LoadWeight;
          }
        }
      },
      Phase::Drain => {
        if inputs.compute_done {
          let expected = self.geometry.accumulates_per_position();
          if cur.issued != expected {
            return Err(ProtocolError::AccumulateCount {
              expected,
              found: cur.issued,
            });
          }
          o.finalize = true;
          s.phase = Phase::Finalize;
        }
      },
      Phase::Finalize => {
        if let Some(act) = inputs.activations.get() {
          debug!("{}: position ({}, {}) finalized", self.name, cur.pos.row, cur.pos.col);
          s.result = Some(ConvOutput {
            pos: cur.pos,
            activations: act.post.clone(),
            pre_activation: act.pre.clone(),
          });
          s.phase = Phase::OutputReady;
        }
      },
      Phase::OutputReady => {
        o.result = Wire::from_option(cur.result.clone());
        if inputs.down_ready {
          o.result_taken = true;
          o.raster_done = cur.closes_raster;
          s.result = None;
          s.closes_raster = false;
          s.phase = Phase::Idle;
          accepted = self.accept(&mut s, &mut o)?;
        }
      },
    }

    if let Some(pixel) = s.pixel {
      o.up_req.set(pixel);
    }
    s.offered = if inputs.down_req.valid && !accepted {
      Some(inputs.down_req.value)
    } else {
      None
    };
    Ok((s, o))
  }

  /// Take a downstream request if one is offered. Starts a new position.
  fn accept(&self, s: &mut ControllerState, o: &mut ControllerOutputs) -> Result<bool, ProtocolError> {
    let pos = match self.inputs.down_req.get() {
      Some(&pos) => pos,
      None => return Ok(false),
    };
    let out_size = self.geometry.out_size();
    if pos.row >= out_size || pos.col >= out_size {
      return Err(ProtocolError::PositionOutOfRange { pos, out_size });
    }

    trace!("{}: accept ({}, {})", self.name, pos.row, pos.col);
    *s = ControllerState {
      phase: Phase::LoadWeight,
      pos,
      ..ControllerState::default()
    };
    o.down_req_ready = true;
    o.mac_clear = true;
    o.pos_req.set(pos);
    Ok(true)
  }
}

impl Module for Controller {
  type Error = ProtocolError;

  fn run(&mut self) -> Result<(), ProtocolError> {
    let (state, outputs) = self.next()?;
    self.state = state;
    self.outputs = outputs;
    Ok(())
  }

  fn reset(&mut self) {
    self.state = ControllerState::default();
    self.inputs = ControllerInputs::default();
    self.outputs = ControllerOutputs::default();
  }

  fn name(&self) -> &str {
    &self.name
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::conv::layers::LayerId;

  fn controller() -> Controller {
    Controller::new("ctrl", LayerId::Conv1.geometry())
  }

  fn tap(index: usize) -> Wire<Tap> {
    Wire::driven(Tap {
      index,
      kernel_row: index / 3,
      kernel_col: index % 3,
      in_row: index / 3,
      in_col: index % 3,
      last: index == 8,
    })
  }

  #[test]
  fn test_accept_pulses_clear_once() {
    let mut ctrl = controller();
    ctrl.inputs.down_req.set(OutputPos::new(0, 0));
    ctrl.run().unwrap();
    assert!(ctrl.outputs.down_req_ready);
    assert!(ctrl.outputs.mac_clear);
    assert_eq!(ctrl.outputs.pos_req.get(), Some(&OutputPos::new(0, 0)));
    assert_eq!(ctrl.phase(), Phase::LoadWeight);

    ctrl.inputs.down_req.clear();
    ctrl.run().unwrap();
    assert!(!ctrl.outputs.mac_clear);
    assert!(!ctrl.outputs.down_req_ready);
  }

  #[test]
  fn test_next_is_pure() {
    let mut ctrl = controller();
    ctrl.inputs.down_req.set(OutputPos::new(2, 3));
    let (a, _) = ctrl.next().unwrap();
    let (b, _) = ctrl.next().unwrap();
    assert_eq!(a, b);
    assert_eq!(ctrl.phase(), Phase::Idle);
  }

  #[test]
  fn test_out_of_range_request() {
    let mut ctrl = controller();
    ctrl.inputs.down_req.set(OutputPos::new(0, 26));
    assert_eq!(
      ctrl.run(),
      Err(ProtocolError::PositionOutOfRange {
        pos: OutputPos::new(0, 26),
        out_size: 26
      })
    );
  }

  #[test]
  fn test_no_accumulate_before_both_operands() {
    let mut ctrl = controller();
    ctrl.inputs.down_req.set(OutputPos::new(0, 0));
    ctrl.run().unwrap();
    ctrl.inputs.down_req.clear();

    ctrl.inputs.tap = tap(0);
    ctrl.run().unwrap();
    assert!(ctrl.outputs.weight_req.valid);
    assert_eq!(ctrl.outputs.up_req.get(), Some(&PixelAddr { row: 0, col: 0, channel: 0 }));

    // weights arrive, sample does not: stay put
    ctrl.inputs.weights.set(vec![Q6(1); 8]);
    ctrl.run().unwrap();
    ctrl.inputs.weights.clear();
    for _ in 0..4 {
      ctrl.run().unwrap();
      assert_eq!(ctrl.phase(), Phase::LoadWeight);
      assert!(!ctrl.outputs.mac_operand.valid);
      assert!(ctrl.outputs.up_req.valid);
    }

    ctrl.inputs.up_resp.set(Q6(5));
    ctrl.run().unwrap();
    ctrl.inputs.up_resp.clear();
    assert!(ctrl.outputs.up_ready);
    assert!(!ctrl.outputs.up_req.valid);
    assert_eq!(ctrl.phase(), Phase::Accumulate);

    ctrl.run().unwrap();
    let op = ctrl.outputs.mac_operand.get().unwrap();
    assert_eq!(op.sample, Q6(5));
    assert!(!op.last);
    assert!(ctrl.outputs.pos_advance);
    assert_eq!(ctrl.state().tap, 1);
  }

  #[test]
  fn test_unsolicited_sample() {
    let mut ctrl = controller();
    ctrl.inputs.up_resp.set(Q6(1));
    assert_eq!(ctrl.run(), Err(ProtocolError::UnsolicitedSample));
  }

  #[test]
  fn test_withdrawn_request() {
    let mut ctrl = controller();
    ctrl.inputs.down_req.set(OutputPos::new(0, 0));
    ctrl.run().unwrap();
    // busy: the next request waits
    ctrl.inputs.down_req.set(OutputPos::new(0, 1));
    ctrl.run().unwrap();
    assert!(!ctrl.outputs.down_req_ready);

    ctrl.inputs.down_req.set(OutputPos::new(1, 1));
    assert_eq!(
      ctrl.run(),
      Err(ProtocolError::RequestWithdrawn {
        pos: OutputPos::new(0, 1)
      })
    );
  }

  /// Accept (0, 0) and present one tap with both operands.
  fn feed_tap(ctrl: &mut Controller, tap: Wire<Tap>) {
    ctrl.inputs.tap = tap;
    ctrl.run().unwrap();
    ctrl.inputs.weights.set(vec![Q6(1); 8]);
    ctrl.inputs.up_resp.set(Q6(2));
    ctrl.run().unwrap();
    ctrl.inputs.weights.clear();
    ctrl.inputs.up_resp.clear();
    assert_eq!(ctrl.phase(), Phase::Accumulate);
    ctrl.run().unwrap();
  }

  #[test]
  fn test_tap_done_ends_sweep() {
    let mut ctrl = controller();
    ctrl.inputs.down_req.set(OutputPos::new(0, 0));
    ctrl.run().unwrap();
    ctrl.inputs.down_req.clear();

    // the generator marks the very first tap as last
    let mut early = tap(0);
    early.value.last = true;
    feed_tap(&mut ctrl, early);
    assert!(ctrl.outputs.mac_operand.get().unwrap().last);
    assert!(ctrl.outputs.pos_advance);
    assert_eq!(ctrl.phase(), Phase::Drain);

    ctrl.inputs.tap.clear();
    ctrl.inputs.compute_done = true;
    assert_eq!(
      ctrl.run(),
      Err(ProtocolError::AccumulateCount { expected: 9, found: 1 })
    );
  }

  #[test]
  fn test_sweep_continues_until_tap_done() {
    let mut ctrl = controller();
    ctrl.inputs.down_req.set(OutputPos::new(0, 0));
    ctrl.run().unwrap();
    ctrl.inputs.down_req.clear();

    for index in 0..9 {
      feed_tap(&mut ctrl, tap(index));
      assert_eq!(ctrl.outputs.mac_operand.get().unwrap().last, index == 8);
      let expected = if index == 8 { Phase::Drain } else { Phase::LoadWeight };
      assert_eq!(ctrl.phase(), expected);
    }
    assert_eq!(ctrl.state().issued, 9);
  }

  #[test]
  fn test_raster_done_reported_with_result() {
    let mut ctrl = controller();
    ctrl.inputs.down_req.set(OutputPos::new(25, 25));
    ctrl.run().unwrap();
    ctrl.inputs.down_req.clear();
    for index in 0..9 {
      feed_tap(&mut ctrl, tap(index));
    }
    ctrl.inputs.tap.clear();

    ctrl.inputs.raster_done = true;
    ctrl.run().unwrap();
    ctrl.inputs.raster_done = false;
    assert_eq!(ctrl.phase(), Phase::Drain);

    ctrl.inputs.compute_done = true;
    ctrl.run().unwrap();
    ctrl.inputs.compute_done = false;
    assert!(ctrl.outputs.finalize);

    ctrl.inputs.activations.set(Activations {
      pre: vec![Q6(-1); 8],
      post: vec![Q6::ZERO; 8],
    });
    ctrl.run().unwrap();
    ctrl.inputs.activations.clear();
    assert_eq!(ctrl.phase(), Phase::OutputReady);

    ctrl.run().unwrap();
    assert!(ctrl.outputs.result.valid);
    assert!(!ctrl.outputs.result_taken);

    ctrl.inputs.down_ready = true;
    ctrl.run().unwrap();
    assert!(ctrl.outputs.result_taken);
    assert!(ctrl.outputs.raster_done);
    assert_eq!(ctrl.phase(), Phase::Idle);

    // the flag belongs to that one result
    ctrl.inputs.down_req.set(OutputPos::new(0, 0));
    ctrl.run().unwrap();
    assert!(!ctrl.outputs.raster_done);
    assert!(!ctrl.state().closes_raster);
  }
}
