//! Multiply-accumulate array, one unit per filter.
//!
//! Each unit is two registered stages: stage 1 latches the aligned product,
//! stage 2 folds it into the running sum. The running sum is wide and exact;
//! it is clamped into the 16-bit Q2.12 read-out register once, the cycle the
//! product tagged `last` lands, and `compute_done` is raised with it.

use log::warn;

use super::error::ProtocolError;
use super::fixed::{Q12, Q6};
use crate::builtin::{Module, Wire};

/// Cycles from an operand being issued to its `compute_done`.
pub const MAC_LATENCY: usize = 2;

/// One accumulate issue: a sample broadcast to every filter with that
/// filter's weight.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MacOperand {
  pub sample: Q6,
  pub weights: Vec<Q6>,
  pub last: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Product {
  value: i32,
  last: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MacUnit {
  product: Option<Product>,
  sum: i32,
  held: Q12,
  compute_done: bool,
  saturations: u64,
}

impl MacUnit {
  /// Next-cycle state for this unit given the clear strobe and its operand lane.
  fn step(&self, clear: bool, lane: Option<(Q6, Q6, bool)>) -> MacUnit {
    let mut next = self.clone();
    next.sum = if clear { 0 } else { self.sum };
    next.compute_done = false;

    if let Some(product) = self.product {
      next.sum = next.sum.saturating_add(product.value);
      if product.last {
        let (held, saturated) = Q12::saturate(next.sum);
        next.held = held;
        next.compute_done = true;
        if saturated {
          next.saturations += 1;
        }
      }
    }

    next.product = lane.map(|(sample, weight, last)| Product {
      value: sample.aligned_product(weight),
      last,
    });
    next
  }

  /// Exact running sum, in Q2.12 units.
  pub fn partial_sum(&self) -> i32 {
    self.sum
  }

  /// Read-out register: the last finished sum, clamped to Q2.12.
  pub fn held(&self) -> Q12 {
    self.held
  }

  pub fn compute_done(&self) -> bool {
    self.compute_done
  }

  pub fn in_flight(&self) -> bool {
    self.product.is_some()
  }
}

#[derive(Debug, Clone)]
pub struct MacArray {
  name: String,
  units: Vec<MacUnit>,

  // inputs
  pub clear: bool,
  pub operand: Wire<MacOperand>,
}

impl MacArray {
  pub fn new(name: impl Into<String>, filters: usize) -> Self {
    Self {
      name: name.into(),
      units: vec![MacUnit::default(); filters],
      clear: false,
      operand: Wire::default(),
    }
  }

  pub fn partial_sums(&self) -> Vec<i32> {
    self.units.iter().map(MacUnit::partial_sum).collect()
  }

  /// Finished sums, one per filter, as handed to the rescale stage.
  pub fn results(&self) -> Vec<Q12> {
    self.units.iter().map(MacUnit::held).collect()
  }

  /// AND of every unit's `compute_done`.
  pub fn all_done(&self) -> bool {
    !self.units.is_empty() && self.units.iter().all(MacUnit::compute_done)
  }

  pub fn in_flight(&self) -> bool {
    self.units.iter().any(MacUnit::in_flight)
  }

  /// Read-out clamps since power-on.
  pub fn saturations(&self) -> u64 {
    self.units.iter().map(|u| u.saturations).sum()
  }
}

impl Module for MacArray {
  type Error = ProtocolError;

  fn run(&mut self) -> Result<(), ProtocolError> {
    if self.clear && self.in_flight() {
      return Err(ProtocolError::ClearInFlight);
    }
    let operand = self.operand.get();
    if let Some(op) = operand {
      if op.weights.len() != self.units.len() {
        return Err(ProtocolError::OperandWidth {
          expected: self.units.len(),
          found: op.weights.len(),
        });
      }
    }

    let before = self.saturations();
    let next: Vec<MacUnit> = self
      .units
      .iter()
      .enumerate()
      .map(|(i, unit)| {
        let lane = operand.map(|op| (op.sample, op.weights[i], op.last));
        unit.step(self.clear, lane)
      })
      .collect();
    self.units = next;

    let clamped = self.saturations() - before;
    if clamped > 0 {
      warn!("{}: sum clamped to Q2.12 in {} lane(s)", self.name, clamped);
    }
    Ok(())
  }

  fn reset(&mut self) {
    let filters = self.units.len();
    self.units = vec![MacUnit::default(); filters];
    self.clear = false;
    self.operand = Wire::default();
  }

  fn name(&self) -> &str {
    &self.name
  }
}
