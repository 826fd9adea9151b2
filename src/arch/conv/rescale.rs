//! Bias add and Q2.12 to Q1.6 rescale, one registered stage.

use log::warn;

use super::error::ProtocolError;
use super::fixed::{Q12, Q6};
use crate::builtin::{Module, Wire};

/// Pre-activation values for every filter, plus which of them clamped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rescaled {
  pub values: Vec<Q6>,
  pub saturated: Vec<bool>,
}

/// Add a Q1.6 bias to a Q2.12 sum and bring the result back to Q1.6.
pub fn bias_rescale(sum: Q12, bias: Q6) -> (Q6, bool) {
  let (biased, overflow) = sum.saturating_add(bias.widen());
  let (value, clamped) = biased.rescale();
  (value, overflow || clamped)
}

#[derive(Debug, Clone)]
pub struct BiasRescale {
  name: String,
  biases: Vec<Q6>,
  saturations: u64,

  // inputs
  pub finalize: bool,
  pub sums: Vec<Q12>,

  // outputs
  pub out: Wire<Rescaled>,
}

impl BiasRescale {
  pub fn new(name: impl Into<String>, biases: Vec<Q6>) -> Self {
    Self {
      name: name.into(),
      sums: vec![Q12::ZERO; biases.len()],
      biases,
      saturations: 0,
      finalize: false,
      out: Wire::default(),
    }
  }

  pub fn saturations(&self) -> u64 {
    self.saturations
  }
}

impl Module for BiasRescale {
  type Error = ProtocolError;

  fn run(&mut self) -> Result<(), ProtocolError> {
    if !self.finalize {
      self.out.clear();
      return Ok(());
    }
    if self.sums.len() != self.biases.len() {
      return Err(ProtocolError::OperandWidth {
        expected: self.biases.len(),
        found: self.sums.len(),
      });
    }

    let (values, saturated): (Vec<Q6>, Vec<bool>) = self
      .sums
      .iter()
      .zip(&self.biases)
      .map(|(&sum, &bias)| bias_rescale(sum, bias))
      .unzip();

    let clamped = saturated.iter().filter(|&&s| s).count();
    if clamped > 0 {
      warn!("{}: {} output(s) clamped to the Q1.6 range", self.name, clamped);
      self.saturations += clamped as u64;
    }
    self.out.set(Rescaled { values, saturated });
    Ok(())
  }

  fn reset(&mut self) {
    self.finalize = false;
    self.sums = vec![Q12::ZERO; self.biases.len()];
    self.out = Wire::default();
  }

  fn name(&self) -> &str {
    &self.name
  }
}
