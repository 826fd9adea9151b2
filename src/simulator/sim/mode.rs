use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::simulator::error::SimError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
  /// Drive the layer directly, one `tick` per cycle.
  Cycle,
  /// Run the layer inside the discrete-event simulation.
  Event,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
  Continuous,
  Step,
}

impl FromStr for RunMode {
  type Err = SimError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "cycle" => Ok(RunMode::Cycle),
      "event" => Ok(RunMode::Event),
      other => Err(SimError::Settings(format!("unknown run mode: {}", other))),
    }
  }
}

impl StepMode {
  pub fn from_flag(step: bool) -> Self {
    if step {
      StepMode::Step
    } else {
      StepMode::Continuous
    }
  }
}
