use serde::{Deserialize, Serialize};

use super::fixed::Q6;
use super::rescale::Rescaled;
use crate::builtin::Wire;

pub fn relu(x: Q6) -> Q6 {
  if x.is_negative() {
    Q6::ZERO
  } else {
    x
  }
}

/// Final values for one output position, before and after ReLU.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activations {
  pub pre: Vec<Q6>,
  pub post: Vec<Q6>,
}

/// ReLU applied lane-wise to the rescale stage output. Combinational.
pub fn relu_stage(input: &Wire<Rescaled>) -> Wire<Activations> {
  Wire::from_option(input.get().map(|r| Activations {
    pre: r.values.clone(),
    post: r.values.iter().copied().map(relu).collect(),
  }))
}
