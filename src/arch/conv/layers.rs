use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::ConfigError;

pub const KERNEL_SIZE: usize = 3;
pub const TAPS: usize = KERNEL_SIZE * KERNEL_SIZE;
/// Widest packed weight word, one byte per filter.
pub const MAX_FILTERS: usize = 16;

/// The closed set of layer configurations the pipeline can be built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerId {
  Conv1,
  Conv2,
}

/// Shape of one convolution layer, fixed once the pipeline is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerGeometry {
  pub layer: LayerId,
  pub image_size: usize,
  pub in_channels: usize,
  pub filters: usize,
  pub kernel_size: usize,
}

impl LayerId {
  pub fn geometry(self) -> LayerGeometry {
    match self {
      LayerId::Conv1 => LayerGeometry {
        layer: self,
        image_size: 28,
        in_channels: 1,
        filters: 8,
        kernel_size: KERNEL_SIZE,
      },
      LayerId::Conv2 => LayerGeometry {
        layer: self,
        image_size: 13,
        in_channels: 8,
        filters: 16,
        kernel_size: KERNEL_SIZE,
      },
    }
  }
}

impl LayerGeometry {
  pub fn out_size(&self) -> usize {
    self.image_size - self.kernel_size + 1
  }

  pub fn positions(&self) -> usize {
    self.out_size() * self.out_size()
  }

  /// Accumulate cycles needed for one output position.
  pub fn accumulates_per_position(&self) -> usize {
    TAPS * self.in_channels
  }

  /// Packed weight words the bank must hold, one per (tap, channel).
  pub fn weight_words(&self) -> usize {
    TAPS * self.in_channels
  }
}

impl fmt::Display for LayerId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LayerId::Conv1 => write!(f, "conv1"),
      LayerId::Conv2 => write!(f, "conv2"),
    }
  }
}

impl FromStr for LayerId {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "conv1" => Ok(LayerId::Conv1),
      "conv2" => Ok(LayerId::Conv2),
      other => Err(ConfigError::UnknownLayer(other.to_string())),
    }
  }
}
