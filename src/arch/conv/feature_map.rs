use serde::{Deserialize, Serialize};

use super::controller::PixelAddr;
use super::error::ConfigError;
use super::fixed::Q6;
use super::layers::LayerGeometry;

/// Input activations held by the upstream collaborator, row-major with the
/// channel innermost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureMap {
  pub size: usize,
  pub channels: usize,
  pub values: Vec<Q6>,
}

impl FeatureMap {
  pub fn new(size: usize, channels: usize, values: Vec<Q6>) -> Result<Self, ConfigError> {
    let map = Self {
      size,
      channels,
      values,
    };
    map.check_length()?;
    Ok(map)
  }

  /// `base + row + col + channel`, saturating.
  pub fn ramp(size: usize, channels: usize, base: i8) -> Self {
    let mut values = Vec::with_capacity(size * size * channels);
    for row in 0..size {
      for col in 0..size {
        for ch in 0..channels {
          values.push(Q6::saturate(base as i32 + (row + col + ch) as i32).0);
        }
      }
    }
    Self {
      size,
      channels,
      values,
    }
  }

  pub fn check_length(&self) -> Result<(), ConfigError> {
    let expected = self.size * self.size * self.channels;
    if self.values.len() != expected {
      return Err(ConfigError::InputLength {
        expected,
        found: self.values.len(),
      });
    }
    Ok(())
  }

  pub fn check_shape(&self, geometry: &LayerGeometry) -> Result<(), ConfigError> {
    if self.size != geometry.image_size || self.channels != geometry.in_channels {
      return Err(ConfigError::InputShape {
        layer: geometry.layer,
        size: self.size,
        channels: self.channels,
        expected_size: geometry.image_size,
        expected_channels: geometry.in_channels,
      });
    }
    self.check_length()
  }

  pub fn get(&self, addr: PixelAddr) -> Option<Q6> {
    if addr.row >= self.size || addr.col >= self.size || addr.channel >= self.channels {
      return None;
    }
    self
      .values
      .get((addr.row * self.size + addr.col) * self.channels + addr.channel)
      .copied()
  }
}
