//! Weight tables and feature maps supplied as files.

use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::arch::conv::layers::KERNEL_SIZE;
use crate::arch::conv::{ConfigError, FeatureMap, LayerId, Q6, WeightStore, WeightTable};
use crate::simulator::error::SimError;

/// Weight table as written in a TOML file.
///
/// ```toml
/// layer = "conv1"
/// words = ["17E804F706F7F8F5", ...]   # one hex word per (tap, channel)
/// biases = [0, 9, 0, 0, 7, 0, 0, 4]
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WeightFile {
  pub layer: LayerId,
  #[serde(default = "default_kernel_size")]
  pub kernel_size: usize,
  pub words: Vec<String>,
  pub biases: Vec<i64>,
}

fn default_kernel_size() -> usize {
  KERNEL_SIZE
}

fn read(path: &Path) -> Result<String, SimError> {
  fs::read_to_string(path).map_err(|e| SimError::Parse {
    path: path.display().to_string(),
    message: e.to_string(),
  })
}

fn parse_word(word: &str) -> Result<u128, ConfigError> {
  let digits: String = word.trim().trim_start_matches("0x").chars().filter(|&c| c != '_').collect();
  u128::from_str_radix(&digits, 16).map_err(|e| ConfigError::BadWord {
    word: word.to_string(),
    reason: e.to_string(),
  })
}

impl WeightFile {
  pub fn parse(content: &str) -> Result<Self, SimError> {
    toml::from_str(content).map_err(|e| SimError::Parse {
      path: "<inline>".to_string(),
      message: e.to_string(),
    })
  }

  pub fn load(path: &Path) -> Result<Self, SimError> {
    let file: WeightFile = toml::from_str(&read(path)?).map_err(|e| SimError::Parse {
      path: path.display().to_string(),
      message: e.to_string(),
    })?;
    info!("loaded {} weight words for {} from {}", file.words.len(), file.layer, path.display());
    Ok(file)
  }

  pub fn to_table(&self) -> Result<WeightTable, ConfigError> {
    let words = self
      .words
      .iter()
      .map(|w| parse_word(w))
      .collect::<Result<Vec<_>, _>>()?;
    let biases = self
      .biases
      .iter()
      .enumerate()
      .map(|(filter, &value)| {
        i8::try_from(value)
          .map(Q6)
          .map_err(|_| ConfigError::BadBias { filter, value })
      })
      .collect::<Result<Vec<_>, _>>()?;
    Ok(WeightTable {
      layer: self.layer,
      kernel_size: self.kernel_size,
      words,
      biases,
    })
  }
}

/// A file that fails to decode offers no table; use `to_table` to see why.
impl WeightStore for WeightFile {
  fn table(&self, _layer: LayerId) -> Option<WeightTable> {
    self.to_table().ok()
  }
}

/// Load a feature map from `.json` or `.toml` (`size`, `channels`, `values`).
pub fn load_feature_map(path: &Path) -> Result<FeatureMap, SimError> {
  let content = read(path)?;
  let map: FeatureMap = match path.extension().and_then(|e| e.to_str()) {
    Some("json") => serde_json::from_str(&content)?,
    _ => toml::from_str(&content).map_err(|e| SimError::Parse {
      path: path.display().to_string(),
      message: e.to_string(),
    })?,
  };
  map.check_length()?;
  Ok(map)
}
