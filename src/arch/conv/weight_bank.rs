//! Weight and bias storage addressed by (tap, channel).
//!
//! One packed word per address holds every filter's weight for that tap and
//! channel, filter 0 in the most significant byte.

use log::{debug, trace};

use super::error::{ConfigError, ProtocolError};
use super::fixed::Q6;
use super::layers::{LayerGeometry, LayerId, KERNEL_SIZE, MAX_FILTERS, TAPS};
use crate::builtin::{Module, Wire};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WeightAddr {
  pub kernel_row: usize,
  pub kernel_col: usize,
  pub channel: usize,
}

/// Packed weights and biases for one layer, as handed over by the weight supplier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightTable {
  pub layer: LayerId,
  pub kernel_size: usize,
  pub words: Vec<u128>,
  pub biases: Vec<Q6>,
}

/// Source of weight tables, resolved once when a layer is built.
pub trait WeightStore {
  fn table(&self, layer: LayerId) -> Option<WeightTable>;
}

/// Reference tables shipped with the crate. Only conv1 has one.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinWeights;

const CONV1_WORDS: [u128; 9] = [
  0x17E8_04F7_06F7_F8F5,
  0x16F6_14FC_09EF_ED0E,
  0x10FA_19F6_F0EF_FEF5,
  0x0205_12F3_1615_F116,
  0x0E01_FDF8_13FD_0508,
  0xF6FB_11FD_E904_0405,
  0x0413_0211_1406_04FE,
  0xE711_FF08_FC0C_0D0A,
  0xEB05_FC07_F401_F4F2,
];
const CONV1_BIASES: [i8; 8] = [0x00, 0x09, 0x00, 0x00, 0x07, 0x00, 0x00, 0x04];

impl WeightStore for BuiltinWeights {
  fn table(&self, layer: LayerId) -> Option<WeightTable> {
    match layer {
      LayerId::Conv1 => Some(WeightTable {
        layer,
        kernel_size: KERNEL_SIZE,
        words: CONV1_WORDS.to_vec(),
        biases: CONV1_BIASES.iter().map(|&b| Q6(b)).collect(),
      }),
      LayerId::Conv2 => None,
    }
  }
}

/// A single supplied table. Handing it to the wrong layer is caught by
/// `from_store`.
impl WeightStore for WeightTable {
  fn table(&self, _layer: LayerId) -> Option<WeightTable> {
    Some(self.clone())
  }
}

/// Pack one weight per filter into a word, filter 0 in the top byte.
pub fn pack_word(weights: &[Q6]) -> u128 {
  weights
    .iter()
    .fold(0u128, |word, w| (word << 8) | (w.0 as u8) as u128)
}

pub fn unpack_word(word: u128, filters: usize) -> Vec<Q6> {
  (0..filters)
    .map(|f| {
      let shift = (filters - 1 - f) * 8;
      Q6(((word >> shift) & 0xFF) as u8 as i8)
    })
    .collect()
}

impl WeightTable {
  /// Build a table from per-filter kernels.
  ///
  /// `kernels[f]` lists filter `f`'s weights in bank address order
  /// (tap-major, channel inner). Missing entries are zero.
  pub fn from_kernels(layer: LayerId, kernels: &[Vec<Q6>], biases: Vec<Q6>) -> Self {
    let geometry = layer.geometry();
    let words = (0..geometry.weight_words())
      .map(|address| {
        let lane: Vec<Q6> = (0..geometry.filters)
          .map(|f| {
            kernels
              .get(f)
              .and_then(|k| k.get(address))
              .copied()
              .unwrap_or(Q6::ZERO)
          })
          .collect();
        pack_word(&lane)
      })
      .collect();
    Self {
      layer,
      kernel_size: KERNEL_SIZE,
      words,
      biases,
    }
  }

  /// A table whose weights are all zero.
  pub fn zeros(layer: LayerId, biases: Vec<Q6>) -> Self {
    Self::from_kernels(layer, &[], biases)
  }
}

/// Weight bank with a one-cycle read: a request latched this cycle is
/// answered on `resp` next cycle (`valid` doubles as load-done).
#[derive(Debug, Clone)]
pub struct WeightBank {
  name: String,
  geometry: LayerGeometry,
  rows: Vec<Vec<Q6>>,
  biases: Vec<Q6>,

  pub req: Wire<WeightAddr>,
  pub resp: Wire<Vec<Q6>>,
}

impl WeightBank {
  pub fn new(name: impl Into<String>, table: WeightTable) -> Result<Self, ConfigError> {
    let geometry = table.layer.geometry();
    let layer = table.layer;

    if table.kernel_size != KERNEL_SIZE {
      return Err(ConfigError::UnsupportedKernel(table.kernel_size));
    }
    if geometry.filters > MAX_FILTERS {
      return Err(ConfigError::TooManyFilters {
        layer,
        filters: geometry.filters,
      });
    }
    if table.biases.len() != geometry.filters {
      return Err(ConfigError::FilterBiasMismatch {
        layer,
        filters: geometry.filters,
        biases: table.biases.len(),
      });
    }
    if table.words.len() != geometry.weight_words() {
      return Err(ConfigError::WordCountMismatch {
        layer,
        expected: geometry.weight_words(),
        found: table.words.len(),
      });
    }
    let used_bits = geometry.filters * 8;
    if let Some(address) = table
      .words
      .iter()
      .position(|&w| used_bits < 128 && (w >> used_bits) != 0)
    {
      return Err(ConfigError::WordOverflow {
        layer,
        address,
        filters: geometry.filters,
      });
    }

    let rows = table
      .words
      .iter()
      .map(|&w| unpack_word(w, geometry.filters))
      .collect();
    debug!(
      "weight bank for {}: {} words, {} filters",
      layer,
      table.words.len(),
      geometry.filters
    );

    Ok(Self {
      name: name.into(),
      geometry,
      rows,
      biases: table.biases,
      req: Wire::default(),
      resp: Wire::default(),
    })
  }

  /// Look the layer up in a store and build its bank.
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

  pub fn biases(&self) -> &[Q6] {
    &self.biases
  }

  /// Word address: tap-major, channel inner.
  pub fn address(&self, tap: usize, channel: usize) -> usize {
    tap * self.geometry.in_channels + channel
  }

  /// Read by kernel offset instead of tap index.
  pub fn lookup(&self, kernel_row: usize, kernel_col: usize, channel: usize) -> Result<&[Q6], ProtocolError> {
    if kernel_row >= KERNEL_SIZE || kernel_col >= KERNEL_SIZE {
      return Err(ProtocolError::WeightAddressOutOfRange {
        tap: kernel_row * KERNEL_SIZE + kernel_col,
        channel,
      });
    }
    self.fetch(kernel_row * KERNEL_SIZE + kernel_col, channel)
  }

  /// Direct read, bypassing the request wire.
  pub fn fetch(&self, tap: usize, channel: usize) -> Result<&[Q6], ProtocolError> {
    if tap >= TAPS || channel >= self.geometry.in_channels {
      return Err(ProtocolError::WeightAddressOutOfRange { tap, channel });
    }
    Ok(&self.rows[self.address(tap, channel)])
  }
}

impl Module for WeightBank {
  type Error = ProtocolError;

  fn run(&mut self) -> Result<(), ProtocolError> {
    if self.req.valid {
      let WeightAddr {
        kernel_row,
        kernel_col,
        channel,
      } = self.req.value;
      let row = self.lookup(kernel_row, kernel_col, channel)?.to_vec();
      trace!("{}: load ({}, {}) channel={}", self.name, kernel_row, kernel_col, channel);
      self.resp.set(row);
    } else {
      self.resp.clear();
    }
    Ok(())
  }

  fn reset(&mut self) {
    self.req = Wire::default();
    self.resp = Wire::default();
  }

  fn name(&self) -> &str {
    &self.name
  }
}
