use thiserror::Error;

use super::layers::LayerId;
use super::position::OutputPos;

/// Rejected layer configuration. Raised while building, never at run time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
  #[error("unsupported kernel size {0}, only 3x3 kernels are supported")]
  UnsupportedKernel(usize),

  #[error("layer {layer}: {filters} filters but the bias table holds {biases} entries")]
  FilterBiasMismatch { layer: LayerId, filters: usize, biases: usize },

  #[error("layer {layer}: expected {expected} weight words, found {found}")]
  WordCountMismatch { layer: LayerId, expected: usize, found: usize },

  #[error("layer {layer}: {filters} filters do not fit a 128-bit weight word")]
  TooManyFilters { layer: LayerId, filters: usize },

  #[error("layer {layer}: weight word at address {address} has bits above filter {filters}")]
  WordOverflow { layer: LayerId, address: usize, filters: usize },

  #[error("invalid weight word {word:?}: {reason}")]
  BadWord { word: String, reason: String },

  #[error("bias {value} at filter {filter} is outside the Q1.6 range")]
  BadBias { filter: usize, value: i64 },

  #[error("no weight table available for layer {0}")]
  MissingTable(LayerId),

  #[error("weight table for layer {found} supplied to layer {expected}")]
  LayerMismatch { expected: LayerId, found: LayerId },

  #[error("unknown layer {0:?}, expected conv1 or conv2")]
  UnknownLayer(String),

  #[error("input is {size}x{size}x{channels}, layer {layer} expects {expected_size}x{expected_size}x{expected_channels}")]
  InputShape {
    layer: LayerId,
    size: usize,
    channels: usize,
    expected_size: usize,
    expected_channels: usize,
  },

  #[error("feature map holds {found} values, {expected} expected")]
  InputLength { expected: usize, found: usize },
}

/// A handshake or sequencing rule broken by a collaborator or by the datapath.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
  #[error("output position ({}, {}) outside the {out_size}x{out_size} raster", .pos.row, .pos.col)]
  PositionOutOfRange { pos: OutputPos, out_size: usize },

  #[error("downstream request for ({}, {}) withdrawn before it was accepted", .pos.row, .pos.col)]
  RequestWithdrawn { pos: OutputPos },

  #[error("upstream asserted data-valid with no pixel request outstanding")]
  UnsolicitedSample,

  #[error("weight bank answered with no weight request outstanding")]
  UnsolicitedWeights,

  #[error("accumulate issued before weight and sample were both valid")]
  OperandNotReady,

  #[error("accumulator clear while a product is still in flight")]
  ClearInFlight,

  #[error("operand carries {found} lanes, datapath has {expected} filters")]
  OperandWidth { expected: usize, found: usize },

  #[error("position generator received a new position while sweeping")]
  RequestWhileBusy,

  #[error("position generator advanced while idle")]
  AdvanceWhileIdle,

  #[error("weight address tap {tap} channel {channel} outside the bank")]
  WeightAddressOutOfRange { tap: usize, channel: usize },

  #[error("position finished after {found} accumulate cycles, {expected} expected")]
  AccumulateCount { expected: usize, found: usize },
}
