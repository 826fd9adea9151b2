use std::io;
use thiserror::Error;

use crate::arch::conv::{ConfigError, PixelAddr, ProtocolError};

#[derive(Debug, Error)]
pub enum SimError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error("cycle {cycle}: {source}")]
  Protocol {
    cycle: u64,
    #[source]
    source: ProtocolError,
  },

  #[error("pixel ({}, {}, ch {}) requested outside the feature map", .addr.row, .addr.col, .addr.channel)]
  PixelOutOfRange { addr: PixelAddr },

  #[error("gave up after {cycles} cycles with {outputs} of {expected} outputs delivered")]
  Timeout { cycles: u64, outputs: usize, expected: usize },

  #[error("event simulation failed: {0}")]
  Simulation(String),

  #[error("invalid setting: {0}")]
  Settings(String),

  #[error("failed to parse {path}: {message}")]
  Parse { path: String, message: String },

  #[error(transparent)]
  Layered(#[from] config::ConfigError),

  #[error(transparent)]
  Json(#[from] serde_json::Error),

  #[error(transparent)]
  Readline(#[from] rustyline::error::ReadlineError),

  #[error(transparent)]
  Io(#[from] io::Error),
}
