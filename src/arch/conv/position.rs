//! Output-position generator: walks the 3x3 neighbourhood of one output
//! position and keeps count of how much of the raster has been visited.

use log::debug;
use serde::{Deserialize, Serialize};

use super::error::ProtocolError;
use super::layers::{KERNEL_SIZE, TAPS};
use crate::builtin::{Module, Wire};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct OutputPos {
  pub row: usize,
  pub col: usize,
}

impl OutputPos {
  pub fn new(row: usize, col: usize) -> Self {
    Self { row, col }
  }
}

/// One kernel tap of the current sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tap {
  pub index: usize,
  pub kernel_row: usize,
  pub kernel_col: usize,
  pub in_row: usize,
  pub in_col: usize,
  /// Set on the ninth tap (tap_done). The controller leaves the sweep on it.
  pub last: bool,
}

#[derive(Debug, Clone)]
pub struct PositionGenerator {
  name: String,
  out_size: usize,
  sweep: Option<(OutputPos, usize)>,
  visited: usize,

  // inputs
  pub request: Wire<OutputPos>,
  pub advance: bool,

  // outputs
  pub tap: Wire<Tap>,
  pub raster_done: bool,
}

impl PositionGenerator {
  pub fn new(name: impl Into<String>, out_size: usize) -> Self {
    Self {
      name: name.into(),
      out_size,
      sweep: None,
      visited: 0,
      request: Wire::default(),
      advance: false,
      tap: Wire::default(),
      raster_done: false,
    }
  }

  /// Positions completed since the last raster boundary.
  pub fn visited(&self) -> usize {
    self.visited
  }

  fn tap_at(pos: OutputPos, index: usize) -> Tap {
    let kernel_row = index / KERNEL_SIZE;
    let kernel_col = index % KERNEL_SIZE;
    Tap {
      index,
      kernel_row,
      kernel_col,
      in_row: pos.row + kernel_row,
      in_col: pos.col + kernel_col,
      last: index + 1 == TAPS,
    }
  }
}

impl Module for PositionGenerator {
  type Error = ProtocolError;

  fn run(&mut self) -> Result<(), ProtocolError> {
    self.raster_done = false;

    match self.sweep {
      Some((pos, index)) => {
        if self.request.valid {
          return Err(ProtocolError::RequestWhileBusy);
        }
        if self.advance {
          if index + 1 == TAPS {
            self.sweep = None;
            self.visited += 1;
            if self.visited == self.out_size * self.out_size {
              debug!("{}: raster of {} positions complete", self.name, self.visited);
              self.raster_done = true;
              self.visited = 0;
            }
          } else {
            self.sweep = Some((pos, index + 1));
          }
        }
      },
      None => {
        if self.advance {
          return Err(ProtocolError::AdvanceWhileIdle);
        }
        if self.request.valid {
          let pos = self.request.value;
          if pos.row >= self.out_size || pos.col >= self.out_size {
            return Err(ProtocolError::PositionOutOfRange {
              pos,
              out_size: self.out_size,
            });
          }
          self.sweep = Some((pos, 0));
        }
      },
    }

    self.tap = match self.sweep {
      Some((pos, index)) => Wire::driven(Self::tap_at(pos, index)),
      None => Wire::default(),
    };
    Ok(())
  }

  fn reset(&mut self) {
    self.sweep = None;
    self.visited = 0;
    self.request = Wire::default();
    self.advance = false;
    self.tap = Wire::default();
    self.raster_done = false;
  }

  fn name(&self) -> &str {
    &self.name
  }
}
