//! Signed fixed-point formats used along the datapath.
//!
//! Samples, weights, biases and activations are Q1.6 (`Q6`, 8 bits).
//! Finished sums are Q2.12 (`Q12`, 16 bits). Partial sums stay wide until
//! read-out. Both formats saturate on overflow and report that they did.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const SAMPLE_FRAC_BITS: u32 = 6;
pub const ACC_FRAC_BITS: u32 = 12;
/// Shift that lines a Q1.6 quantity up with the Q2.12 accumulator.
pub const ALIGN_SHIFT: u32 = ACC_FRAC_BITS - SAMPLE_FRAC_BITS;

/// Q1.6: 1 sign bit, 1 integer bit, 6 fraction bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Q6(pub i8);

/// Q2.12: 1 sign bit, 2 integer bits, 12 fraction bits (16-bit word).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Q12(pub i16);

impl Q6 {
  pub const ZERO: Q6 = Q6(0);
  pub const MIN: Q6 = Q6(i8::MIN);
  pub const MAX: Q6 = Q6(i8::MAX);

  pub const fn raw(self) -> i8 {
    self.0
  }

  pub fn is_negative(self) -> bool {
    self.0 < 0
  }

  /// Clamp a wide raw value into range. The flag is set when clamping happened.
  pub fn saturate(raw: i32) -> (Q6, bool) {
    let clamped = raw.clamp(i8::MIN as i32, i8::MAX as i32);
    (Q6(clamped as i8), clamped != raw)
  }

  pub fn from_f64(value: f64) -> Q6 {
    let raw = (value * (1 << SAMPLE_FRAC_BITS) as f64).round();
    Q6::saturate(raw.clamp(i32::MIN as f64, i32::MAX as f64) as i32).0
  }

  pub fn to_f64(self) -> f64 {
    self.0 as f64 / (1 << SAMPLE_FRAC_BITS) as f64
  }

  /// Bring a Q1.6 value into Q2.12 (`value << 6`). Never overflows.
  pub fn widen(self) -> Q12 {
    Q12((self.0 as i16) << ALIGN_SHIFT)
  }

  /// Sample times weight, aligned to Q2.12 but still wide.
  pub fn aligned_product(self, weight: Q6) -> i32 {
    (self.0 as i32 * weight.0 as i32) << ALIGN_SHIFT
  }
}

impl Q12 {
  pub const ZERO: Q12 = Q12(0);
  pub const MIN: Q12 = Q12(i16::MIN);
  pub const MAX: Q12 = Q12(i16::MAX);

  pub const fn raw(self) -> i16 {
    self.0
  }

  /// Clamp a wide sum into the 16-bit register.
  pub fn saturate(raw: i32) -> (Q12, bool) {
    let clamped = raw.clamp(i16::MIN as i32, i16::MAX as i32);
    (Q12(clamped as i16), clamped != raw)
  }

  pub fn saturating_add(self, rhs: Q12) -> (Q12, bool) {
    Q12::saturate(self.0 as i32 + rhs.0 as i32)
  }

  /// Return to Q1.6: round half away from zero, then clamp to [-128, 127].
  pub fn rescale(self) -> (Q6, bool) {
    let raw = self.0 as i32;
    let half = 1 << (ALIGN_SHIFT - 1);
    let shifted = if raw >= 0 {
      (raw + half) >> ALIGN_SHIFT
    } else {
      -((-raw + half) >> ALIGN_SHIFT)
    };
    Q6::saturate(shifted)
  }

  pub fn to_f64(self) -> f64 {
    self.0 as f64 / (1 << ACC_FRAC_BITS) as f64
  }
}

impl fmt::Display for Q6 {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl fmt::Display for Q12 {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_widen_then_rescale_is_identity() {
    for raw in i8::MIN..=i8::MAX {
      let (back, saturated) = Q6(raw).widen().rescale();
      assert_eq!(back, Q6(raw));
      assert!(!saturated);
    }
  }

  #[test]
  fn test_rescale_rounds_half_away_from_zero() {
    assert_eq!(Q12(32).rescale().0, Q6(1));
    assert_eq!(Q12(31).rescale().0, Q6(0));
    assert_eq!(Q12(-32).rescale().0, Q6(-1));
    assert_eq!(Q12(-31).rescale().0, Q6(0));
    assert_eq!(Q12(4672).rescale().0, Q6(73));
  }

  #[test]
  fn test_rescale_saturates() {
    assert_eq!(Q12(8159).rescale(), (Q6(127), false));
    assert_eq!(Q12(8160).rescale(), (Q6(127), true));
    assert_eq!(Q12::MAX.rescale(), (Q6::MAX, true));
    assert_eq!(Q12(-8192).rescale(), (Q6(-128), false));
    assert_eq!(Q12(-8224).rescale(), (Q6(-128), true));
    assert_eq!(Q12::MIN.rescale(), (Q6::MIN, true));
  }

  #[test]
  fn test_wide_sum_clamps_instead_of_wrapping() {
    let wide = 32000 + Q6(64).aligned_product(Q6(64));
    assert_eq!(Q12::saturate(wide), (Q12::MAX, true));
    let wide = -32000 + Q6(-128).aligned_product(Q6(127));
    assert_eq!(Q12::saturate(wide), (Q12::MIN, true));
    assert_eq!(Q12::saturate(100 + Q6(3).aligned_product(Q6(-2))), (Q12(100 - 6 * 64), false));

    // one product alone can leave the register range
    assert_eq!(Q6(100).aligned_product(Q6(6)), 38_400);
    assert_eq!(Q12(30000).saturating_add(Q12(5000)), (Q12::MAX, true));
  }

  #[test]
  fn test_float_conversion() {
    assert_eq!(Q6::from_f64(1.0), Q6(64));
    assert_eq!(Q6::from_f64(-2.0), Q6::MIN);
    assert_eq!(Q6::from_f64(5.0), Q6::MAX);
    assert_eq!(Q6(-32).to_f64(), -0.5);
    assert_eq!(Q12(4096).to_f64(), 1.0);
  }
}
