/// Port and signal types for module interconnection

/// A wire/signal that carries data between modules.
/// Every wire carries its own valid flag.
#[derive(Debug, Clone, PartialEq)]
pub struct Wire<T: Clone> {
  pub value: T,
  pub valid: bool,
}

impl<T: Clone> Wire<T> {
  pub fn new(value: T) -> Self {
    Self { value, valid: false }
  }

  pub fn set(&mut self, value: T) {
    self.value = value;
    self.valid = true;
  }

  pub fn clear(&mut self) {
    self.valid = false;
  }

  /// The carried value, only while the wire is driven.
  pub fn get(&self) -> Option<&T> {
    if self.valid {
      Some(&self.value)
    } else {
      None
    }
  }
}

impl<T: Clone + Default> Wire<T> {
  pub fn driven(value: T) -> Self {
    Self { value, valid: true }
  }

  pub fn from_option(value: Option<T>) -> Self {
    match value {
      Some(v) => Self::driven(v),
      None => Self::default(),
    }
  }
}

impl<T: Clone + Default> Default for Wire<T> {
  fn default() -> Self {
    Self {
      value: T::default(),
      valid: false,
    }
  }
}
