pub mod port;

pub use port::Wire;

/// A clocked hardware unit.
///
/// `run` evaluates one cycle from the inputs latched at the end of the
/// previous cycle. The owner copies outputs to the next unit's inputs after
/// every unit has run, so each hop costs one cycle.
pub trait Module {
  type Error;

  fn run(&mut self) -> Result<(), Self::Error>;
  fn reset(&mut self);
  fn name(&self) -> &str;
}
