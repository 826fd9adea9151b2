pub mod arch;
pub mod builtin;
pub mod simulator;
