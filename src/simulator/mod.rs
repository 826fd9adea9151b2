pub mod config;
pub mod error;
pub mod files;
pub mod harness;
pub mod sim;
pub mod simulator;
pub mod utils;

pub use error::SimError;
pub use simulator::Simulator;
