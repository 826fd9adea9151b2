//! 3x3 convolution layer pipeline in Q1.6 / Q2.12 fixed point.

pub mod accel;
pub mod controller;
pub mod driver;
pub mod error;
pub mod feature_map;
pub mod fixed;
pub mod layer;
pub mod layers;
pub mod mac;
pub mod main;
pub mod position;
pub mod relu;
pub mod rescale;
pub mod source;
pub mod weight_bank;

pub use controller::{ConvOutput, Controller, Phase, PixelAddr};
pub use error::{ConfigError, ProtocolError};
pub use feature_map::FeatureMap;
pub use fixed::{Q12, Q6};
pub use layer::{ConvLayer, LayerStats};
pub use layers::{LayerGeometry, LayerId};
pub use main::create_simulation;
pub use position::OutputPos;
pub use weight_bank::{BuiltinWeights, WeightStore, WeightTable};
