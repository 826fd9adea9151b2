use sim::models::Model;
use sim::simulator::{Connector, Simulation};

use super::accel::ConvAccel;
use super::driver::RasterDriver;
use super::feature_map::FeatureMap;
use super::layer::ConvLayer;
use super::source::FeatureMapSource;

pub const ACCEL_ID: &str = "conv_accel";
pub const SOURCE_ID: &str = "feature_map";
pub const DRIVER_ID: &str = "raster_driver";

pub const DRIVER_START_PORT: &str = "start";
pub const ACCEL_RESULT_PORT: &str = "out_resp";

pub fn create_simulation(layer: ConvLayer, map: FeatureMap, latency: f64, window: usize) -> Simulation {
  let out_size = layer.geometry().out_size();

  let models = vec![
    Model::new(
      String::from(DRIVER_ID),
      Box::new(RasterDriver::new(
        out_size,
        window,
        String::from(DRIVER_START_PORT),
        String::from("out_req"),
        String::from("out_resp"),
      )),
    ),
    Model::new(
      String::from(ACCEL_ID),
      Box::new(ConvAccel::new(
        layer,
        String::from("out_req"),
        String::from(ACCEL_RESULT_PORT),
        String::from("pixel_req"),
        String::from("pixel_resp"),
      )),
    ),
    Model::new(
      String::from(SOURCE_ID),
      Box::new(FeatureMapSource::new(
        map,
        latency,
        String::from("pixel_req"),
        String::from("pixel_resp"),
      )),
    ),
  ];

  // Connector::new(id, source_id, target_id, source_port, target_port)
  let connectors = vec![
    Connector::new(
      String::from("driver_accel_req"),
      String::from(DRIVER_ID),
      String::from(ACCEL_ID),
      String::from("out_req"),
      String::from("out_req"),
    ),
    Connector::new(
      String::from("accel_driver_resp"),
      String::from(ACCEL_ID),
      String::from(DRIVER_ID),
      String::from(ACCEL_RESULT_PORT),
      String::from("out_resp"),
    ),
    Connector::new(
      String::from("accel_source_req"),
      String::from(ACCEL_ID),
      String::from(SOURCE_ID),
      String::from("pixel_req"),
      String::from("pixel_req"),
    ),
    Connector::new(
      String::from("source_accel_resp"),
      String::from(SOURCE_ID),
      String::from(ACCEL_ID),
      String::from("pixel_resp"),
      String::from("pixel_resp"),
    ),
  ];

  Simulation::post(models, connectors)
}
