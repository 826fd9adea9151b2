use log::error;
use sim::models::model_trait::{DevsModel, Reportable, ReportableModel, SerializableModel};
use sim::models::{ModelMessage, ModelRecord};
use sim::simulator::Services;
use sim::utils::errors::SimulationError;
use std::collections::VecDeque;
use std::f64::INFINITY;

use super::accel::PixelResponse;
use super::controller::PixelAddr;
use super::feature_map::FeatureMap;
use crate::model_record;

/// Upstream feature-map memory. Answers each pull after a fixed latency,
/// in arrival order.
#[derive(Clone)]
pub struct FeatureMapSource {
  pixel_req_port: String,
  pixel_resp_port: String,

  map: FeatureMap,
  latency: f64,
  queue: VecDeque<PixelAddr>,
  served: u64,

  until_next_event: f64,
  records: Vec<ModelRecord>,
}

impl FeatureMapSource {
  pub fn new(map: FeatureMap, latency: f64, pixel_req_port: String, pixel_resp_port: String) -> Self {
    Self {
      pixel_req_port,
      pixel_resp_port,
      map,
      latency: latency.max(0.0),
      queue: VecDeque::new(),
      served: 0,
      until_next_event: INFINITY,
      records: Vec::new(),
    }
  }
}

impl DevsModel for FeatureMapSource {
  fn events_ext(&mut self, incoming_message: &ModelMessage, _services: &mut Services) -> Result<(), SimulationError> {
    if incoming_message.port_name == self.pixel_req_port {
      let addr: PixelAddr =
        serde_json::from_str(&incoming_message.content).map_err(|_| SimulationError::InvalidModelState)?;
      self.queue.push_back(addr);
      if self.until_next_event == INFINITY {
        self.until_next_event = self.latency;
      }
    }
    Ok(())
  }

  fn events_int(&mut self, services: &mut Services) -> Result<Vec<ModelMessage>, SimulationError> {
    let mut messages = Vec::new();

    if let Some(addr) = self.queue.pop_front() {
      let sample = self.map.get(addr).ok_or_else(|| {
        error!(
          "pixel ({}, {}, ch {}) outside the {}x{}x{} feature map",
          addr.row, addr.col, addr.channel, self.map.size, self.map.size, self.map.channels
        );
        SimulationError::InvalidModelState
      })?;
      let content = serde_json::to_string(&PixelResponse { addr, sample }).map_err(|_| SimulationError::InvalidModelState)?;
      messages.push(ModelMessage {
        port_name: self.pixel_resp_port.clone(),
        content,
      });
      self.served += 1;
      model_record!(
        self,
        services,
        "pixel",
        format!("({}, {}, ch {}) = {}", addr.row, addr.col, addr.channel, sample)
      );
    }

    self.until_next_event = if self.queue.is_empty() { INFINITY } else { self.latency };
    Ok(messages)
  }

  fn time_advance(&mut self, time_delta: f64) {
    self.until_next_event -= time_delta;
  }

  fn until_next_event(&self) -> f64 {
    self.until_next_event
  }
}

impl Reportable for FeatureMapSource {
  fn status(&self) -> String {
    format!("served={}, queued={}", self.served, self.queue.len())
  }

  fn records(&self) -> &Vec<ModelRecord> {
    &self.records
  }
}

impl ReportableModel for FeatureMapSource {}

impl SerializableModel for FeatureMapSource {
  fn get_type(&self) -> &'static str {
    "FeatureMapSource"
  }
}
