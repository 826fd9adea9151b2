//! Event-driven wrapper around `ConvLayer`: one clock cycle per time unit
//! while there is work, passive otherwise.

use log::error;
use serde::{Deserialize, Serialize};
use sim::models::model_trait::{DevsModel, Reportable, ReportableModel, SerializableModel};
use sim::models::{ModelMessage, ModelRecord};
use sim::simulator::Services;
use sim::utils::errors::SimulationError;
use std::collections::VecDeque;
use std::f64::INFINITY;

use super::controller::PixelAddr;
use super::fixed::Q6;
use super::layer::ConvLayer;
use super::position::OutputPos;
use crate::builtin::Wire;
use crate::model_record;

/// Upstream answer to a `PixelAddr` pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelResponse {
  pub addr: PixelAddr,
  pub sample: Q6,
}

#[derive(Clone)]
pub struct ConvAccel {
  out_req_port: String,
  out_resp_port: String,
  pixel_req_port: String,
  pixel_resp_port: String,

  layer: ConvLayer,
  requests: VecDeque<OutputPos>,
  sample: Option<Q6>,
  pixel_outstanding: bool,

  until_next_event: f64,
  records: Vec<ModelRecord>,
}

impl ConvAccel {
  pub fn new(
    layer: ConvLayer,
    out_req_port: String,
    out_resp_port: String,
    pixel_req_port: String,
    pixel_resp_port: String,
  ) -> Self {
    Self {
      out_req_port,
      out_resp_port,
      pixel_req_port,
      pixel_resp_port,
      layer,
      requests: VecDeque::new(),
      sample: None,
      pixel_outstanding: false,
      until_next_event: INFINITY,
      records: Vec::new(),
    }
  }

  pub fn layer(&self) -> &ConvLayer {
    &self.layer
  }

  fn has_work(&self) -> bool {
    !self.layer.is_idle() || !self.requests.is_empty()
  }
}

impl DevsModel for ConvAccel {
  fn events_ext(&mut self, incoming_message: &ModelMessage, services: &mut Services) -> Result<(), SimulationError> {
    if incoming_message.port_name == self.out_req_port {
      let pos: OutputPos =
        serde_json::from_str(&incoming_message.content).map_err(|_| SimulationError::InvalidModelState)?;
      self.requests.push_back(pos);
      model_record!(self, services, "output_request", format!("({}, {})", pos.row, pos.col));
    } else if incoming_message.port_name == self.pixel_resp_port {
      let resp: PixelResponse =
        serde_json::from_str(&incoming_message.content).map_err(|_| SimulationError::InvalidModelState)?;
      self.sample = Some(resp.sample);
      self.pixel_outstanding = false;
    }

    if self.until_next_event == INFINITY {
      self.until_next_event = 1.0;
    }
    Ok(())
  }

  fn events_int(&mut self, services: &mut Services) -> Result<Vec<ModelMessage>, SimulationError> {
    let mut messages = Vec::new();

    self.layer.down_req = Wire::from_option(self.requests.front().copied());
    self.layer.down_ready = true;
    self.layer.up_resp = Wire::from_option(self.sample);

    if let Err(e) = self.layer.tick() {
      error!("conv accelerator at t={}: {}", services.global_time(), e);
      return Err(SimulationError::InvalidModelState);
    }

    if self.layer.down_req_ready {
      self.requests.pop_front();
    }
    if self.layer.up_ready {
      self.sample = None;
    }

    if self.layer.up_req.valid && !self.pixel_outstanding && self.sample.is_none() {
      let content = serde_json::to_string(&self.layer.up_req.value).map_err(|_| SimulationError::InvalidModelState)?;
      messages.push(ModelMessage {
        port_name: self.pixel_req_port.clone(),
        content,
      });
      self.pixel_outstanding = true;
    }

    if self.layer.result_taken {
      let result = &self.layer.result.value;
      let content = serde_json::to_string(result).map_err(|_| SimulationError::InvalidModelState)?;
      model_record!(
        self,
        services,
        "output_ready",
        format!("({}, {})", result.pos.row, result.pos.col)
      );
      messages.push(ModelMessage {
        port_name: self.out_resp_port.clone(),
        content,
      });
    }

    self.until_next_event = if self.has_work() { 1.0 } else { INFINITY };
    Ok(messages)
  }

  fn time_advance(&mut self, time_delta: f64) {
    self.until_next_event -= time_delta;
  }

  fn until_next_event(&self) -> f64 {
    self.until_next_event
  }
}

impl Reportable for ConvAccel {
  fn status(&self) -> String {
    format!(
      "phase={:?}, queued={}, outputs={}",
      self.layer.phase(),
      self.requests.len(),
      self.layer.stats().outputs
    )
  }

  fn records(&self) -> &Vec<ModelRecord> {
    &self.records
  }
}

impl ReportableModel for ConvAccel {}

impl SerializableModel for ConvAccel {
  fn get_type(&self) -> &'static str {
    "ConvAccel"
  }
}
