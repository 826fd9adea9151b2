use sim::models::model_trait::{DevsModel, Reportable, ReportableModel, SerializableModel};
use sim::models::{ModelMessage, ModelRecord};
use sim::simulator::Services;
use sim::utils::errors::SimulationError;
use std::f64::INFINITY;

use super::controller::ConvOutput;
use super::position::OutputPos;
use crate::model_record;

/// Downstream consumer: walks the output raster in row-major order, keeping
/// at most `window` requests outstanding. Passive until started.
#[derive(Clone)]
pub struct RasterDriver {
  start_port: String,
  out_req_port: String,
  out_resp_port: String,

  out_size: usize,
  window: usize,
  next: usize,
  outstanding: usize,
  received: usize,

  until_next_event: f64,
  records: Vec<ModelRecord>,
}

impl RasterDriver {
  pub fn new(out_size: usize, window: usize, start_port: String, out_req_port: String, out_resp_port: String) -> Self {
    Self {
      start_port,
      out_req_port,
      out_resp_port,
      out_size,
      window: window.max(1),
      next: 0,
      outstanding: 0,
      received: 0,
      until_next_event: INFINITY,
      records: Vec::new(),
    }
  }

  fn total(&self) -> usize {
    self.out_size * self.out_size
  }

  pub fn is_complete(&self) -> bool {
    self.received == self.total()
  }

  fn can_issue(&self) -> bool {
    self.next < self.total() && self.outstanding < self.window
  }
}

impl DevsModel for RasterDriver {
  fn events_ext(&mut self, incoming_message: &ModelMessage, services: &mut Services) -> Result<(), SimulationError> {
    if incoming_message.port_name == self.start_port {
      model_record!(self, services, "start", format!("{} positions", self.total()));
    } else if incoming_message.port_name == self.out_resp_port {
      let output: ConvOutput =
        serde_json::from_str(&incoming_message.content).map_err(|_| SimulationError::InvalidModelState)?;
      self.outstanding = self.outstanding.saturating_sub(1);
      self.received += 1;
      model_record!(
        self,
        services,
        "result",
        format!("({}, {})", output.pos.row, output.pos.col)
      );
    }

    self.until_next_event = if self.can_issue() { 0.0 } else { INFINITY };
    Ok(())
  }

  fn events_int(&mut self, _services: &mut Services) -> Result<Vec<ModelMessage>, SimulationError> {
    let mut messages = Vec::new();

    while self.can_issue() {
      let pos = OutputPos::new(self.next / self.out_size, self.next % self.out_size);
      let content = serde_json::to_string(&pos).map_err(|_| SimulationError::InvalidModelState)?;
      messages.push(ModelMessage {
        port_name: self.out_req_port.clone(),
        content,
      });
      self.next += 1;
      self.outstanding += 1;
    }

    self.until_next_event = INFINITY;
    Ok(messages)
  }

  fn time_advance(&mut self, time_delta: f64) {
    self.until_next_event -= time_delta;
  }

  fn until_next_event(&self) -> f64 {
    self.until_next_event
  }
}

impl Reportable for RasterDriver {
  fn status(&self) -> String {
    format!(
      "issued={}, received={}/{}, complete={}",
      self.next,
      self.received,
      self.total(),
      self.is_complete()
    )
  }

  fn records(&self) -> &Vec<ModelRecord> {
    &self.records
  }
}

impl ReportableModel for RasterDriver {}

impl SerializableModel for RasterDriver {
  fn get_type(&self) -> &'static str {
    "RasterDriver"
  }
}
