use log::debug;
use sim::simulator::{Message, Simulation};
use std::fs::File;
use std::io::{BufWriter, Write};

use crate::simulator::error::SimError;

/// Advance the event simulation by one step and trace what was sent.
pub fn model_step(
  simulation: &mut Simulation,
  trace_writer: &mut Option<BufWriter<File>>,
) -> Result<Vec<Message>, SimError> {
  let messages = simulation
    .step()
    .map_err(|e| SimError::Simulation(format!("{:?}", e)))?;

  for msg in messages.iter() {
    debug!(
      "[MSG] t={:.1} {}:{} -> {}:{} | {}",
      msg.time(),
      msg.source_id(),
      msg.source_port(),
      msg.target_id(),
      msg.target_port(),
      msg.content()
    );
  }

  if let Some(writer) = trace_writer {
    for msg in messages.iter() {
      let trace_entry = serde_json::json!({
        "time": msg.time(),
        "source": msg.source_id(),
        "source_port": msg.source_port(),
        "target": msg.target_id(),
        "target_port": msg.target_port(),
        "content": msg.content()
      });
      writeln!(writer, "{}", trace_entry)?;
    }
    writer.flush()?;
  }

  Ok(messages)
}
