use log::info;
use sim::models::{Model, Reportable};
use sim::simulator::Simulation;

use crate::simulator::harness::RunReport;

pub fn print_simulation_records(simulation: &mut Simulation) {
  info!("--- Simulation Records ---");
  for model in simulation.models().iter() {
    print_model_records(model);
  }
  info!("--- End Records ---");
}

fn print_model_records(model: &Model) {
  let records = model.records();
  if records.is_empty() {
    return;
  }
  info!("[{}] {}", model.id(), model.status());
  for record in records {
    info!("  Time {:.1}: {} {}", record.time, record.action, record.subject);
  }
}

pub fn print_run_summary(report: &RunReport) {
  info!(
    "{}: {} outputs in {} cycles",
    report.layer,
    report.outputs.len(),
    report.cycles
  );
  if let Some(stats) = &report.stats {
    info!(
      "  accumulates={} clears={} upstream_stalls={} downstream_stalls={}",
      stats.accumulates, stats.clears, stats.upstream_stall_cycles, stats.downstream_stall_cycles
    );
    info!(
      "  saturations: accumulator={} rescale={} raster_completions={}",
      stats.acc_saturations, stats.rescale_saturations, stats.raster_completions
    );
  }
}
