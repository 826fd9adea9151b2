/// Macro to push a ModelRecord with common fields
///
/// Usage:
/// ```ignore
/// model_record!(self, services, "output_ready", format!("({}, {})", row, col));
/// ```
#[macro_export]
macro_rules! model_record {
  ($self:expr, $services:expr, $action:expr, $subject:expr) => {
    $self.records.push(sim::models::ModelRecord {
      time: $services.global_time(),
      action: $action.to_string(),
      subject: $subject.to_string(),
    });
  };
}
