//! Fail-fast reporting.
//!
//! A half-working redirection is unsafe to leave running inside a host
//! application, so every engine error that reaches an entry point ends the
//! process: the error is written to the diagnostic stream together with the
//! failing operation, cached stores are released, and the process exits with
//! the platform error code.

use serde::Serialize;
use tracing::error;

use crate::config::ConfigError;
use crate::error::EngineError;

/// `ERROR_INVALID_PARAMETER`
pub const CONFIG_EXIT_CODE: u32 = 87;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FatalReport {
  pub operation: String,
  pub code: u32,
  pub message: String,
}

impl FatalReport {
  pub fn new(operation: impl Into<String>, code: u32, message: impl Into<String>) -> Self {
    Self {
      operation: operation.into(),
      code,
      message: message.into(),
    }
  }

  pub fn from_engine_error(err: &EngineError) -> Self {
    Self::new(err.operation(), err.exit_code(), err.to_string())
  }

  pub fn from_config_error(err: &ConfigError) -> Self {
    Self::new("EngineConfig::from_env", CONFIG_EXIT_CODE, err.to_string())
  }

  /// The line written to stderr.
  pub fn line(&self) -> String {
    format!("Error calling {}: {}", self.operation, self.message)
  }

  pub fn exit_code(&self) -> i32 {
    self.code as i32
  }

  /// Log and print the report.
  pub fn emit(&self) {
    error!(operation = %self.operation, code = self.code, "{}", self.message);
    eprintln!("{}", self.line());
  }
}

/// Print `report` and terminate the process with its code.
pub fn terminate(report: &FatalReport) -> ! {
  report.emit();
  std::process::exit(report.exit_code())
}
