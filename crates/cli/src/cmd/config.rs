//! Config command implementation.
//!
//! Prints the configuration the hook would run with in this environment.

use anyhow::Result;
use wcsc_lib::config::EngineConfig;

use crate::output::{OutputFormat, print_info, print_json, print_stat, yes_no};

pub fn cmd_config(config: &EngineConfig, format: OutputFormat) -> Result<()> {
  if format.is_json() {
    return print_json(config);
  }

  print_info("Engine configuration:");
  print_stat("Max stores", &config.max_stores.to_string());
  print_stat("Default store", &config.default_store);
  print_stat("Eager default", yes_no(config.eager_default));
  print_stat("Hook wide entry point", yes_no(config.hook_wide));
  print_stat("Encoding policy", &config.encoding_policy.to_string());
  Ok(())
}
