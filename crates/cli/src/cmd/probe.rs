//! Probe command implementation.
//!
//! Builds the aggregate for each requested store through the same cache the
//! hook uses, reports what it exposes, and tears everything down again.

use anyhow::Result;
use wcsc_lib::config::EngineConfig;
use wcsc_lib::name::StoreName;

use crate::output::OutputFormat;

/// Map command-line names to store names; no names means the default store.
fn store_names(names: &[String], wide: bool) -> Vec<StoreName> {
  if names.is_empty() {
    return vec![StoreName::Default];
  }
  names
    .iter()
    .map(|name| {
      if wide {
        StoreName::wide(name.as_str())
      } else {
        StoreName::ansi(name.as_str())
      }
    })
    .collect()
}

#[cfg(windows)]
pub fn cmd_probe(config: &EngineConfig, names: &[String], wide: bool, list: bool, format: OutputFormat) -> Result<()> {
  use std::sync::Arc;

  use wcsc_lib::cache::NameCache;
  use wcsc_lib::probe::probe_stores;
  use wcsc_lib::provider::cryptoapi::CryptoApiProvider;

  let provider = Arc::new(CryptoApiProvider::new());
  let cache = NameCache::new(
    provider,
    config.max_stores,
    config.default_store.clone(),
    config.encoding_policy,
  );

  let report = probe_stores(&cache, &store_names(names, wide), list).map_err(|e| {
    let operation = e.operation();
    anyhow::Error::new(e).context(format!("probe failed in {}", operation))
  })?;

  render(&report, format)
}

#[cfg(not(windows))]
pub fn cmd_probe(_config: &EngineConfig, names: &[String], wide: bool, _list: bool, _format: OutputFormat) -> Result<()> {
  let names = store_names(names, wide);
  anyhow::bail!(
    "probing {} store(s) requires the Windows certificate store provider",
    names.len()
  )
}

#[cfg(windows)]
fn render(report: &wcsc_lib::probe::ProbeReport, format: OutputFormat) -> Result<()> {
  use crate::output::{print_json, print_stat, print_success, print_warning, symbols, yes_no};

  if format.is_json() {
    return print_json(report);
  }

  for store in &report.stores {
    print_success(&format!("{} ({} items)", store.name, store.item_count));
    print_stat("Aggregate", &store.aggregate.to_string());
    print_stat("Close faked", yes_no(store.close_faked));
    for subject in &store.subjects {
      println!("    {} {}", symbols::INFO, subject);
    }
  }

  println!();
  print_stat("Entries drained", &report.drained.entries.to_string());
  print_stat("Handles released", &report.drained.released.to_string());
  if report.drained.failed > 0 {
    print_warning(&format!("{} handle(s) could not be released", report.drained.failed));
  }
  Ok(())
}
