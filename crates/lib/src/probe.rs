//! Diagnostic walk over the aggregate path.
//!
//! Builds aggregates for a list of names exactly as intercepted opens would,
//! lists what each one exposes, closes them through the close filter and
//! drains the cache. No redirection is installed.

use serde::Serialize;

use crate::cache::{DrainReport, NameCache};
use crate::close::close_store;
use crate::error::EngineError;
use crate::name::{NameEncoding, StoreName};
use crate::provider::{StoreHandle, StoreProvider};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbedStore {
  pub name: String,
  pub encoding: Option<NameEncoding>,
  pub aggregate: StoreHandle,
  pub item_count: usize,
  /// Item subjects, only collected when listing was requested.
  pub subjects: Vec<String>,
  /// Whether the close filter kept the aggregate open.
  pub close_faked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
  pub stores: Vec<ProbedStore>,
  pub drained: DrainReport,
}

/// Probe every name in `names`, then drain `cache`.
///
/// The cache is drained even when a probe fails.
pub fn probe_stores<P: StoreProvider>(
  cache: &NameCache<P>,
  names: &[StoreName],
  list: bool,
) -> Result<ProbeReport, EngineError> {
  let result = names
    .iter()
    .map(|name| probe_one(cache, name, list))
    .collect::<Result<Vec<_>, _>>();
  let drained = cache.drain_all();

  Ok(ProbeReport {
    stores: result?,
    drained,
  })
}

fn probe_one<P: StoreProvider>(cache: &NameCache<P>, name: &StoreName, list: bool) -> Result<ProbedStore, EngineError> {
  let aggregate = cache.resolve(name)?;
  let items = cache.provider().items(aggregate).map_err(EngineError::Enumerate)?;
  let close_faked = close_store(cache, aggregate, 0);

  Ok(ProbedStore {
    name: name.provider_name(cache.default_store()).to_string(),
    encoding: name.encoding(),
    aggregate,
    item_count: items.len(),
    subjects: if list {
      items.into_iter().map(|item| item.subject).collect()
    } else {
      Vec::new()
    },
    close_faked,
  })
}
