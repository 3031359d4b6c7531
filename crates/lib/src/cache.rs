//! Per-name cache of aggregate stores.
//!
//! Each distinct requested name maps to one [`AggregateEntry`]: the user and
//! machine stores plus the collection store built over them. Entries are
//! created on first request, live until [`NameCache::drain_all`], and are
//! never evicted. The table is bounded; a request for one name too many fails
//! with [`EngineError::CapacityExceeded`] without opening anything.
//!
//! # Concurrency
//!
//! Intercepted opens and closes arrive on arbitrary application threads. The
//! table sits behind a mutex that is never held across a provider call: the
//! system provider closes its own intermediate stores while opening, and those
//! closes come back through the close filter, which locks the table on the
//! same thread. Builds are serialized by a second mutex that the close path
//! never takes, so two threads racing on a new name still build a single
//! aggregate and the bound is checked against the table as it is at insert.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::aggregate::build_aggregate;
use crate::config::EncodingPolicy;
use crate::error::EngineError;
use crate::name::{NameEncoding, StoreName};
use crate::opener::{StorePair, open_pair};
use crate::provider::{StoreHandle, StoreProvider};

/// One cached aggregate and the stores it was built from.
#[derive(Debug)]
struct AggregateEntry {
  /// Normalized name under each encoding that has reached this entry.
  keys: [Option<String>; 2],
  is_default: bool,
  /// Name as first requested.
  display_name: String,
  pair: StorePair,
  aggregate: StoreHandle,
}

impl AggregateEntry {
  fn summary(&self) -> EntrySummary {
    let encodings = [NameEncoding::Ansi, NameEncoding::Wide]
      .into_iter()
      .filter(|encoding| self.keys[encoding.index()].is_some())
      .collect();
    EntrySummary {
      name: self.display_name.clone(),
      is_default: self.is_default,
      encodings,
      user: self.pair.user,
      machine: self.pair.machine,
      aggregate: self.aggregate,
    }
  }
}

/// Read-only view of a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntrySummary {
  pub name: String,
  pub is_default: bool,
  pub encodings: Vec<NameEncoding>,
  pub user: StoreHandle,
  pub machine: StoreHandle,
  pub aggregate: StoreHandle,
}

/// Outcome of [`NameCache::drain_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
  /// Entries torn down.
  pub entries: usize,
  /// Handles the provider reported as closed.
  pub released: usize,
  /// Handles the provider refused to close.
  pub failed: usize,
}

#[derive(Debug)]
struct Slots {
  entries: Vec<AggregateEntry>,
  by_name: HashMap<(NameEncoding, String), usize>,
  by_aggregate: HashMap<StoreHandle, usize>,
  default: Option<usize>,
}

impl Slots {
  fn with_capacity(capacity: usize) -> Self {
    Self {
      entries: Vec::with_capacity(capacity),
      by_name: HashMap::with_capacity(capacity),
      by_aggregate: HashMap::with_capacity(capacity),
      default: None,
    }
  }

  fn find(&mut self, name: &StoreName, policy: EncodingPolicy) -> Option<usize> {
    let StoreName::Named { text, encoding } = name else {
      return self.default;
    };
    let key = text.to_lowercase();

    if let Some(&index) = self.by_name.get(&(*encoding, key.clone())) {
      return Some(index);
    }

    if policy == EncodingPolicy::Unified {
      let other = match encoding {
        NameEncoding::Ansi => NameEncoding::Wide,
        NameEncoding::Wide => NameEncoding::Ansi,
      };
      if let Some(&index) = self.by_name.get(&(other, key.clone())) {
        debug!(name = %text, %encoding, "aliasing name under second encoding");
        self.entries[index].keys[encoding.index()] = Some(key.clone());
        self.by_name.insert((*encoding, key), index);
        return Some(index);
      }
    }

    None
  }

  fn insert(&mut self, name: &StoreName, display_name: String, pair: StorePair, aggregate: StoreHandle) {
    let index = self.entries.len();
    let mut keys = [None, None];

    match name {
      StoreName::Default => self.default = Some(index),
      StoreName::Named { text, encoding } => {
        let key = text.to_lowercase();
        keys[encoding.index()] = Some(key.clone());
        self.by_name.insert((*encoding, key), index);
      }
    }

    self.by_aggregate.insert(aggregate, index);
    self.entries.push(AggregateEntry {
      keys,
      is_default: name.is_default(),
      display_name,
      pair,
      aggregate,
    });
  }
}

/// Bounded map from requested store name to aggregate.
pub struct NameCache<P: StoreProvider> {
  provider: Arc<P>,
  capacity: usize,
  default_store: String,
  policy: EncodingPolicy,
  slots: Mutex<Slots>,
  /// Held while a miss is being built. Never taken by the close path.
  build: Mutex<()>,
}

impl<P: StoreProvider> NameCache<P> {
  pub fn new(provider: Arc<P>, capacity: usize, default_store: impl Into<String>, policy: EncodingPolicy) -> Self {
    Self {
      provider,
      capacity,
      default_store: default_store.into(),
      policy,
      slots: Mutex::new(Slots::with_capacity(capacity)),
      build: Mutex::new(()),
    }
  }

  fn lock(&self) -> MutexGuard<'_, Slots> {
    self.slots.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn lock_build(&self) -> MutexGuard<'_, ()> {
    self.build.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Cached aggregate for `name`, or an error when a new entry would not fit.
  fn lookup(&self, name: &StoreName) -> Result<Option<StoreHandle>, EngineError> {
    let mut slots = self.lock();

    if let Some(index) = slots.find(name, self.policy) {
      let aggregate = slots.entries[index].aggregate;
      debug!(%name, %aggregate, "aggregate cache hit");
      return Ok(Some(aggregate));
    }

    if slots.entries.len() >= self.capacity {
      error!(%name, limit = self.capacity, "store cache is full");
      return Err(EngineError::CapacityExceeded { limit: self.capacity });
    }

    Ok(None)
  }

  pub fn provider(&self) -> &P {
    &self.provider
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Store opened for unnamed requests.
  pub fn default_store(&self) -> &str {
    &self.default_store
  }

  pub fn policy(&self) -> EncodingPolicy {
    self.policy
  }

  pub fn len(&self) -> usize {
    self.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Return the aggregate for `name`, building it on first request.
  pub fn resolve(&self, name: &StoreName) -> Result<StoreHandle, EngineError> {
    if let Some(aggregate) = self.lookup(name)? {
      return Ok(aggregate);
    }

    let _build = self.lock_build();
    // Another thread may have built this name while we waited.
    if let Some(aggregate) = self.lookup(name)? {
      return Ok(aggregate);
    }

    let provider = &*self.provider;
    let store_name = name.provider_name(&self.default_store);
    let pair = open_pair(provider, store_name)?;
    let aggregate = match build_aggregate(provider, &pair) {
      Ok(aggregate) => aggregate,
      Err(err) => {
        pair.release(provider);
        return Err(err);
      }
    };

    let mut slots = self.lock();
    slots.insert(name, store_name.to_string(), pair, aggregate);
    info!(
      %name,
      store = store_name,
      encoding = ?name.encoding(),
      %aggregate,
      entries = slots.entries.len(),
      "built aggregate store"
    );
    Ok(aggregate)
  }

  /// Find the entry whose aggregate is `handle`.
  pub fn reverse_lookup(&self, handle: StoreHandle) -> Option<EntrySummary> {
    let slots = self.lock();
    slots
      .by_aggregate
      .get(&handle)
      .map(|&index| slots.entries[index].summary())
  }

  /// Whether `handle` is one of this cache's aggregates.
  pub fn owns(&self, handle: StoreHandle) -> bool {
    self.lock().by_aggregate.contains_key(&handle)
  }

  pub fn entries(&self) -> Vec<EntrySummary> {
    self.lock().entries.iter().map(AggregateEntry::summary).collect()
  }

  /// Release every entry (aggregate, machine, user) and reset to empty.
  ///
  /// Safe to call on an empty cache. Release failures are logged and counted
  /// but do not stop the drain.
  pub fn drain_all(&self) -> DrainReport {
    let _build = self.lock_build();
    let mut slots = self.lock();
    let entries = std::mem::take(&mut slots.entries);
    slots.by_name.clear();
    slots.by_aggregate.clear();
    slots.default = None;
    drop(slots);

    let mut report = DrainReport {
      entries: entries.len(),
      ..DrainReport::default()
    };

    for entry in entries {
      let handles = [
        ("aggregate", entry.aggregate),
        ("machine", entry.pair.machine),
        ("user", entry.pair.user),
      ];
      for (role, handle) in handles {
        if self.provider.close(handle, 0) {
          report.released += 1;
        } else {
          report.failed += 1;
          warn!(name = %entry.display_name, role, %handle, "failed to release store");
        }
      }
    }

    if report.entries > 0 {
      info!(
        entries = report.entries,
        released = report.released,
        failed = report.failed,
        "drained aggregate cache"
      );
    }
    report
  }
}

#[cfg(test)]
mod tests {
  use std::sync::mpsc;
  use std::sync::{OnceLock, Weak};
  use std::time::Duration;

  use super::*;
  use crate::close::close_store;
  use crate::provider::{ProviderError, StoreItem, StoreScope};
  use crate::util::testutil::{FakeProvider, ProviderCall};

  fn cache(capacity: usize, policy: EncodingPolicy) -> (Arc<FakeProvider>, NameCache<FakeProvider>) {
    let provider = Arc::new(FakeProvider::new());
    let cache = NameCache::new(provider.clone(), capacity, "MY", policy);
    (provider, cache)
  }

  fn opened_scoped(provider: &FakeProvider) -> usize {
    provider
      .calls()
      .iter()
      .filter(|call| matches!(call, ProviderCall::OpenSystem(..)))
      .count()
  }

  #[test]
  fn resolve_is_idempotent() {
    let (provider, cache) = cache(4, EncodingPolicy::PerEncoding);

    let first = cache.resolve(&StoreName::ansi("CA")).unwrap();
    let second = cache.resolve(&StoreName::ansi("CA")).unwrap();

    assert_eq!(first, second);
    assert_eq!(opened_scoped(&provider), 2);
    assert_eq!(cache.len(), 1);
  }

  #[test]
  fn lookup_ignores_case() {
    let (_, cache) = cache(4, EncodingPolicy::PerEncoding);

    let first = cache.resolve(&StoreName::wide("Root")).unwrap();
    let second = cache.resolve(&StoreName::wide("ROOT")).unwrap();

    assert_eq!(first, second);
    assert_eq!(cache.entries()[0].name, "Root");
  }

  #[test]
  fn distinct_names_get_distinct_aggregates() {
    let (_, cache) = cache(4, EncodingPolicy::PerEncoding);

    let ca = cache.resolve(&StoreName::ansi("CA")).unwrap();
    let root = cache.resolve(&StoreName::ansi("ROOT")).unwrap();
    let ca_again = cache.resolve(&StoreName::ansi("CA")).unwrap();

    assert_ne!(ca, root);
    assert_eq!(ca, ca_again);
    assert_eq!(cache.len(), 2);
  }

  #[test]
  fn default_name_uses_configured_store() {
    let (provider, cache) = cache(4, EncodingPolicy::PerEncoding);

    let first = cache.resolve(&StoreName::Default).unwrap();
    let second = cache.resolve(&StoreName::Default).unwrap();

    assert_eq!(first, second);
    assert!(matches!(
      &provider.calls()[0],
      ProviderCall::OpenSystem(StoreScope::CurrentUser, name, _) if name == "MY"
    ));
    let entry = cache.reverse_lookup(first).unwrap();
    assert!(entry.is_default);
    assert!(entry.encodings.is_empty());
  }

  #[test]
  fn default_and_explicit_name_are_separate_entries() {
    let (_, cache) = cache(4, EncodingPolicy::PerEncoding);

    let default = cache.resolve(&StoreName::Default).unwrap();
    let named = cache.resolve(&StoreName::ansi("MY")).unwrap();

    assert_ne!(default, named);
  }

  #[test]
  fn per_encoding_policy_builds_second_aggregate() {
    let (_, cache) = cache(4, EncodingPolicy::PerEncoding);

    let ansi = cache.resolve(&StoreName::ansi("CA")).unwrap();
    let wide = cache.resolve(&StoreName::wide("ca")).unwrap();

    assert_ne!(ansi, wide);
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.resolve(&StoreName::wide("CA")).unwrap(), wide);
  }

  #[test]
  fn unified_policy_aliases_second_encoding() {
    let (provider, cache) = cache(4, EncodingPolicy::Unified);

    let ansi = cache.resolve(&StoreName::ansi("CA")).unwrap();
    let wide = cache.resolve(&StoreName::wide("ca")).unwrap();

    assert_eq!(ansi, wide);
    assert_eq!(cache.len(), 1);
    assert_eq!(opened_scoped(&provider), 2);
    assert_eq!(
      cache.reverse_lookup(ansi).unwrap().encodings,
      vec![NameEncoding::Ansi, NameEncoding::Wide]
    );
  }

  #[test]
  fn capacity_is_enforced_without_opening() {
    let (provider, cache) = cache(2, EncodingPolicy::PerEncoding);
    cache.resolve(&StoreName::ansi("CA")).unwrap();
    cache.resolve(&StoreName::ansi("ROOT")).unwrap();
    let calls_before = provider.calls().len();

    let err = cache.resolve(&StoreName::ansi("MY")).unwrap_err();

    assert!(matches!(err, EngineError::CapacityExceeded { limit: 2 }));
    assert_eq!(provider.calls().len(), calls_before);
    assert_eq!(cache.len(), 2);
    // Existing names still resolve when full.
    assert!(cache.resolve(&StoreName::ansi("ca")).is_ok());
  }

  #[test]
  fn failed_build_releases_pair() {
    let (provider, cache) = cache(4, EncodingPolicy::PerEncoding);
    provider.fail_collection(14);

    let err = cache.resolve(&StoreName::ansi("CA")).unwrap_err();

    assert_eq!(err.exit_code(), 14);
    assert!(provider.open_handles().is_empty());
    assert!(cache.is_empty());
  }

  #[test]
  fn reverse_lookup_only_matches_aggregates() {
    let (provider, cache) = cache(4, EncodingPolicy::PerEncoding);
    let aggregate = cache.resolve(&StoreName::ansi("CA")).unwrap();
    let entry = cache.reverse_lookup(aggregate).unwrap();

    assert_eq!(entry.aggregate, aggregate);
    assert!(cache.reverse_lookup(entry.user).is_none());
    assert!(cache.reverse_lookup(entry.machine).is_none());
    assert!(!cache.owns(provider.open_foreign("OTHER")));
  }

  #[test]
  fn drain_releases_in_order_and_resets() {
    let (provider, cache) = cache(4, EncodingPolicy::PerEncoding);
    let ca = cache.resolve(&StoreName::ansi("CA")).unwrap();
    let root = cache.resolve(&StoreName::wide("ROOT")).unwrap();
    let ca_entry = cache.reverse_lookup(ca).unwrap();
    let root_entry = cache.reverse_lookup(root).unwrap();

    let report = cache.drain_all();

    assert_eq!(
      report,
      DrainReport {
        entries: 2,
        released: 6,
        failed: 0
      }
    );
    assert_eq!(
      provider.closed(),
      vec![
        ca_entry.aggregate,
        ca_entry.machine,
        ca_entry.user,
        root_entry.aggregate,
        root_entry.machine,
        root_entry.user,
      ]
    );
    assert!(cache.is_empty());
    assert!(cache.reverse_lookup(ca).is_none());
    assert!(provider.open_handles().is_empty());
  }

  #[test]
  fn drain_is_idempotent() {
    let (provider, cache) = cache(4, EncodingPolicy::PerEncoding);
    cache.resolve(&StoreName::Default).unwrap();

    cache.drain_all();
    let second = cache.drain_all();

    assert_eq!(second, DrainReport::default());
    assert_eq!(provider.closed().len(), 3);
  }

  #[test]
  fn drain_counts_release_failures() {
    let (provider, cache) = cache(4, EncodingPolicy::PerEncoding);
    let aggregate = cache.resolve(&StoreName::ansi("CA")).unwrap();
    provider.fail_close(aggregate);

    let report = cache.drain_all();

    assert_eq!(report.failed, 1);
    assert_eq!(report.released, 2);
    assert!(cache.is_empty());
  }

  #[test]
  fn cache_is_usable_after_drain() {
    let (_, cache) = cache(1, EncodingPolicy::PerEncoding);
    cache.resolve(&StoreName::ansi("CA")).unwrap();
    cache.drain_all();

    assert!(cache.resolve(&StoreName::ansi("ROOT")).is_ok());
  }

  /// Provider that, like the system store provider, closes a store of its
  /// own through the intercepted close while opening.
  struct ClosingProvider {
    inner: FakeProvider,
    cache: OnceLock<Weak<NameCache<ClosingProvider>>>,
  }

  impl StoreProvider for ClosingProvider {
    fn open_system(&self, scope: StoreScope, name: &str) -> Result<StoreHandle, ProviderError> {
      if let Some(cache) = self.cache.get().and_then(Weak::upgrade) {
        let scratch = self.inner.open_foreign("physical");
        assert!(close_store(&*cache, scratch, 0));
      }
      self.inner.open_system(scope, name)
    }

    fn open_collection(&self) -> Result<StoreHandle, ProviderError> {
      self.inner.open_collection()
    }

    fn add_to_collection(
      &self,
      collection: StoreHandle,
      member: StoreHandle,
      priority: u32,
    ) -> Result<(), ProviderError> {
      self.inner.add_to_collection(collection, member, priority)
    }

    fn close(&self, store: StoreHandle, flags: u32) -> bool {
      self.inner.close(store, flags)
    }

    fn items(&self, store: StoreHandle) -> Result<Vec<StoreItem>, ProviderError> {
      self.inner.items(store)
    }
  }

  #[test]
  fn close_during_build_does_not_block() {
    let provider = Arc::new(ClosingProvider {
      inner: FakeProvider::new(),
      cache: OnceLock::new(),
    });
    let cache = Arc::new(NameCache::new(provider.clone(), 4, "MY", EncodingPolicy::PerEncoding));
    assert!(provider.cache.set(Arc::downgrade(&cache)).is_ok());

    let (tx, rx) = mpsc::channel();
    let worker = {
      let cache = cache.clone();
      std::thread::spawn(move || {
        let _ = tx.send(cache.resolve(&StoreName::ansi("CA")));
      })
    };

    let aggregate = rx
      .recv_timeout(Duration::from_secs(3))
      .expect("resolve blocked on a nested close")
      .unwrap();
    worker.join().unwrap();

    assert!(cache.owns(aggregate));
    assert_eq!(provider.inner.closed().len(), 2);
    cache.drain_all();
    assert!(provider.inner.open_handles().is_empty());
  }

  #[test]
  fn concurrent_resolves_build_one_aggregate() {
    let (provider, cache) = cache(4, EncodingPolicy::PerEncoding);
    let cache = Arc::new(cache);

    let handles: Vec<_> = (0..8)
      .map(|_| {
        let cache = cache.clone();
        std::thread::spawn(move || cache.resolve(&StoreName::ansi("CA")).unwrap())
      })
      .collect();
    let results: Vec<StoreHandle> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(results.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(cache.len(), 1);
    assert_eq!(opened_scoped(&provider), 2);
  }
}
