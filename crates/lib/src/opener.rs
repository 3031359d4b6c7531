//! Opens the user and machine halves of an aggregate.

use tracing::{debug, warn};

use crate::error::EngineError;
use crate::provider::{StoreHandle, StoreProvider, StoreScope};

/// The two scoped stores an aggregate is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorePair {
  pub user: StoreHandle,
  pub machine: StoreHandle,
}

impl StorePair {
  /// Release both stores through the real close, machine first.
  pub fn release<P: StoreProvider + ?Sized>(self, provider: &P) {
    release_one(provider, self.machine, StoreScope::LocalMachine);
    release_one(provider, self.user, StoreScope::CurrentUser);
  }
}

fn release_one<P: StoreProvider + ?Sized>(provider: &P, store: StoreHandle, scope: StoreScope) {
  if !provider.close(store, 0) {
    warn!(%scope, %store, "failed to release scoped store");
  }
}

/// Open the system store `name` in `scope`, read-only.
pub fn open_store<P: StoreProvider + ?Sized>(
  provider: &P,
  scope: StoreScope,
  name: &str,
) -> Result<StoreHandle, EngineError> {
  let store = provider
    .open_system(scope, name)
    .map_err(|source| EngineError::OpenStore {
      scope,
      name: name.to_string(),
      source,
    })?;
  debug!(%scope, name, %store, "opened scoped store");
  Ok(store)
}

/// Open the user then machine store for `name`.
///
/// If the machine store cannot be opened, the user store is released before
/// the error is returned.
pub fn open_pair<P: StoreProvider + ?Sized>(provider: &P, name: &str) -> Result<StorePair, EngineError> {
  let user = open_store(provider, StoreScope::CurrentUser, name)?;
  let machine = match open_store(provider, StoreScope::LocalMachine, name) {
    Ok(machine) => machine,
    Err(err) => {
      release_one(provider, user, StoreScope::CurrentUser);
      return Err(err);
    }
  };
  Ok(StorePair { user, machine })
}
