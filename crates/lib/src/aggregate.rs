//! Builds the union store handed back to callers.

use tracing::{debug, warn};

use crate::error::EngineError;
use crate::opener::StorePair;
use crate::provider::{StoreHandle, StoreProvider, StoreScope};

/// Create a collection store over `pair`, user store first.
///
/// The collection does not take ownership of the members; they must still be
/// released separately. If either add fails, the half-built collection is
/// released before the error is returned.
pub fn build_aggregate<P: StoreProvider + ?Sized>(provider: &P, pair: &StorePair) -> Result<StoreHandle, EngineError> {
  let collection = provider.open_collection().map_err(EngineError::CreateCollection)?;

  let members = [
    (StoreScope::CurrentUser, pair.user),
    (StoreScope::LocalMachine, pair.machine),
  ];
  for (scope, member) in members {
    if let Err(source) = provider.add_to_collection(collection, member, 0) {
      if !provider.close(collection, 0) {
        warn!(%collection, "failed to release partial collection");
      }
      return Err(EngineError::AddToCollection { member: scope, source });
    }
  }

  debug!(%collection, user = %pair.user, machine = %pair.machine, "built aggregate");
  Ok(collection)
}
