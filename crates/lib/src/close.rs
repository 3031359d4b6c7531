//! Close-call filter.
//!
//! Applications close the store they opened. When that store is one of our
//! shared aggregates, the close is reported as successful and nothing is
//! released; the cache keeps the handles for reuse and tears them down at
//! deactivation. Any other handle goes to the real close unchanged.

use tracing::trace;

use crate::cache::NameCache;
use crate::provider::{StoreHandle, StoreProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDecision {
  /// `handle` is a cached aggregate; report success and keep it open.
  Handled,
  /// Not ours; forward to the real close.
  Forward,
}

/// Classify a close request. Never mutates the cache.
pub fn attempt_close<P: StoreProvider>(cache: &NameCache<P>, handle: StoreHandle) -> CloseDecision {
  if cache.owns(handle) {
    CloseDecision::Handled
  } else {
    CloseDecision::Forward
  }
}

/// Close `handle` as the intercepted `CertCloseStore` would.
pub fn close_store<P: StoreProvider>(cache: &NameCache<P>, handle: StoreHandle, flags: u32) -> bool {
  match attempt_close(cache, handle) {
    CloseDecision::Handled => {
      trace!(%handle, flags, "faked close of aggregate store");
      true
    }
    CloseDecision::Forward => {
      trace!(%handle, flags, "forwarding close");
      cache.provider().close(handle, flags)
    }
  }
}
