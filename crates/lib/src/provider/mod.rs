//! Certificate store provider capability.
//!
//! The engine never talks to the operating system directly. It opens, unions
//! and closes stores through a [`StoreProvider`], which on Windows is
//! [`CryptoApiProvider`](cryptoapi::CryptoApiProvider) and in tests is an
//! in-memory fake.

#[cfg(windows)]
pub mod cryptoapi;

use std::fmt;
use std::io;

use serde::Serialize;
use thiserror::Error;

/// Opaque reference to an open store.
///
/// Wraps the raw provider handle value. The engine compares handles but never
/// dereferences them; ownership is tracked by whoever opened the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct StoreHandle(usize);

impl StoreHandle {
  pub const fn from_raw(raw: usize) -> Self {
    Self(raw)
  }

  pub const fn as_raw(self) -> usize {
    self.0
  }

  pub const fn is_null(self) -> bool {
    self.0 == 0
  }
}

impl fmt::Display for StoreHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:#x}", self.0)
  }
}

/// The namespace a system store belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreScope {
  CurrentUser,
  LocalMachine,
}

impl fmt::Display for StoreScope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      StoreScope::CurrentUser => write!(f, "current-user"),
      StoreScope::LocalMachine => write!(f, "local-machine"),
    }
  }
}

/// Failure reported by the store provider, carrying the platform error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{}", io::Error::from_raw_os_error(*code as i32))]
pub struct ProviderError {
  pub code: u32,
}

impl ProviderError {
  pub const fn new(code: u32) -> Self {
    Self { code }
  }

  /// Capture the calling thread's last platform error.
  pub fn last_os_error() -> Self {
    let code = io::Error::last_os_error().raw_os_error().unwrap_or_default();
    Self { code: code as u32 }
  }
}

/// A single item listed from a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreItem {
  pub subject: String,
}

/// Primitive store operations the engine builds on.
///
/// Implementations must be callable from any thread; intercepted entry points
/// run on arbitrary application threads.
pub trait StoreProvider: Send + Sync {
  /// Open the named system store in `scope` read-only.
  fn open_system(&self, scope: StoreScope, name: &str) -> Result<StoreHandle, ProviderError>;

  /// Create a new, empty collection store.
  fn open_collection(&self) -> Result<StoreHandle, ProviderError>;

  /// Add `member` to `collection`. Members added earlier take precedence.
  fn add_to_collection(&self, collection: StoreHandle, member: StoreHandle, priority: u32)
  -> Result<(), ProviderError>;

  /// The real, non-intercepted close. Returns the provider's success flag.
  fn close(&self, store: StoreHandle, flags: u32) -> bool;

  /// List the items visible through `store`, in provider order.
  fn items(&self, store: StoreHandle) -> Result<Vec<StoreItem>, ProviderError>;
}
