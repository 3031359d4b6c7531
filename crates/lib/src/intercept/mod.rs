//! Entry-point redirection capability.
//!
//! The interception primitive is an external collaborator. The engine only
//! needs it to install and remove a small fixed set of redirections as one
//! all-or-nothing batch. [`Transaction`] enforces the bracket contract: every
//! attach/detach happens between exactly one begin and one commit, and an
//! uncommitted transaction is aborted when dropped.

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

/// `ERROR_INVALID_OPERATION`
const INVALID_OPERATION: u32 = 4317;
/// `ERROR_NOT_SUPPORTED`
const NOT_SUPPORTED: u32 = 50;

/// A system entry point the engine redirects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum HookPoint {
  OpenSystemStoreA,
  OpenSystemStoreW,
  CloseStore,
}

impl HookPoint {
  pub const ALL: [HookPoint; 3] = [
    HookPoint::OpenSystemStoreA,
    HookPoint::OpenSystemStoreW,
    HookPoint::CloseStore,
  ];

  pub fn symbol(self) -> &'static str {
    match self {
      HookPoint::OpenSystemStoreA => "CertOpenSystemStoreA",
      HookPoint::OpenSystemStoreW => "CertOpenSystemStoreW",
      HookPoint::CloseStore => "CertCloseStore",
    }
  }
}

impl fmt::Display for HookPoint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.symbol())
  }
}

/// Which half of the engine lifecycle a transaction belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionPhase {
  Attach,
  Detach,
}

impl fmt::Display for TransactionPhase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TransactionPhase::Attach => write!(f, "attach"),
      TransactionPhase::Detach => write!(f, "detach"),
    }
  }
}

/// Errors reported by an [`Interceptor`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterceptError {
  #[error("a redirection transaction is already open")]
  AlreadyInTransaction,

  #[error("no redirection transaction is open")]
  NoTransaction,

  #[error("{0} cannot be redirected on this platform")]
  Unsupported(HookPoint),

  #[error("failed to redirect {point}: {message}")]
  Hook { point: HookPoint, code: u32, message: String },

  #[error("failed to commit redirection transaction (code {code})")]
  Commit { code: u32 },
}

impl InterceptError {
  pub fn code(&self) -> u32 {
    match self {
      InterceptError::AlreadyInTransaction | InterceptError::NoTransaction => INVALID_OPERATION,
      InterceptError::Unsupported(_) => NOT_SUPPORTED,
      InterceptError::Hook { code, .. } => *code,
      InterceptError::Commit { code } => *code,
    }
  }
}

/// The interception primitive, seen as a transactional install/remove service.
///
/// Implementations keep their own pending-operation state; the methods take
/// `&self` because the engine is shared with intercepted entry points running
/// on arbitrary threads.
pub trait Interceptor: Send + Sync {
  /// Whether this process is the primitive's own helper process, in which
  /// case the engine must stay inert.
  fn is_helper_process(&self) -> bool {
    false
  }

  /// Restore in-memory import tables after injection, when the primitive
  /// needs it. Called once before the attach transaction.
  fn restore_after_with(&self) {}

  /// Whether `point` exists on this platform.
  fn supports(&self, point: HookPoint) -> bool;

  fn begin(&self) -> Result<(), InterceptError>;

  /// Enlist the calling thread so it is not suspended mid-patch.
  fn update_thread(&self) -> Result<(), InterceptError>;

  fn attach(&self, point: HookPoint) -> Result<(), InterceptError>;

  fn detach(&self, point: HookPoint) -> Result<(), InterceptError>;

  /// Apply every pending attach/detach, or none of them.
  fn commit(&self) -> Result<(), InterceptError>;

  /// Discard pending operations without applying them.
  fn abort(&self);
}

/// An open redirection transaction.
pub struct Transaction<'a, I: Interceptor + ?Sized> {
  interceptor: &'a I,
  done: bool,
}

impl<'a, I: Interceptor + ?Sized> Transaction<'a, I> {
  /// Begin a transaction and enlist the current thread.
  pub fn begin(interceptor: &'a I) -> Result<Self, InterceptError> {
    interceptor.begin()?;
    let tx = Self {
      interceptor,
      done: false,
    };
    interceptor.update_thread()?;
    Ok(tx)
  }

  pub fn attach(&mut self, point: HookPoint) -> Result<(), InterceptError> {
    debug!(%point, "queue attach");
    self.interceptor.attach(point)
  }

  pub fn detach(&mut self, point: HookPoint) -> Result<(), InterceptError> {
    debug!(%point, "queue detach");
    self.interceptor.detach(point)
  }

  pub fn commit(mut self) -> Result<(), InterceptError> {
    self.done = true;
    self.interceptor.commit()
  }
}

impl<I: Interceptor + ?Sized> Drop for Transaction<'_, I> {
  fn drop(&mut self) {
    if !self.done {
      warn!("aborting uncommitted redirection transaction");
      self.interceptor.abort();
    }
  }
}
