//! Error types for the interception engine.
//!
//! Every internal fault is returned as an [`EngineError`]. Only the hook's
//! entry points turn one into process termination, after teardown (see
//! [`crate::fatal`]).

use thiserror::Error;

use crate::intercept::{InterceptError, TransactionPhase};
use crate::manager::EngineState;
use crate::provider::{ProviderError, StoreScope};

/// `ERROR_TOO_MANY_OPEN_FILES`, reported when the name cache is full.
pub const CAPACITY_EXIT_CODE: u32 = 4;

/// `ERROR_INVALID_STATE`
pub const INVALID_STATE_EXIT_CODE: u32 = 5023;

/// Errors raised while building aggregates or managing redirections.
#[derive(Debug, Error)]
pub enum EngineError {
  /// A scoped system store could not be opened.
  #[error("failed to open {scope} store '{name}': {source}")]
  OpenStore {
    scope: StoreScope,
    name: String,
    #[source]
    source: ProviderError,
  },

  /// The collection store backing an aggregate could not be created.
  #[error("failed to create collection store: {0}")]
  CreateCollection(#[source] ProviderError),

  /// A scoped store could not be added to its aggregate.
  #[error("failed to add {member} store to collection: {source}")]
  AddToCollection {
    member: StoreScope,
    #[source]
    source: ProviderError,
  },

  /// Items of a store could not be listed.
  #[error("failed to enumerate store: {0}")]
  Enumerate(#[source] ProviderError),

  /// More distinct store names were requested than the cache can hold.
  #[error("too many distinct stores requested (limit {limit})")]
  CapacityExceeded { limit: usize },

  /// Installing or removing redirections failed.
  #[error("redirection transaction failed on {phase}: {source}")]
  Transaction {
    phase: TransactionPhase,
    #[source]
    source: InterceptError,
  },

  /// An activation or deactivation was requested out of order.
  #[error("engine is {actual}, expected {expected}")]
  InvalidState { expected: EngineState, actual: EngineState },
}

impl EngineError {
  /// Name of the failing operation, as reported on the diagnostic stream.
  pub fn operation(&self) -> &'static str {
    match self {
      EngineError::OpenStore { .. } => "CertOpenStore in open_store",
      EngineError::CreateCollection(_) => "CertOpenStore in build_aggregate",
      EngineError::AddToCollection {
        member: StoreScope::CurrentUser,
        ..
      } => "CertAddStoreToCollection(user) in build_aggregate",
      EngineError::AddToCollection {
        member: StoreScope::LocalMachine,
        ..
      } => "CertAddStoreToCollection(machine) in build_aggregate",
      EngineError::Enumerate(_) => "CertEnumCertificatesInStore in probe",
      EngineError::CapacityExceeded { .. } => "resolve",
      EngineError::Transaction {
        phase: TransactionPhase::Attach,
        ..
      } => "transaction commit on attach",
      EngineError::Transaction {
        phase: TransactionPhase::Detach,
        ..
      } => "transaction commit on detach",
      EngineError::InvalidState { .. } => "engine state change",
    }
  }

  /// Platform error code the host process exits with.
  pub fn exit_code(&self) -> u32 {
    match self {
      EngineError::OpenStore { source, .. } => source.code,
      EngineError::CreateCollection(source) => source.code,
      EngineError::AddToCollection { source, .. } => source.code,
      EngineError::Enumerate(source) => source.code,
      EngineError::CapacityExceeded { .. } => CAPACITY_EXIT_CODE,
      EngineError::Transaction { source, .. } => source.code(),
      EngineError::InvalidState { .. } => INVALID_STATE_EXIT_CODE,
    }
  }
}
