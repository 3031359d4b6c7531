//! Interception manager: the engine's lifecycle.
//!
//! ```text
//! Inactive --activate--> Active --deactivate--> Retired
//! ```
//!
//! Activation installs the open and close redirections as one transaction.
//! Deactivation removes them as one transaction and then drains the cache,
//! whether or not the removal succeeded. Retired is final for the process.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, error, info};

use crate::cache::{DrainReport, NameCache};
use crate::close::close_store;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::fatal::FatalReport;
use crate::intercept::{HookPoint, InterceptError, Interceptor, Transaction, TransactionPhase};
use crate::name::StoreName;
use crate::provider::{StoreHandle, StoreProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
  Inactive,
  Active,
  Retired,
}

impl fmt::Display for EngineState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EngineState::Inactive => write!(f, "inactive"),
      EngineState::Active => write!(f, "active"),
      EngineState::Retired => write!(f, "retired"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
  /// Redirections for these entry points are in place.
  Installed(Vec<HookPoint>),
  /// Running inside the interception primitive's helper process; nothing done.
  HelperProcess,
}

pub struct InterceptionManager<P: StoreProvider, I: Interceptor> {
  config: EngineConfig,
  interceptor: I,
  cache: NameCache<P>,
  state: Mutex<EngineState>,
  installed: Mutex<Vec<HookPoint>>,
}

impl<P: StoreProvider, I: Interceptor> InterceptionManager<P, I> {
  pub fn new(provider: Arc<P>, interceptor: I, config: EngineConfig) -> Self {
    let cache = NameCache::new(
      provider,
      config.max_stores,
      config.default_store.clone(),
      config.encoding_policy,
    );
    Self {
      config,
      interceptor,
      cache,
      state: Mutex::new(EngineState::Inactive),
      installed: Mutex::new(Vec::new()),
    }
  }

  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  pub fn cache(&self) -> &NameCache<P> {
    &self.cache
  }

  pub fn interceptor(&self) -> &I {
    &self.interceptor
  }

  pub fn state(&self) -> EngineState {
    *self.lock_state()
  }

  /// Entry points currently redirected.
  pub fn installed(&self) -> Vec<HookPoint> {
    self.lock_installed().clone()
  }

  fn lock_state(&self) -> MutexGuard<'_, EngineState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn lock_installed(&self) -> MutexGuard<'_, Vec<HookPoint>> {
    self.installed.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Entry points to redirect, in attach order.
  fn hook_points(&self) -> Result<Vec<HookPoint>, InterceptError> {
    let mut points = Vec::with_capacity(HookPoint::ALL.len());
    for point in HookPoint::ALL {
      let wanted = point != HookPoint::OpenSystemStoreW || self.config.hook_wide;
      if !wanted {
        continue;
      }
      if self.interceptor.supports(point) {
        points.push(point);
      } else if point == HookPoint::OpenSystemStoreW {
        debug!(%point, "entry point not available, skipping");
      } else {
        return Err(InterceptError::Unsupported(point));
      }
    }
    Ok(points)
  }

  /// Install the redirections.
  ///
  /// With `eager_default`, the default aggregate is built before the
  /// transaction and released again if the transaction fails.
  pub fn activate(&self) -> Result<Activation, EngineError> {
    if self.interceptor.is_helper_process() {
      debug!("helper process, staying inactive");
      return Ok(Activation::HelperProcess);
    }

    let mut state = self.lock_state();
    if *state != EngineState::Inactive {
      return Err(EngineError::InvalidState {
        expected: EngineState::Inactive,
        actual: *state,
      });
    }

    self.interceptor.restore_after_with();

    if self.config.eager_default
      && let Err(err) = self.cache.resolve(&StoreName::Default)
    {
      self.cache.drain_all();
      return Err(err);
    }

    let points = match self.hook_points().and_then(|points| self.install(&points).map(|()| points)) {
      Ok(points) => points,
      Err(source) => {
        error!(error = %source, "failed to install redirections");
        self.cache.drain_all();
        return Err(EngineError::Transaction {
          phase: TransactionPhase::Attach,
          source,
        });
      }
    };

    *self.lock_installed() = points.clone();
    *state = EngineState::Active;
    info!(hooks = ?points, eager_default = self.config.eager_default, "redirections installed");
    Ok(Activation::Installed(points))
  }

  fn install(&self, points: &[HookPoint]) -> Result<(), InterceptError> {
    let mut tx = Transaction::begin(&self.interceptor)?;
    for &point in points {
      tx.attach(point)?;
    }
    tx.commit()
  }

  fn uninstall(&self, points: &[HookPoint]) -> Result<(), InterceptError> {
    let mut tx = Transaction::begin(&self.interceptor)?;
    for &point in points {
      tx.detach(point)?;
    }
    tx.commit()
  }

  /// Remove the redirections and release every cached store.
  ///
  /// The cache is drained even when removal fails; the removal error is
  /// returned afterwards.
  pub fn deactivate(&self) -> Result<DrainReport, EngineError> {
    if self.interceptor.is_helper_process() {
      return Ok(DrainReport::default());
    }

    let mut state = self.lock_state();
    let installed = std::mem::take(&mut *self.lock_installed());
    let removal = if *state == EngineState::Active && !installed.is_empty() {
      self.uninstall(&installed)
    } else {
      Ok(())
    };

    let report = self.cache.drain_all();
    *state = EngineState::Retired;

    match removal {
      Ok(()) => {
        info!(hooks = ?installed, entries = report.entries, "redirections removed");
        Ok(report)
      }
      Err(source) => {
        error!(error = %source, "failed to remove redirections");
        Err(EngineError::Transaction {
          phase: TransactionPhase::Detach,
          source,
        })
      }
    }
  }

  /// Intercepted open: return the aggregate for `name`.
  pub fn open_store(&self, name: &StoreName) -> Result<StoreHandle, EngineError> {
    self.cache.resolve(name)
  }

  /// Intercepted close: fake it for aggregates, forward anything else.
  pub fn close_store(&self, handle: StoreHandle, flags: u32) -> bool {
    close_store(&self.cache, handle, flags)
  }

  /// Release cached stores and describe `err` for the final report.
  ///
  /// Redirections are left in place; process exit runs [`Self::deactivate`].
  pub fn fail(&self, err: &EngineError) -> FatalReport {
    let report = FatalReport::from_engine_error(err);
    let drained = self.cache.drain_all();
    error!(
      operation = %report.operation,
      code = report.code,
      drained = drained.entries,
      "fatal engine error"
    );
    report
  }
}
