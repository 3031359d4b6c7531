//! Transactional redirections over individually patchable entry points.
//!
//! A detour library patches one function at a time. The engine wants the
//! redirections applied as a batch, so attach/detach only queue work and
//! `commit` applies the queue, undoing whatever it already applied if a later
//! patch fails.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};
use wcsc_lib::intercept::{HookPoint, InterceptError, Interceptor};

/// `ERROR_INVALID_BLOCK`
pub const PATCH_FAILED: u32 = 9;

/// One prepared redirection that can be switched on and off.
pub trait Patch: Send + Sync {
  /// # Safety
  ///
  /// Rewrites the target's code; no thread may be executing its prologue.
  unsafe fn enable(&self) -> Result<(), String>;

  /// # Safety
  ///
  /// Same as [`Patch::enable`].
  unsafe fn disable(&self) -> Result<(), String>;
}

/// The patches available for each entry point.
pub trait PatchSet: Send + Sync {
  fn patch(&self, point: HookPoint) -> Option<&dyn Patch>;
}

impl<S: PatchSet + ?Sized> PatchSet for &S {
  fn patch(&self, point: HookPoint) -> Option<&dyn Patch> {
    (**self).patch(point)
  }
}

#[derive(Debug, Clone, Copy)]
enum Op {
  Enable,
  Disable,
}

impl Op {
  fn inverse(self) -> Self {
    match self {
      Op::Enable => Op::Disable,
      Op::Disable => Op::Enable,
    }
  }
}

/// [`Interceptor`] over a [`PatchSet`].
///
/// Patching does not suspend other threads, so `update_thread` has nothing
/// to enlist.
pub struct PatchInterceptor<S> {
  patches: S,
  pending: Mutex<Option<Vec<(Op, HookPoint)>>>,
}

impl<S: PatchSet> PatchInterceptor<S> {
  pub fn new(patches: S) -> Self {
    Self {
      patches,
      pending: Mutex::new(None),
    }
  }

  fn lock(&self) -> MutexGuard<'_, Option<Vec<(Op, HookPoint)>>> {
    self.pending.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn queue(&self, op: Op, point: HookPoint) -> Result<(), InterceptError> {
    let mut pending = self.lock();
    let ops = pending.as_mut().ok_or(InterceptError::NoTransaction)?;
    if self.patches.patch(point).is_none() {
      return Err(InterceptError::Unsupported(point));
    }
    ops.push((op, point));
    Ok(())
  }

  fn apply(&self, op: Op, point: HookPoint) -> Result<(), InterceptError> {
    let patch = self.patches.patch(point).ok_or(InterceptError::Unsupported(point))?;
    // SAFETY: patches are applied while the transaction lock is held, before
    // or after the process runs any intercepted code.
    let result = unsafe {
      match op {
        Op::Enable => patch.enable(),
        Op::Disable => patch.disable(),
      }
    };
    result.map_err(|message| InterceptError::Hook {
      point,
      code: PATCH_FAILED,
      message,
    })
  }
}

impl<S: PatchSet> Interceptor for PatchInterceptor<S> {
  fn supports(&self, point: HookPoint) -> bool {
    self.patches.patch(point).is_some()
  }

  fn begin(&self) -> Result<(), InterceptError> {
    let mut pending = self.lock();
    if pending.is_some() {
      return Err(InterceptError::AlreadyInTransaction);
    }
    *pending = Some(Vec::new());
    Ok(())
  }

  fn update_thread(&self) -> Result<(), InterceptError> {
    if self.lock().is_some() {
      Ok(())
    } else {
      Err(InterceptError::NoTransaction)
    }
  }

  fn attach(&self, point: HookPoint) -> Result<(), InterceptError> {
    self.queue(Op::Enable, point)
  }

  fn detach(&self, point: HookPoint) -> Result<(), InterceptError> {
    self.queue(Op::Disable, point)
  }

  fn commit(&self) -> Result<(), InterceptError> {
    let ops = self.lock().take().ok_or(InterceptError::NoTransaction)?;

    let mut applied = Vec::with_capacity(ops.len());
    for (op, point) in ops {
      if let Err(err) = self.apply(op, point) {
        for (done, done_point) in applied.into_iter().rev() {
          if let Err(undo) = self.apply(Op::inverse(done), done_point) {
            warn!(point = %done_point, error = %undo, "failed to roll back redirection");
          }
        }
        return Err(err);
      }
      debug!(%point, ?op, "applied");
      applied.push((op, point));
    }
    Ok(())
  }

  fn abort(&self) {
    self.lock().take();
  }
}
