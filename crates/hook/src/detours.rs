//! `retour` detours for the redirected entry points.

use retour::{Function, GenericDetour};
use tracing::warn;
use wcsc_lib::intercept::{HookPoint, InterceptError};
use windows_sys::Win32::Security::Cryptography::{
  CertCloseStore, CertOpenSystemStoreA, CertOpenSystemStoreW, HCERTSTORE, HCRYPTPROV_LEGACY,
};
use windows_sys::core::{PCSTR, PCWSTR};

use crate::patch::{PATCH_FAILED, Patch, PatchInterceptor, PatchSet};

pub type OpenSystemStoreAFn = unsafe extern "system" fn(HCRYPTPROV_LEGACY, PCSTR) -> HCERTSTORE;
pub type OpenSystemStoreWFn = unsafe extern "system" fn(HCRYPTPROV_LEGACY, PCWSTR) -> HCERTSTORE;
pub type CloseStoreFn = unsafe extern "system" fn(HCERTSTORE, u32) -> i32;

/// Replacement for each redirected entry point.
pub struct Replacements {
  pub open_a: OpenSystemStoreAFn,
  pub open_w: OpenSystemStoreWFn,
  pub close: CloseStoreFn,
}

impl<T: Function> Patch for GenericDetour<T> {
  unsafe fn enable(&self) -> Result<(), String> {
    unsafe { GenericDetour::enable(self) }.map_err(|e| e.to_string())
  }

  unsafe fn disable(&self) -> Result<(), String> {
    unsafe { GenericDetour::disable(self) }.map_err(|e| e.to_string())
  }
}

/// The prepared (not yet enabled) detours.
pub struct Detours {
  pub open_a: GenericDetour<OpenSystemStoreAFn>,
  pub open_w: Option<GenericDetour<OpenSystemStoreWFn>>,
  pub close: GenericDetour<CloseStoreFn>,
}

fn hook_error(point: HookPoint, err: retour::Error) -> InterceptError {
  InterceptError::Hook {
    point,
    code: PATCH_FAILED,
    message: err.to_string(),
  }
}

impl Detours {
  /// Build trampolines for every entry point. Nothing is patched yet.
  pub fn new(replacements: Replacements) -> Result<Self, InterceptError> {
    // SAFETY: targets and replacements share the exact system signatures.
    unsafe {
      let open_a = GenericDetour::new(CertOpenSystemStoreA as OpenSystemStoreAFn, replacements.open_a)
        .map_err(|e| hook_error(HookPoint::OpenSystemStoreA, e))?;
      let open_w = match GenericDetour::new(CertOpenSystemStoreW as OpenSystemStoreWFn, replacements.open_w) {
        Ok(detour) => Some(detour),
        Err(err) => {
          warn!(error = %err, "cannot prepare CertOpenSystemStoreW redirection");
          None
        }
      };
      let close = GenericDetour::new(CertCloseStore as CloseStoreFn, replacements.close)
        .map_err(|e| hook_error(HookPoint::CloseStore, e))?;
      Ok(Self { open_a, open_w, close })
    }
  }
}

impl PatchSet for Detours {
  fn patch(&self, point: HookPoint) -> Option<&dyn Patch> {
    match point {
      HookPoint::OpenSystemStoreA => Some(&self.open_a as &dyn Patch),
      HookPoint::OpenSystemStoreW => self.open_w.as_ref().map(|d| d as &dyn Patch),
      HookPoint::CloseStore => Some(&self.close as &dyn Patch),
    }
  }
}

/// Interceptor over the process-wide detours.
pub type RetourInterceptor = PatchInterceptor<&'static Detours>;
