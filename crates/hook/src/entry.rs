//! DLL entry point and the replacement system functions.

use std::ffi::c_void;
use std::sync::{Arc, OnceLock};

use tracing::{debug, info};
use wcsc_lib::config::EngineConfig;
use wcsc_lib::fatal::{self, FatalReport};
use wcsc_lib::manager::{Activation, InterceptionManager};
use wcsc_lib::name::StoreName;
use wcsc_lib::provider::StoreHandle;
use wcsc_lib::provider::cryptoapi::CryptoApiProvider;
use windows_sys::Win32::Security::Cryptography::{CertCloseStore, HCERTSTORE, HCRYPTPROV_LEGACY};
use windows_sys::Win32::System::SystemServices::{DLL_PROCESS_ATTACH, DLL_PROCESS_DETACH};
use windows_sys::core::{PCSTR, PCWSTR};

use crate::detours::{Detours, Replacements, RetourInterceptor};
use crate::{logging, raw};

type Engine = InterceptionManager<CryptoApiProvider, RetourInterceptor>;

static DETOURS: OnceLock<Detours> = OnceLock::new();
static ENGINE: OnceLock<Engine> = OnceLock::new();

#[unsafe(no_mangle)]
#[allow(non_snake_case)]
pub extern "system" fn DllMain(_module: *mut c_void, reason: u32, _reserved: *mut c_void) -> i32 {
  match reason {
    DLL_PROCESS_ATTACH => attach(),
    DLL_PROCESS_DETACH => detach(),
    _ => {}
  }
  1
}

fn attach() {
  logging::init();

  let config = EngineConfig::from_env().unwrap_or_else(|err| fatal::terminate(&FatalReport::from_config_error(&err)));

  let detours = match Detours::new(Replacements {
    open_a: open_system_store_a,
    open_w: open_system_store_w,
    close: close_store,
  }) {
    Ok(detours) => DETOURS.get_or_init(|| detours),
    Err(err) => fatal::terminate(&FatalReport::new("detour setup", err.code(), err.to_string())),
  };

  let provider = Arc::new(CryptoApiProvider::with_close_fn(real_close_store));
  let engine = ENGINE.get_or_init(|| InterceptionManager::new(provider, RetourInterceptor::new(detours), config));

  match engine.activate() {
    Ok(Activation::Installed(hooks)) => info!(pid = std::process::id(), ?hooks, "certificate stores unified"),
    Ok(Activation::HelperProcess) => debug!("helper process"),
    Err(err) => fatal::terminate(&engine.fail(&err)),
  }
}

fn detach() {
  let Some(engine) = ENGINE.get() else {
    return;
  };
  if let Err(err) = engine.deactivate() {
    fatal::terminate(&FatalReport::from_engine_error(&err));
  }
}

/// `CertCloseStore` as it was before redirection.
unsafe extern "system" fn real_close_store(store: HCERTSTORE, flags: u32) -> i32 {
  match DETOURS.get() {
    // SAFETY: the trampoline has the original signature.
    Some(detours) => unsafe { detours.close.call(store, flags) },
    // SAFETY: forwarded verbatim.
    None => unsafe { CertCloseStore(store, flags) },
  }
}

fn open_through_engine(name: StoreName) -> Option<HCERTSTORE> {
  let engine = ENGINE.get()?;
  match engine.open_store(&name) {
    Ok(store) => Some(store.as_raw() as HCERTSTORE),
    Err(err) => fatal::terminate(&engine.fail(&err)),
  }
}

unsafe extern "system" fn open_system_store_a(prov: HCRYPTPROV_LEGACY, name: PCSTR) -> HCERTSTORE {
  // SAFETY: callers pass null or a NUL-terminated string.
  let store_name = unsafe { raw::ansi_name(name) };
  match open_through_engine(store_name) {
    Some(store) => store,
    None => match DETOURS.get() {
      // SAFETY: trampoline to the original with the caller's arguments.
      Some(detours) => unsafe { detours.open_a.call(prov, name) },
      None => std::ptr::null_mut(),
    },
  }
}

unsafe extern "system" fn open_system_store_w(prov: HCRYPTPROV_LEGACY, name: PCWSTR) -> HCERTSTORE {
  // SAFETY: callers pass null or a NUL-terminated string.
  let store_name = unsafe { raw::wide_name(name) };
  match open_through_engine(store_name) {
    Some(store) => store,
    None => match DETOURS.get().and_then(|detours| detours.open_w.as_ref()) {
      // SAFETY: trampoline to the original with the caller's arguments.
      Some(detour) => unsafe { detour.call(prov, name) },
      None => std::ptr::null_mut(),
    },
  }
}

unsafe extern "system" fn close_store(store: HCERTSTORE, flags: u32) -> i32 {
  match ENGINE.get() {
    Some(engine) => engine.close_store(StoreHandle::from_raw(store as usize), flags) as i32,
    // SAFETY: forwarded verbatim.
    None => unsafe { real_close_store(store, flags) },
  }
}
