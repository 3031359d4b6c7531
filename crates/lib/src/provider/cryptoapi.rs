//! CryptoAPI-backed store provider.

use std::ffi::{OsStr, c_void};
use std::os::windows::ffi::OsStrExt;

use tracing::trace;
use windows_sys::Win32::Security::Cryptography::{
  CERT_CONTEXT, CERT_NAME_SIMPLE_DISPLAY_TYPE, CERT_STORE_PROV_COLLECTION, CERT_STORE_PROV_SYSTEM_W,
  CERT_STORE_READONLY_FLAG, CERT_SYSTEM_STORE_CURRENT_USER, CERT_SYSTEM_STORE_LOCAL_MACHINE, CertAddStoreToCollection,
  CertCloseStore, CertEnumCertificatesInStore, CertGetNameStringW, CertOpenStore, HCERTSTORE,
};

use super::{ProviderError, StoreHandle, StoreItem, StoreProvider, StoreScope};

/// Signature of `CertCloseStore`.
pub type CloseStoreFn = unsafe extern "system" fn(HCERTSTORE, u32) -> i32;

/// Store provider over the Windows CryptoAPI.
///
/// `close` goes through `close_fn`, which defaults to `CertCloseStore`. When
/// `CertCloseStore` itself is redirected, the hook supplies the trampoline so
/// forwarded closes reach the original implementation.
pub struct CryptoApiProvider {
  close_fn: CloseStoreFn,
}

impl CryptoApiProvider {
  pub fn new() -> Self {
    Self {
      close_fn: CertCloseStore,
    }
  }

  pub fn with_close_fn(close_fn: CloseStoreFn) -> Self {
    Self { close_fn }
  }
}

impl Default for CryptoApiProvider {
  fn default() -> Self {
    Self::new()
  }
}

fn to_wide(s: &str) -> Vec<u16> {
  OsStr::new(s).encode_wide().chain(Some(0)).collect()
}

fn raw(store: StoreHandle) -> HCERTSTORE {
  store.as_raw() as HCERTSTORE
}

fn handle_or_last_error(store: HCERTSTORE) -> Result<StoreHandle, ProviderError> {
  if store.is_null() {
    Err(ProviderError::last_os_error())
  } else {
    Ok(StoreHandle::from_raw(store as usize))
  }
}

impl StoreProvider for CryptoApiProvider {
  fn open_system(&self, scope: StoreScope, name: &str) -> Result<StoreHandle, ProviderError> {
    let location = match scope {
      StoreScope::CurrentUser => CERT_SYSTEM_STORE_CURRENT_USER,
      StoreScope::LocalMachine => CERT_SYSTEM_STORE_LOCAL_MACHINE,
    };
    let name_wide = to_wide(name);

    // SAFETY: `name_wide` is NUL-terminated and outlives the call; the system
    // provider copies what it needs.
    let store = unsafe {
      CertOpenStore(
        CERT_STORE_PROV_SYSTEM_W,
        0,
        0,
        location | CERT_STORE_READONLY_FLAG,
        name_wide.as_ptr() as *const c_void,
      )
    };
    trace!(%scope, name, store = ?store, "CertOpenStore(system)");
    handle_or_last_error(store)
  }

  fn open_collection(&self) -> Result<StoreHandle, ProviderError> {
    // SAFETY: the collection provider takes no parameter.
    let store = unsafe { CertOpenStore(CERT_STORE_PROV_COLLECTION, 0, 0, 0, std::ptr::null()) };
    trace!(store = ?store, "CertOpenStore(collection)");
    handle_or_last_error(store)
  }

  fn add_to_collection(
    &self,
    collection: StoreHandle,
    member: StoreHandle,
    priority: u32,
  ) -> Result<(), ProviderError> {
    // SAFETY: both handles were returned by CertOpenStore and are still open.
    let ok = unsafe { CertAddStoreToCollection(raw(collection), raw(member), 0, priority) };
    if ok == 0 {
      Err(ProviderError::last_os_error())
    } else {
      Ok(())
    }
  }

  fn close(&self, store: StoreHandle, flags: u32) -> bool {
    // SAFETY: forwarded verbatim; CertCloseStore tolerates any handle the
    // caller was given by the system.
    unsafe { (self.close_fn)(raw(store), flags) != 0 }
  }

  fn items(&self, store: StoreHandle) -> Result<Vec<StoreItem>, ProviderError> {
    let mut items = Vec::new();
    let mut context: *mut CERT_CONTEXT = std::ptr::null_mut();

    loop {
      // SAFETY: passing the previous context hands ownership back to the
      // enumerator, which frees it; the loop runs until it returns null.
      context = unsafe { CertEnumCertificatesInStore(raw(store), context) };
      if context.is_null() {
        break;
      }
      items.push(StoreItem {
        subject: subject_name(context),
      });
    }

    Ok(items)
  }
}

fn subject_name(context: *const CERT_CONTEXT) -> String {
  // SAFETY: `context` is a live certificate context from the enumerator.
  // The first call sizes the buffer, the second fills it.
  unsafe {
    let len = CertGetNameStringW(
      context,
      CERT_NAME_SIMPLE_DISPLAY_TYPE,
      0,
      std::ptr::null(),
      std::ptr::null_mut(),
      0,
    );
    if len <= 1 {
      return String::new();
    }
    let mut buffer = vec![0u16; len as usize];
    CertGetNameStringW(
      context,
      CERT_NAME_SIMPLE_DISPLAY_TYPE,
      0,
      std::ptr::null(),
      buffer.as_mut_ptr(),
      len,
    );
    String::from_utf16_lossy(&buffer[..len as usize - 1])
  }
}
