//! Decoding store names from the raw pointers callers pass.

use std::ffi::CStr;

use wcsc_lib::name::StoreName;

/// Read a NUL-terminated 8-bit name. A null pointer is the default store.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated byte string.
pub unsafe fn ansi_name(ptr: *const u8) -> StoreName {
  if ptr.is_null() {
    return StoreName::Default;
  }
  // SAFETY: caller guarantees NUL termination.
  let bytes = unsafe { CStr::from_ptr(ptr.cast()) }.to_bytes();
  StoreName::from_ansi_bytes(bytes)
}

/// Read a NUL-terminated UTF-16 name. A null pointer is the default store.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated UTF-16 string.
pub unsafe fn wide_name(ptr: *const u16) -> StoreName {
  if ptr.is_null() {
    return StoreName::Default;
  }
  // SAFETY: caller guarantees a terminating NUL within the allocation.
  let units = unsafe {
    let mut len = 0;
    while *ptr.add(len) != 0 {
      len += 1;
    }
    std::slice::from_raw_parts(ptr, len)
  };
  StoreName::from_wide_units(units)
}
