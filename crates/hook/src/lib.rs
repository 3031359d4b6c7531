//! wcsc-hook: injectable DLL that unifies certificate stores
//!
//! Loaded into a target process, the DLL redirects `CertOpenSystemStoreA`,
//! `CertOpenSystemStoreW` and `CertCloseStore` to the engine in `wcsc-lib`
//! for the lifetime of the process. On other platforms only the portable
//! helpers are built.

pub mod logging;
pub mod patch;
pub mod raw;

#[cfg(windows)]
mod detours;
#[cfg(windows)]
mod entry;
