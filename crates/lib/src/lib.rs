//! wcsc-lib: unified certificate store engine
//!
//! Makes `CertOpenSystemStore` return a single collection store over the
//! current-user and local-machine stores of the requested name:
//! - `cache`: bounded per-name cache of aggregates
//! - `opener` / `aggregate`: opening the scoped pair and building the union
//! - `close`: faking `CertCloseStore` for cached aggregates
//! - `manager`: installing and removing the redirections around the host
//!   process's lifetime
//!
//! The operating system is reached only through the [`provider::StoreProvider`]
//! and [`intercept::Interceptor`] capabilities, so the engine can be exercised
//! without patching any process memory.

pub mod aggregate;
pub mod cache;
pub mod close;
pub mod config;
pub mod consts;
pub mod error;
pub mod fatal;
pub mod intercept;
pub mod manager;
pub mod name;
pub mod opener;
pub mod probe;
pub mod provider;

#[cfg(test)]
mod util;
