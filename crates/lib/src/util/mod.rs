//! Shared utilities.
//!
//! Test doubles for the provider and interceptor capabilities.

#[cfg(test)]
pub mod testutil;
