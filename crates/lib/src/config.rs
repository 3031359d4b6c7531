//! Engine configuration.
//!
//! The hook runs inside someone else's process and has no command line, so
//! configuration comes from the host's environment. Unset variables fall back
//! to the defaults below; malformed values are rejected.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

use crate::consts::{
  DEFAULT_MAX_STORES, DEFAULT_STORE_NAME, ENV_DEFAULT_STORE, ENV_EAGER_DEFAULT, ENV_ENCODING_POLICY, ENV_HOOK_WIDE,
  ENV_MAX_STORES,
};

/// How the cache treats the same name arriving under both encodings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EncodingPolicy {
  /// Each encoding keys its own entries. A name first opened as ANSI and
  /// later requested as wide builds a second aggregate.
  #[default]
  PerEncoding,
  /// Names are compared across encodings; the second encoding becomes an
  /// alias of the existing entry.
  Unified,
}

impl FromStr for EncodingPolicy {
  type Err = ();

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "per-encoding" => Ok(EncodingPolicy::PerEncoding),
      "unified" => Ok(EncodingPolicy::Unified),
      _ => Err(()),
    }
  }
}

impl fmt::Display for EncodingPolicy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EncodingPolicy::PerEncoding => write!(f, "per-encoding"),
      EncodingPolicy::Unified => write!(f, "unified"),
    }
  }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
  #[error("invalid value for {var}: '{value}' (expected {expected})")]
  Invalid {
    var: &'static str,
    value: String,
    expected: &'static str,
  },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineConfig {
  /// Upper bound on distinct aggregates.
  pub max_stores: usize,
  /// System store opened for unnamed requests.
  pub default_store: String,
  /// Build the default aggregate during activation instead of on first use.
  pub eager_default: bool,
  /// Also redirect `CertOpenSystemStoreW`.
  pub hook_wide: bool,
  pub encoding_policy: EncodingPolicy,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      max_stores: DEFAULT_MAX_STORES,
      default_store: DEFAULT_STORE_NAME.to_string(),
      eager_default: false,
      hook_wide: true,
      encoding_policy: EncodingPolicy::default(),
    }
  }
}

impl EngineConfig {
  /// Read the configuration from `WCSC_*` environment variables.
  pub fn from_env() -> Result<Self, ConfigError> {
    let defaults = Self::default();

    let max_stores = match env_value(ENV_MAX_STORES) {
      Some(value) => match value.parse::<usize>() {
        Ok(n) if n > 0 => n,
        _ => return Err(invalid(ENV_MAX_STORES, value, "a positive integer")),
      },
      None => defaults.max_stores,
    };

    let default_store = env_value(ENV_DEFAULT_STORE).unwrap_or(defaults.default_store);

    let eager_default = env_bool(ENV_EAGER_DEFAULT)?.unwrap_or(defaults.eager_default);
    let hook_wide = env_bool(ENV_HOOK_WIDE)?.unwrap_or(defaults.hook_wide);

    let encoding_policy = match env_value(ENV_ENCODING_POLICY) {
      Some(value) => value
        .parse()
        .map_err(|_| invalid(ENV_ENCODING_POLICY, value, "'per-encoding' or 'unified'"))?,
      None => defaults.encoding_policy,
    };

    Ok(Self {
      max_stores,
      default_store,
      eager_default,
      hook_wide,
      encoding_policy,
    })
  }
}

fn env_value(var: &str) -> Option<String> {
  std::env::var(var)
    .ok()
    .map(|value| value.trim().to_string())
    .filter(|value| !value.is_empty())
}

fn env_bool(var: &'static str) -> Result<Option<bool>, ConfigError> {
  let Some(value) = env_value(var) else {
    return Ok(None);
  };
  match value.to_ascii_lowercase().as_str() {
    "1" | "true" | "yes" | "on" => Ok(Some(true)),
    "0" | "false" | "no" | "off" => Ok(Some(false)),
    _ => Err(invalid(var, value, "a boolean")),
  }
}

fn invalid(var: &'static str, value: String, expected: &'static str) -> ConfigError {
  ConfigError::Invalid { var, value, expected }
}
