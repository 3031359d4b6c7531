//! Logical store names as supplied by intercepted callers.
//!
//! `CertOpenSystemStoreA` and `CertOpenSystemStoreW` accept the same logical
//! name in two textual encodings. A [`StoreName`] keeps the text together with
//! the encoding it arrived in, so the cache can decide whether two requests
//! refer to the same entry.

use std::fmt;

use serde::Serialize;

/// Textual encoding a store name was supplied in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NameEncoding {
  /// 8-bit name passed to the `A` entry point.
  Ansi,
  /// UTF-16 name passed to the `W` entry point.
  Wide,
}

impl NameEncoding {
  pub(crate) fn index(self) -> usize {
    match self {
      NameEncoding::Ansi => 0,
      NameEncoding::Wide => 1,
    }
  }
}

impl fmt::Display for NameEncoding {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      NameEncoding::Ansi => write!(f, "ansi"),
      NameEncoding::Wide => write!(f, "wide"),
    }
  }
}

/// A store name requested by a caller.
///
/// `Default` is used when the caller passes no name (a null pointer or an
/// empty string); it maps to the configured default system store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StoreName {
  Default,
  Named { text: String, encoding: NameEncoding },
}

impl StoreName {
  pub fn ansi(text: impl Into<String>) -> Self {
    Self::named(text.into(), NameEncoding::Ansi)
  }

  pub fn wide(text: impl Into<String>) -> Self {
    Self::named(text.into(), NameEncoding::Wide)
  }

  /// Build a name from raw 8-bit bytes (without the terminating NUL).
  ///
  /// Non-UTF-8 bytes are replaced; system store names are plain ASCII.
  pub fn from_ansi_bytes(bytes: &[u8]) -> Self {
    Self::ansi(String::from_utf8_lossy(bytes).into_owned())
  }

  /// Build a name from raw UTF-16 code units (without the terminating NUL).
  pub fn from_wide_units(units: &[u16]) -> Self {
    Self::wide(String::from_utf16_lossy(units))
  }

  fn named(text: String, encoding: NameEncoding) -> Self {
    if text.is_empty() {
      StoreName::Default
    } else {
      StoreName::Named { text, encoding }
    }
  }

  pub fn is_default(&self) -> bool {
    matches!(self, StoreName::Default)
  }

  pub fn encoding(&self) -> Option<NameEncoding> {
    match self {
      StoreName::Default => None,
      StoreName::Named { encoding, .. } => Some(*encoding),
    }
  }

  /// The text to hand to the store provider, substituting `default_store`
  /// for unnamed requests.
  pub fn provider_name<'a>(&'a self, default_store: &'a str) -> &'a str {
    match self {
      StoreName::Default => default_store,
      StoreName::Named { text, .. } => text,
    }
  }

  /// Case-insensitive comparison key. `None` for the default name.
  pub fn normalized(&self) -> Option<String> {
    match self {
      StoreName::Default => None,
      StoreName::Named { text, .. } => Some(text.to_lowercase()),
    }
  }
}

impl fmt::Display for StoreName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      StoreName::Default => write!(f, "<default>"),
      StoreName::Named { text, .. } => write!(f, "{}", text),
    }
  }
}
