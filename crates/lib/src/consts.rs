pub const APP_NAME: &str = "wcsc";

/// System store opened when a caller does not name one.
pub const DEFAULT_STORE_NAME: &str = "MY";

/// Default upper bound on distinct aggregates held by the name cache.
pub const DEFAULT_MAX_STORES: usize = 64;

pub const ENV_LOG: &str = "WCSC_LOG";
pub const ENV_MAX_STORES: &str = "WCSC_MAX_STORES";
pub const ENV_DEFAULT_STORE: &str = "WCSC_DEFAULT_STORE";
pub const ENV_EAGER_DEFAULT: &str = "WCSC_EAGER_DEFAULT";
pub const ENV_HOOK_WIDE: &str = "WCSC_HOOK_WIDE";
pub const ENV_ENCODING_POLICY: &str = "WCSC_ENCODING_POLICY";
