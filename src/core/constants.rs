//! Shared constants used across the application

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

pub const DEFAULT_MODEL: &str = "openrouter/auto";

/// Environment variable consulted for the API key when the config names none.
pub const DEFAULT_API_KEY_ENV: &str = "OPENROUTER_API_KEY";

pub const DEFAULT_KEYRING_SERVICE: &str = "disa";

pub const DEFAULT_KEYRING_ACCOUNT: &str = "openrouter";

pub const DEFAULT_APP_REFERER: &str = "https://disaai.local";

pub const DEFAULT_APP_TITLE: &str = "Disa AI";

/// Cooldown after a rate limit that did not say how long to wait.
pub const DEFAULT_RATE_LIMIT_COOLDOWN_SECS: u64 = 8;

/// No rate-limit cooldown is ever shorter than this.
pub const MIN_RATE_LIMIT_COOLDOWN_SECS: u64 = 3;
