use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::SamplingParams;
use crate::core::constants::{
    DEFAULT_API_KEY_ENV, DEFAULT_APP_REFERER, DEFAULT_APP_TITLE, DEFAULT_BASE_URL,
    DEFAULT_KEYRING_ACCOUNT, DEFAULT_KEYRING_SERVICE, DEFAULT_MODEL,
};
use crate::core::credentials::{Credentials, KeySource};
use crate::utils::auth::Attribution;

/// On-disk settings. Every field is optional; the accessors below fill in
/// defaults so a missing or empty file still yields a working client.
#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    /// Provider endpoint, e.g. "https://openrouter.ai/api/v1"
    pub base_url: Option<String>,
    pub default_model: Option<String>,
    /// Environment variable holding the API key
    pub api_key_env: Option<String>,
    pub keyring_service: Option<String>,
    pub keyring_account: Option<String>,
    /// Seconds to wait for the next streamed chunk before giving up
    pub read_timeout_secs: Option<u64>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Sent as `HTTP-Referer`
    pub app_referer: Option<String>,
    /// Sent as `X-Title`
    pub app_title: Option<String>,
}

impl Config {
    pub fn base_url(&self) -> &str {
        non_blank(&self.base_url).unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn model(&self) -> &str {
        non_blank(&self.default_model).unwrap_or(DEFAULT_MODEL)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn system_prompt(&self) -> Option<&str> {
        non_blank(&self.system_prompt)
    }

    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            top_p: self.top_p,
            presence_penalty: self.presence_penalty,
            max_tokens: self.max_tokens,
        }
    }

    /// Key lookup chain: optional explicit key, then the environment, then
    /// the system keyring.
    pub fn credentials(&self, explicit_key: Option<String>) -> Credentials {
        let mut credentials = Credentials::none();
        if let Some(key) = explicit_key.filter(|key| !key.trim().is_empty()) {
            credentials = credentials.with_source(KeySource::Static(key));
        }
        credentials
            .with_source(KeySource::Env(
                non_blank(&self.api_key_env)
                    .unwrap_or(DEFAULT_API_KEY_ENV)
                    .to_string(),
            ))
            .with_source(KeySource::Keyring {
                service: non_blank(&self.keyring_service)
                    .unwrap_or(DEFAULT_KEYRING_SERVICE)
                    .to_string(),
                account: non_blank(&self.keyring_account)
                    .unwrap_or(DEFAULT_KEYRING_ACCOUNT)
                    .to_string(),
            })
    }

    pub fn attribution(&self) -> Attribution {
        Attribution::new(
            Some(
                non_blank(&self.app_referer)
                    .unwrap_or(DEFAULT_APP_REFERER)
                    .to_string(),
            ),
            Some(
                non_blank(&self.app_title)
                    .unwrap_or(DEFAULT_APP_TITLE)
                    .to_string(),
            ),
        )
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
