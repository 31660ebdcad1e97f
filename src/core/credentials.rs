//! API key resolution.
//!
//! The transport never stores a key itself; it asks a [`Credentials`] chain
//! right before each request. The first source yielding a non-blank value
//! wins. An exhausted chain is the `NO_API_KEY` failure path.

use std::error::Error;
use std::fmt;

use tracing::{debug, warn};

/// Describes failures when attempting to access the system keyring.
///
/// Recoverable errors mean the backend was temporarily unavailable, for
/// example a locked keychain. Permanent errors carry the underlying cause.
#[derive(Debug)]
pub enum KeyringAccessError {
    Recoverable(keyring::Error),
    Permanent(keyring::Error),
}

impl KeyringAccessError {
    fn inner(&self) -> &keyring::Error {
        match self {
            KeyringAccessError::Recoverable(err) | KeyringAccessError::Permanent(err) => err,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, KeyringAccessError::Recoverable(_))
    }
}

impl From<keyring::Error> for KeyringAccessError {
    fn from(err: keyring::Error) -> Self {
        match err {
            keyring::Error::PlatformFailure(_) | keyring::Error::NoStorageAccess(_) => {
                KeyringAccessError::Recoverable(err)
            }
            other => KeyringAccessError::Permanent(other),
        }
    }
}

impl fmt::Display for KeyringAccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner())
    }
}

impl Error for KeyringAccessError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.inner())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum KeySource {
    /// A key supplied directly, e.g. from a CLI flag.
    Static(String),
    /// Name of an environment variable.
    Env(String),
    Keyring { service: String, account: String },
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::Static(_) => f.write_str("Static(<redacted>)"),
            KeySource::Env(var) => f.debug_tuple("Env").field(var).finish(),
            KeySource::Keyring { service, account } => f
                .debug_struct("Keyring")
                .field("service", service)
                .field("account", account)
                .finish(),
        }
    }
}

impl KeySource {
    fn lookup(&self) -> Result<Option<String>, KeyringAccessError> {
        match self {
            KeySource::Static(value) => Ok(Some(value.clone())),
            KeySource::Env(var) => Ok(std::env::var(var).ok()),
            KeySource::Keyring { service, account } => {
                let entry = keyring::Entry::new(service, account)?;
                match entry.get_password() {
                    Ok(secret) => Ok(Some(secret)),
                    Err(keyring::Error::NoEntry) => Ok(None),
                    Err(err) => Err(err.into()),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Credentials {
    sources: Vec<KeySource>,
}

impl Credentials {
    pub fn new(sources: Vec<KeySource>) -> Self {
        Self { sources }
    }

    pub fn from_key(key: impl Into<String>) -> Self {
        Self::new(vec![KeySource::Static(key.into())])
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: KeySource) -> Self {
        self.sources.push(source);
        self
    }

    pub fn sources(&self) -> &[KeySource] {
        &self.sources
    }

    /// First non-blank key in the chain. Keyring failures are logged and skipped.
    pub fn resolve(&self) -> Option<String> {
        for source in &self.sources {
            match source.lookup() {
                Ok(Some(key)) if !key.trim().is_empty() => {
                    debug!(?source, "resolved API key");
                    return Some(key.trim().to_string());
                }
                Ok(_) => {}
                Err(err) if err.is_recoverable() => {
                    warn!(?source, error = %err, "keyring temporarily unavailable");
                }
                Err(err) => {
                    warn!(?source, error = %err, "keyring lookup failed");
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_non_blank_source_wins() {
        let credentials = Credentials::new(vec![
            KeySource::Static("   ".into()),
            KeySource::Env("DISA_TEST_UNSET_VARIABLE_9F2C".into()),
            KeySource::Static(" sk-test ".into()),
        ]);
        assert_eq!(credentials.resolve().as_deref(), Some("sk-test"));
    }

    #[test]
    fn empty_chain_resolves_to_nothing() {
        assert_eq!(Credentials::none().resolve(), None);
    }

    #[test]
    fn debug_output_redacts_static_keys() {
        let rendered = format!("{:?}", KeySource::Static("sk-secret".into()));
        assert!(!rendered.contains("sk-secret"));
    }
}
