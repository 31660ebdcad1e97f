//! Typed failures for everything between a send and a rendered transcript.
//!
//! [`ApiError`] is a closed hierarchy: network (with timeouts), user
//! cancellation, HTTP status failures split by class, and a catch-all. All raw
//! failures are funnelled through [`normalize`] before they reach state or the
//! presenter.

mod mapper;

pub use mapper::{
    from_response, from_response_at, normalize, normalize_at, parse_retry_after, ErrorCause,
    RawError, ResponseHeaders, ResponseParts,
};

use std::error::Error as StdError;
use std::fmt;

/// Message used when a cancellation carries no text of its own.
pub const ABORT_MESSAGE: &str = "Die Anfrage wurde abgebrochen.";

/// Message used for failed transports regardless of the platform wording.
pub const NETWORK_MESSAGE: &str = "Netzwerkfehler: Verbindung fehlgeschlagen.";

/// Message used for transports that gave up waiting.
pub const TIMEOUT_MESSAGE: &str = "Zeitüberschreitung: Die Verbindung dauerte zu lange.";

/// Message used when a failure carries nothing usable.
pub const UNKNOWN_MESSAGE: &str = "Ein unbekannter Fehler ist aufgetreten.";

/// Sentinel message for a missing API credential.
pub const NO_API_KEY: &str = "NO_API_KEY";

#[derive(Debug, Clone)]
pub enum ApiError {
    Network(NetworkError),
    Abort(AbortError),
    Http(HttpError),
    Unknown(UnknownError),
}

/// Transport-level failure. `timed_out` marks the `TimeoutError` subclass.
#[derive(Debug, Clone)]
pub struct NetworkError {
    pub message: String,
    pub timed_out: bool,
    pub cause: Option<ErrorCause>,
}

#[derive(Debug, Clone)]
pub struct AbortError {
    pub message: String,
    pub cause: Option<ErrorCause>,
}

#[derive(Debug, Clone)]
pub struct HttpError {
    pub kind: HttpErrorKind,
    pub message: String,
    pub status: u16,
    pub status_text: String,
    pub headers: Option<ResponseHeaders>,
    pub cause: Option<ErrorCause>,
}

/// Second tier of the HTTP branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpErrorKind {
    Authentication,
    Permission,
    NotFound,
    RateLimit { retry_after_seconds: Option<u64> },
    Client,
    Server,
    /// Non-success status outside 4xx/5xx.
    Other,
}

#[derive(Debug, Clone)]
pub struct UnknownError {
    pub message: String,
    pub cause: Option<ErrorCause>,
}

impl HttpErrorKind {
    pub fn from_status(status: u16, retry_after_seconds: Option<u64>) -> Self {
        match status {
            401 => HttpErrorKind::Authentication,
            403 => HttpErrorKind::Permission,
            404 => HttpErrorKind::NotFound,
            429 => HttpErrorKind::RateLimit {
                retry_after_seconds,
            },
            400..=499 => HttpErrorKind::Client,
            500..=599 => HttpErrorKind::Server,
            _ => HttpErrorKind::Other,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HttpErrorKind::Authentication => "AuthenticationError",
            HttpErrorKind::Permission => "PermissionError",
            HttpErrorKind::NotFound => "NotFoundError",
            HttpErrorKind::RateLimit { .. } => "RateLimitError",
            HttpErrorKind::Client => "ApiClientError",
            HttpErrorKind::Server => "ApiServerError",
            HttpErrorKind::Other => "HttpError",
        }
    }
}

impl ApiError {
    pub fn abort() -> Self {
        Self::abort_with(ABORT_MESSAGE, None)
    }

    pub fn abort_with(message: impl Into<String>, cause: Option<ErrorCause>) -> Self {
        ApiError::Abort(AbortError {
            message: message.into(),
            cause,
        })
    }

    pub fn network(message: impl Into<String>, cause: Option<ErrorCause>) -> Self {
        ApiError::Network(NetworkError {
            message: message.into(),
            timed_out: false,
            cause,
        })
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        ApiError::Network(NetworkError {
            message: message.into(),
            timed_out: true,
            cause: None,
        })
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::unknown_with(message, None)
    }

    pub fn unknown_with(message: impl Into<String>, cause: Option<ErrorCause>) -> Self {
        ApiError::Unknown(UnknownError {
            message: message.into(),
            cause,
        })
    }

    pub fn missing_key() -> Self {
        Self::unknown(NO_API_KEY)
    }

    /// A rate-limit error built locally, e.g. for an active cooldown.
    pub fn rate_limited(message: impl Into<String>, retry_after_seconds: Option<u64>) -> Self {
        ApiError::Http(HttpError {
            kind: HttpErrorKind::RateLimit {
                retry_after_seconds,
            },
            message: message.into(),
            status: 429,
            status_text: "Too Many Requests".to_string(),
            headers: None,
            cause: None,
        })
    }

    /// Class name within the hierarchy, e.g. `"RateLimitError"`.
    pub fn name(&self) -> &'static str {
        match self {
            ApiError::Network(err) if err.timed_out => "TimeoutError",
            ApiError::Network(_) => "NetworkError",
            ApiError::Abort(_) => "AbortError",
            ApiError::Http(err) => err.kind.name(),
            ApiError::Unknown(_) => "UnknownError",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::Network(err) => &err.message,
            ApiError::Abort(err) => &err.message,
            ApiError::Http(err) => &err.message,
            ApiError::Unknown(err) => &err.message,
        }
    }

    pub fn cause(&self) -> Option<&ErrorCause> {
        match self {
            ApiError::Network(err) => err.cause.as_ref(),
            ApiError::Abort(err) => err.cause.as_ref(),
            ApiError::Http(err) => err.cause.as_ref(),
            ApiError::Unknown(err) => err.cause.as_ref(),
        }
    }

    pub fn http_kind(&self) -> Option<HttpErrorKind> {
        match self {
            ApiError::Http(err) => Some(err.kind),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http(err) => Some(err.status),
            _ => None,
        }
    }

    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self.http_kind() {
            Some(HttpErrorKind::RateLimit {
                retry_after_seconds,
            }) => retry_after_seconds,
            _ => None,
        }
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, ApiError::Abort(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ApiError::Network(err) if err.timed_out)
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self.http_kind(), Some(HttpErrorKind::RateLimit { .. }))
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self.http_kind(), Some(HttpErrorKind::Authentication))
    }

    pub fn is_missing_key(&self) -> bool {
        self.message() == NO_API_KEY
    }

    /// Classes the user may reasonably retry by hand.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Network(_) => true,
            ApiError::Http(err) => matches!(
                err.kind,
                HttpErrorKind::RateLimit { .. } | HttpErrorKind::Server
            ),
            _ => false,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name(), self.message())
    }
}

impl StdError for ApiError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause()
            .map(|cause| &**cause as &(dyn StdError + 'static))
    }
}
