use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::{
    ApiError, HttpError, HttpErrorKind, NetworkError, ABORT_MESSAGE, NETWORK_MESSAGE,
    TIMEOUT_MESSAGE, UNKNOWN_MESSAGE,
};

pub type ErrorCause = Arc<dyn StdError + Send + Sync + 'static>;

/// Response headers keyed by lowercase name.
pub type ResponseHeaders = BTreeMap<String, String>;

/// The parts of a non-success HTTP response the mapper looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseParts {
    pub status: u16,
    pub status_text: String,
    pub headers: ResponseHeaders,
    /// Provider error summary extracted from the body, if any.
    pub detail: Option<String>,
}

impl ResponseParts {
    pub fn new(status: u16, status_text: impl Into<String>) -> Self {
        Self {
            status,
            status_text: status_text.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn from_reqwest(response: &reqwest::Response) -> Self {
        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_ascii_lowercase(), value.to_string()))
            })
            .collect();
        Self {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            detail: None,
        }
    }
}

/// Anything that can go wrong before it has been classified.
#[derive(Debug)]
pub enum RawError {
    /// Already classified; passes through untouched.
    Typed(ApiError),
    /// A cancellation signal fired.
    Cancelled {
        message: String,
        cause: Option<ErrorCause>,
    },
    /// The transport failed to connect, send, or keep reading.
    Transport { timed_out: bool, cause: ErrorCause },
    /// A non-success HTTP response.
    Response(ResponseParts),
    /// Any other error value.
    Exception(ErrorCause),
    /// A bare string was raised.
    Text(String),
    /// Nothing at all.
    Empty,
}

/// Wraps a bare string so it can ride along as a cause.
#[derive(Debug)]
struct TextCause(String);

impl fmt::Display for TextCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for TextCause {}

impl From<ApiError> for RawError {
    fn from(err: ApiError) -> Self {
        RawError::Typed(err)
    }
}

impl From<ResponseParts> for RawError {
    fn from(parts: ResponseParts) -> Self {
        RawError::Response(parts)
    }
}

impl From<reqwest::Error> for RawError {
    fn from(err: reqwest::Error) -> Self {
        let timed_out = err.is_timeout();
        if timed_out || err.is_connect() || err.is_request() || err.is_body() {
            RawError::Transport {
                timed_out,
                cause: Arc::new(err),
            }
        } else {
            RawError::Exception(Arc::new(err))
        }
    }
}

impl From<std::io::Error> for RawError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::TimedOut => RawError::Transport {
                timed_out: true,
                cause: Arc::new(err),
            },
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => RawError::Transport {
                timed_out: false,
                cause: Arc::new(err),
            },
            _ => RawError::Exception(Arc::new(err)),
        }
    }
}

impl From<serde_json::Error> for RawError {
    fn from(err: serde_json::Error) -> Self {
        RawError::Exception(Arc::new(err))
    }
}

impl From<tokio::time::error::Elapsed> for RawError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        RawError::Transport {
            timed_out: true,
            cause: Arc::new(err),
        }
    }
}

impl From<Box<dyn StdError + Send + Sync>> for RawError {
    fn from(err: Box<dyn StdError + Send + Sync>) -> Self {
        RawError::Exception(Arc::from(err))
    }
}

impl From<std::convert::Infallible> for RawError {
    fn from(value: std::convert::Infallible) -> Self {
        match value {}
    }
}

impl From<String> for RawError {
    fn from(text: String) -> Self {
        RawError::Text(text)
    }
}

impl From<&str> for RawError {
    fn from(text: &str) -> Self {
        RawError::Text(text.to_string())
    }
}

impl<T: Into<RawError>> From<Option<T>> for RawError {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(RawError::Empty)
    }
}

/// Classify any failure into the closed hierarchy. Total and side-effect free.
pub fn normalize(raw: impl Into<RawError>) -> ApiError {
    normalize_at(raw, Utc::now())
}

/// [`normalize`] with an explicit clock for HTTP-date `retry-after` values.
pub fn normalize_at(raw: impl Into<RawError>, now: DateTime<Utc>) -> ApiError {
    match raw.into() {
        RawError::Typed(err) => err,
        RawError::Cancelled { message, cause } => {
            let message = if message.trim().is_empty() {
                ABORT_MESSAGE.to_string()
            } else {
                message
            };
            ApiError::abort_with(message, cause)
        }
        RawError::Transport {
            timed_out: true,
            cause,
        } => ApiError::Network(NetworkError {
            message: TIMEOUT_MESSAGE.to_string(),
            timed_out: true,
            cause: Some(cause),
        }),
        RawError::Transport { cause, .. } => ApiError::network(NETWORK_MESSAGE, Some(cause)),
        RawError::Exception(cause) if looks_like_transport_failure(&cause.to_string()) => {
            ApiError::network(NETWORK_MESSAGE, Some(cause))
        }
        RawError::Response(parts) => from_response_at(&parts, now),
        RawError::Exception(cause) => {
            let message = cause.to_string();
            if message.trim().is_empty() {
                ApiError::unknown_with(UNKNOWN_MESSAGE, Some(cause))
            } else {
                ApiError::unknown_with(message, Some(cause))
            }
        }
        RawError::Text(text) => {
            ApiError::unknown_with(UNKNOWN_MESSAGE, Some(Arc::new(TextCause(text))))
        }
        RawError::Empty => ApiError::unknown(UNKNOWN_MESSAGE),
    }
}

fn looks_like_transport_failure(message: &str) -> bool {
    const SIGNALS: [&str; 8] = [
        "failed to fetch",
        "networkerror",
        "network error",
        "network request failed",
        "load failed",
        "connection refused",
        "connection reset",
        "error sending request",
    ];
    let lower = message.to_ascii_lowercase();
    SIGNALS.iter().any(|signal| lower.contains(signal))
}

/// Map a non-success response onto the HTTP branch of the hierarchy.
pub fn from_response(parts: &ResponseParts) -> ApiError {
    from_response_at(parts, Utc::now())
}

pub fn from_response_at(parts: &ResponseParts, now: DateTime<Utc>) -> ApiError {
    let retry_after_seconds = if parts.status == 429 {
        parts
            .header("retry-after")
            .and_then(|value| parse_retry_after(value, now))
    } else {
        None
    };

    let mut message = if parts.status_text.trim().is_empty() {
        format!("HTTP {}", parts.status)
    } else {
        format!("HTTP {}: {}", parts.status, parts.status_text.trim())
    };
    if let Some(detail) = parts.detail.as_deref().map(str::trim) {
        if !detail.is_empty() {
            message.push_str(" - ");
            message.push_str(detail);
        }
    }

    ApiError::Http(HttpError {
        kind: HttpErrorKind::from_status(parts.status, retry_after_seconds),
        message,
        status: parts.status,
        status_text: parts.status_text.clone(),
        headers: (!parts.headers.is_empty()).then(|| parts.headers.clone()),
        cause: None,
    })
}

/// Parse a `retry-after` value: delay seconds, else an HTTP-date relative to `now`.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<u64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds);
    }
    if let Ok(seconds) = value.parse::<f64>() {
        if seconds.is_finite() && seconds >= 0.0 {
            return Some(seconds.ceil() as u64);
        }
        return None;
    }
    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let millis = date
        .with_timezone(&Utc)
        .signed_duration_since(now)
        .num_milliseconds()
        .max(0);
    Some((millis as u64).div_ceil(1000))
}
