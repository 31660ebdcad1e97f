//! Human-readable rendering of [`ApiError`] values.
//!
//! Every error that reaches this module has already been through
//! [`normalize`], so the rules below match on the closed hierarchy plus a
//! handful of substring checks on the message.

use std::error::Error;
use std::fmt;

use crate::core::errors::{normalize, ApiError, HttpErrorKind, RawError, UNKNOWN_MESSAGE};

/// What happened, why, and what the user can do about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HumanError {
    pub title: String,
    pub message: String,
    pub action: String,
}

impl HumanError {
    fn new(title: &str, message: impl Into<String>, action: &str) -> Self {
        Self {
            title: title.to_string(),
            message: message.into(),
            action: action.to_string(),
        }
    }
}

impl fmt::Display for HumanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} {}", self.title, self.message, self.action)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    Error,
}

impl ToastKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ToastKind::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub kind: ToastKind,
    pub title: String,
    pub message: String,
}

const FALLBACK_TITLE: &str = "Unerwarteter Fehler";

pub fn human_error(error: &ApiError) -> HumanError {
    if error.is_missing_key() {
        return HumanError::new(
            "Kein API-Schlüssel",
            "Es ist kein API-Schlüssel für den Anbieter hinterlegt.",
            "Hinterlege einen Schlüssel in der Umgebung oder im Schlüsselbund.",
        );
    }

    if error.is_abort() {
        return HumanError::new(
            "Abgebrochen",
            "Die Anfrage wurde abgebrochen.",
            "Sende die Nachricht erneut, wenn du fortfahren möchtest.",
        );
    }

    let lowered = error.message().to_lowercase();
    if ["credit", "quota", "insufficient funds", "insufficient balance"]
        .iter()
        .any(|needle| lowered.contains(needle))
    {
        return HumanError::new(
            "Guthaben aufgebraucht",
            "Das Kontingent beim Anbieter ist erschöpft.",
            "Lade Guthaben auf oder wähle ein kostenloses Modell.",
        );
    }

    match error {
        ApiError::Http(http) => match http.kind {
            HttpErrorKind::Authentication => HumanError::new(
                "Authentifizierung fehlgeschlagen",
                "Der Anbieter hat den API-Schlüssel abgelehnt.",
                "Prüfe den hinterlegten Schlüssel und versuche es erneut.",
            ),
            HttpErrorKind::Permission => HumanError::new(
                "Zugriff verweigert",
                "Der Schlüssel hat keinen Zugriff auf dieses Modell.",
                "Prüfe die Berechtigungen deines Kontos oder wähle ein anderes Modell.",
            ),
            HttpErrorKind::NotFound => HumanError::new(
                "Modell nicht gefunden",
                "Das angefragte Modell oder der Endpunkt existiert nicht.",
                "Wähle ein anderes Modell oder prüfe die Basis-URL.",
            ),
            HttpErrorKind::RateLimit {
                retry_after_seconds,
            } => HumanError::new(
                "Rate-Limit erreicht",
                match retry_after_seconds {
                    Some(seconds) if seconds > 0 => format!(
                        "Zu viele Anfragen in kurzer Zeit. Bitte warte {seconds} Sekunden."
                    ),
                    _ => "Zu viele Anfragen in kurzer Zeit.".to_string(),
                },
                "Warte kurz und versuche es dann erneut.",
            ),
            HttpErrorKind::Server => HumanError::new(
                "Serverfehler beim Anbieter",
                format!("Der Anbieter meldet einen Fehler ({}).", http.status),
                "Versuche es in einem Moment erneut.",
            ),
            HttpErrorKind::Client => HumanError::new(
                "Ungültige Anfrage",
                http.message.clone(),
                "Prüfe Modell und Parameter der Anfrage.",
            ),
            HttpErrorKind::Other => fallback(error),
        },
        ApiError::Network(network) if network.timed_out => stream_timeout(),
        ApiError::Network(network)
            if mentions_proxy(&lowered)
                || network.cause.as_deref().is_some_and(cause_mentions_proxy) =>
        {
            proxy_unreachable()
        }
        ApiError::Network(_) => HumanError::new(
            "Keine Verbindung",
            "Der Anbieter ist nicht erreichbar.",
            "Prüfe deine Internetverbindung und versuche es erneut.",
        ),
        ApiError::Unknown(_) if mentions_proxy(&lowered) => proxy_unreachable(),
        ApiError::Unknown(_) if lowered.contains("timeout") || lowered.contains("timed out") => {
            stream_timeout()
        }
        _ => fallback(error),
    }
}

/// Normalizes `raw` first, then renders it.
pub fn human_error_raw(raw: impl Into<RawError>) -> HumanError {
    human_error(&normalize(raw))
}

/// Toast payload for `error`. Cancellations are not errors and yield `None`.
pub fn toast_for(error: &ApiError) -> Option<Toast> {
    if error.is_abort() {
        return None;
    }
    let human = human_error(error);
    Some(Toast {
        kind: ToastKind::Error,
        title: human.title,
        message: format!("{} {}", human.message, human.action),
    })
}

fn mentions_proxy(lowered: &str) -> bool {
    lowered.contains("proxy")
}

/// Transport errors carry a generic message; the proxy shows up in the cause chain.
fn cause_mentions_proxy(cause: &(dyn Error + Send + Sync + 'static)) -> bool {
    std::iter::successors(Some(cause as &(dyn Error + 'static)), |err| (*err).source())
        .any(|err| mentions_proxy(&err.to_string().to_lowercase()))
}

fn proxy_unreachable() -> HumanError {
    HumanError::new(
        "Proxy nicht erreichbar",
        "Der Vermittlungsdienst antwortet nicht.",
        "Versuche es später erneut oder hinterlege einen eigenen API-Schlüssel.",
    )
}

fn stream_timeout() -> HumanError {
    HumanError::new(
        "Zeitüberschreitung",
        "Die Antwort des Modells ist ins Stocken geraten.",
        "Versuche es erneut oder wähle ein schnelleres Modell.",
    )
}

fn fallback(error: &ApiError) -> HumanError {
    let message = if error.message().trim().is_empty() {
        UNKNOWN_MESSAGE.to_string()
    } else {
        error.message().to_string()
    };
    HumanError::new(FALLBACK_TITLE, message, "Versuche es erneut.")
}
