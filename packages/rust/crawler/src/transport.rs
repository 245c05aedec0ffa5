//! The single-attempt fetch contract shared by all three tiers, plus failure classification.

use std::fmt;

use async_trait::async_trait;
use reqwest::StatusCode;
use url::Url;

/// Markers that only appear on bot-mitigation interstitials.
const CHALLENGE_MARKERS: [&str; 6] = [
    "<title>Just a moment...</title>",
    "cf-browser-verification",
    "challenge-platform",
    "cf-chl-",
    "Attention Required! | Cloudflare",
    "Checking your browser before accessing",
];

// ---------------------------------------------------------------------------
// Tier
// ---------------------------------------------------------------------------

/// Which retrieval strategy produced (or failed to produce) a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Pooled, concurrent HTTP.
    Direct,
    /// Headless browser render.
    Browser,
    /// Fresh-session, one-at-a-time HTTP.
    Serial,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Direct => "direct",
            Self::Browser => "browser",
            Self::Serial => "serial",
        })
    }
}

// ---------------------------------------------------------------------------
// FetchError
// ---------------------------------------------------------------------------

/// How a failed attempt should steer the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Timeout, reset, 5xx: worth retrying in the same tier.
    Transient,
    /// Rate limited or challenged: move to the next tier now.
    Blocked,
    /// Bad URL or missing page: no tier will do better.
    Fatal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Transient => "transient",
            Self::Blocked => "blocked",
            Self::Fatal => "fatal",
        })
    }
}

/// A classified single-attempt failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{class}: {message}")]
pub struct FetchError {
    pub class: ErrorClass,
    pub message: String,
}

impl FetchError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Transient, message)
    }

    pub fn blocked(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Blocked, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Fatal, message)
    }

    /// Classify a transport-level `reqwest` failure.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return classify_status(status, &err.to_string());
        }
        if err.is_builder() || err.is_redirect() {
            Self::fatal(err.to_string())
        } else {
            // timeouts, connect/reset errors, truncated bodies
            Self::transient(err.to_string())
        }
    }
}

/// Classify a completed HTTP response. `Ok(())` means the body is usable.
pub fn classify_response(status: StatusCode, body: &str) -> Result<(), FetchError> {
    if is_challenge_page(body) {
        return Err(FetchError::blocked(format!(
            "HTTP {status}: bot-mitigation challenge"
        )));
    }
    if status.is_success() {
        return Ok(());
    }
    Err(classify_status(status, &format!("HTTP {status}")))
}

fn classify_status(status: StatusCode, message: &str) -> FetchError {
    match status.as_u16() {
        403 | 429 => FetchError::blocked(message),
        408 | 500..=599 => FetchError::transient(message),
        _ => FetchError::fatal(message),
    }
}

/// Whether `body` is a bot-mitigation interstitial rather than real content.
pub fn is_challenge_page(body: &str) -> bool {
    CHALLENGE_MARKERS.iter().any(|marker| body.contains(marker))
}

// ---------------------------------------------------------------------------
// FetchTransport
// ---------------------------------------------------------------------------

/// One retrieval attempt for one URL. Retrying and escalation are the orchestrator's job.
#[async_trait]
pub trait FetchTransport: Send + Sync {
    fn tier(&self) -> Tier;

    async fn fetch(&self, url: &Url) -> Result<String, FetchError>;
}
