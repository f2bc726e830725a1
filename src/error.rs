//! Error types for the alert engine

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the alert engine
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    // Session/credential errors
    #[error("No valid session credential obtainable: {0}")]
    AuthUnavailable(String),

    #[error("Login rejected by provider: {0}")]
    LoginRejected(String),

    // Upstream feed errors
    #[error("Upstream fetch failed: {0}")]
    UpstreamFetch(String),

    #[error("Upstream payload malformed: {0}")]
    UpstreamDecode(String),

    // Enrichment errors
    #[error("Enrichment lookup failed: {0}")]
    Enrichment(String),

    // Messaging errors
    #[error("Messaging API error: {0}")]
    Messaging(String),

    #[error("Delivery to {recipient} failed after {attempts} attempts: {reason}")]
    Delivery {
        recipient: i64,
        attempts: u32,
        reason: String,
    },

    // Persistence errors
    #[error("Store error: {0}")]
    Store(String),

    // Webhook errors
    #[error("Malformed webhook payload: {0}")]
    WebhookPayload(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::UpstreamFetch(_) | Error::Enrichment(_) | Error::Messaging(_)
        )
    }

    /// Check if this error aborts the current evaluation cycle
    ///
    /// Everything else is isolated at the definition, match, or recipient
    /// that produced it.
    pub fn is_cycle_fatal(&self) -> bool {
        matches!(self, Error::AuthUnavailable(_) | Error::Config(_))
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
