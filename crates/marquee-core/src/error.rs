// ── Core error types ──
//
// User-facing errors from marquee-core. These are NOT API-specific --
// consumers never see HTTP status codes or JSON parse failures directly.
// The `From<marquee_api::Error>` impl translates transport-layer errors
// into domain-appropriate variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach backend: {reason}")]
    ConnectionFailed { reason: String },

    /// The backend rejected credentials or a pairing code. The message
    /// is the backend's error string, surfaced verbatim.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    // ── Precondition errors ──────────────────────────────────────────
    /// Device-ID resolution has not completed yet. Retryable -- the
    /// platform may deliver the identifier after app start.
    #[error("Device ID not available yet")]
    DeviceIdUnavailable,

    #[error("No authenticated session")]
    NotAuthenticated,

    #[error("Session is already authenticated")]
    AlreadyAuthenticated,

    // ── Pairing errors ───────────────────────────────────────────────
    #[error("Pairing failed: {message}")]
    PairingFailed { message: String },

    // ── Command errors ───────────────────────────────────────────────
    /// A command handler reported failure. The message travels back to
    /// the backend in the `failed` acknowledgement.
    #[error("Command handler failed: {message}")]
    Handler { message: String },

    // ── Persistence errors ───────────────────────────────────────────
    #[error("Session storage error: {message}")]
    Storage { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("Backend error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<marquee_api::Error> for CoreError {
    fn from(err: marquee_api::Error) -> Self {
        match err {
            marquee_api::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            marquee_api::Error::Backend { message } => CoreError::Api {
                message,
                status: None,
            },
            marquee_api::Error::Http { status, message } => CoreError::Api {
                message,
                status: Some(status),
            },
            marquee_api::Error::Transport(ref e) => CoreError::ConnectionFailed {
                reason: e.to_string(),
            },
            marquee_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            marquee_api::Error::Tls(msg) => CoreError::ConnectionFailed {
                reason: format!("TLS error: {msg}"),
            },
            marquee_api::Error::PushConnect(reason) => CoreError::ConnectionFailed {
                reason: format!("push channel: {reason}"),
            },
            marquee_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}
