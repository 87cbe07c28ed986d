use thiserror::Error;

/// Top-level error type for the `marquee-api` crate.
///
/// Covers every failure mode across the HTTP gateway and the push
/// channel. `marquee-core` maps these into user-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The backend explicitly rejected credentials or a pairing code.
    /// The message is the backend's error string, verbatim.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Backend ─────────────────────────────────────────────────────
    /// The backend answered `success: false` on a non-auth endpoint.
    #[error("Backend error: {message}")]
    Backend { message: String },

    /// Unexpected HTTP status outside the `{success, error}` envelope.
    #[error("Backend HTTP {status}: {message}")]
    Http { status: u16, message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Push channel ────────────────────────────────────────────────
    /// WebSocket push subscription failed to connect.
    #[error("Push channel connection failed: {0}")]
    PushConnect(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is an explicit credential/code rejection,
    /// as opposed to a connectivity problem.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Returns `true` if this is a transient error worth retrying
    /// on the next tick.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::PushConnect(_) => true,
            _ => false,
        }
    }
}
