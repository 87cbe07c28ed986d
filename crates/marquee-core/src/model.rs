// ── Domain model ──
//
// Session and pairing state owned by the AuthSessionManager. Everything
// here is plain data; lifecycle rules live in `session.rs`. Other
// components only ever see immutable snapshots of these types.

use chrono::{DateTime, Utc};
use secrecy::SecretString;

pub use marquee_api::{Command, CommandKind, CommandStatus};

// ── ConnectionStatus ─────────────────────────────────────────────────

/// Health of the command push channel, observable by diagnostics/UI.
///
/// Written only by the dispatcher; the polling fallback keeps commands
/// flowing even while this reads `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl From<marquee_api::PushState> for ConnectionStatus {
    fn from(state: marquee_api::PushState) -> Self {
        match state {
            marquee_api::PushState::Disconnected => Self::Disconnected,
            marquee_api::PushState::Connecting => Self::Connecting,
            marquee_api::PushState::Connected => Self::Connected,
        }
    }
}

// ── SessionState ─────────────────────────────────────────────────────

/// Lifecycle state of the authentication session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Uninitialized,
    Initializing,
    Unauthenticated,
    Authenticated,
    LoggingOut,
}

// ── PairingCode ──────────────────────────────────────────────────────

/// A short-lived, single-use code representing an unauthenticated
/// device waiting to be claimed by a companion client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingCode {
    /// 6-digit code displayed for the operator.
    pub code: String,
    /// Hard expiry. The local clock check wins over stale backend
    /// responses: a code past this instant is never treated as valid.
    pub expires_at: DateTime<Utc>,
}

impl PairingCode {
    /// Whether the code is expired at the given instant.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether the code is expired right now.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

// ── DeviceSession ────────────────────────────────────────────────────

/// The authoritative record of "who this device is logged in as."
///
/// Invariants (enforced by the constructors below, which are the only
/// way `AuthSessionManager` builds snapshots):
/// - `is_authenticated` implies `username`, `password` and `screen_name`
///   are all present and `auth_code` is `None`.
/// - `auth_code` present implies `is_authenticated == false`.
#[derive(Debug, Clone, Default)]
pub struct DeviceSession {
    /// Stable per-install identifier, set once.
    pub device_id: String,
    pub username: Option<String>,
    /// Opaque secret; never logged in full ([`SecretString`] redacts
    /// its `Debug` output).
    pub password: Option<SecretString>,
    pub screen_name: Option<String>,
    pub is_authenticated: bool,
    /// Outstanding pairing code, if any.
    pub auth_code: Option<PairingCode>,
}

impl DeviceSession {
    /// An empty, unauthenticated session for the given device.
    pub fn empty(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ..Self::default()
        }
    }

    /// An authenticated session. Consumes the pairing code by
    /// construction: an authenticated snapshot never carries one.
    pub fn authenticated(
        device_id: impl Into<String>,
        username: impl Into<String>,
        password: SecretString,
        screen_name: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            username: Some(username.into()),
            password: Some(password),
            screen_name: Some(screen_name.into()),
            is_authenticated: true,
            auth_code: None,
        }
    }

    /// An unauthenticated session holding an outstanding pairing code.
    pub fn pairing(device_id: impl Into<String>, code: PairingCode) -> Self {
        Self {
            device_id: device_id.into(),
            auth_code: Some(code),
            ..Self::default()
        }
    }

    /// All four fields the status-push endpoint requires, or `None` if
    /// any is missing.
    pub fn heartbeat_identity(&self) -> Option<(&str, &str, &str, &SecretString)> {
        Some((
            self.device_id.as_str(),
            self.screen_name.as_deref()?,
            self.username.as_deref()?,
            self.password.as_ref()?,
        ))
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn code_expiring_in(minutes: i64) -> PairingCode {
        PairingCode {
            code: "197695".into(),
            expires_at: Utc::now() + Duration::minutes(minutes),
        }
    }

    #[test]
    fn pairing_code_expiry_is_local() {
        let code = code_expiring_in(10);
        assert!(!code.is_expired());
        assert!(code.is_expired_at(code.expires_at));
        assert!(code.is_expired_at(code.expires_at + Duration::seconds(1)));
    }

    #[test]
    fn authenticated_session_holds_invariant() {
        let session =
            DeviceSession::authenticated("dev-1", "lobby", "x".to_string().into(), "Lobby");
        assert!(session.is_authenticated);
        assert!(session.auth_code.is_none());
        assert!(session.heartbeat_identity().is_some());
    }

    #[test]
    fn pairing_session_is_unauthenticated() {
        let session = DeviceSession::pairing("dev-1", code_expiring_in(10));
        assert!(!session.is_authenticated);
        assert!(session.auth_code.is_some());
        assert!(session.heartbeat_identity().is_none());
    }

    #[test]
    fn empty_session_has_no_identity() {
        let session = DeviceSession::empty("dev-1");
        assert!(!session.is_authenticated);
        assert!(session.heartbeat_identity().is_none());
    }
}
