// Wire types for the signage backend.
//
// Everything here mirrors the backend's JSON contract: camelCase field
// names, `{success, error}` acknowledgement envelope, snake_case command
// kind strings. Domain invariants live in `marquee-core`, not here.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

// ── Acknowledgement envelope ─────────────────────────────────────────

/// The `{success, error?}` envelope every backend response carries.
///
/// Endpoints that return data flatten their payload next to these two
/// fields; the client checks `success` before deserializing the payload.
#[derive(Debug, Deserialize)]
pub struct Ack {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

// ── Device status ────────────────────────────────────────────────────

/// Online/offline state reported by the heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceStatus {
    Online,
    Offline,
}

// ── Pairing ──────────────────────────────────────────────────────────

/// A freshly generated pairing code.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingCodeGrant {
    /// 6-digit code shown on screen for the companion web client.
    pub code: String,
    /// Hard expiry; the backend grants 10 minutes from generation.
    pub expires_at: DateTime<Utc>,
}

/// Outcome of one pairing-status poll.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingPoll {
    pub status: PairingStatus,
    /// Present only when `status` is `Authenticated`.
    #[serde(default)]
    pub credentials: Option<IssuedCredentials>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PairingStatus {
    Pending,
    Authenticated,
    Expired,
}

/// Credentials delivered by the backend once a companion client claims
/// the pairing code. The password is opaque secret material; it is
/// deserialized straight into a [`SecretString`] and never logged.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedCredentials {
    pub username: String,
    pub password: SecretString,
    pub screen_name: String,
}

// ── Commands ─────────────────────────────────────────────────────────

/// A unit of remote work issued by a companion system for this device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub id: String,
    pub device_id: String,
    #[serde(rename = "command")]
    pub kind: CommandKind,
    pub status: CommandStatus,
    /// Opaque structured data interpreted by the handler.
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Closed enumeration of command kinds the backend may issue.
///
/// Unknown strings are preserved in [`Unknown`](CommandKind::Unknown) so
/// the dispatcher can report "no handler registered" instead of silently
/// dropping a command it cannot parse.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CommandKind {
    PreviewContent,
    ScreenShare,
    SyncStatus,
    Logout,
    Unknown(String),
}

impl CommandKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::PreviewContent => "preview_content",
            Self::ScreenShare => "screen_share",
            Self::SyncStatus => "sync_status",
            Self::Logout => "logout",
            Self::Unknown(s) => s,
        }
    }
}

impl From<String> for CommandKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "preview_content" => Self::PreviewContent,
            "screen_share" => Self::ScreenShare,
            "sync_status" => Self::SyncStatus,
            "logout" => Self::Logout,
            _ => Self::Unknown(s),
        }
    }
}

impl From<CommandKind> for String {
    fn from(kind: CommandKind) -> Self {
        kind.as_str().to_owned()
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote lifecycle status of a command.
///
/// Transitions are monotonic: `pending → processing → {completed, failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Response payload of the command poll endpoint.
#[derive(Debug, Deserialize)]
pub struct CommandBatch {
    #[serde(default)]
    pub commands: Vec<Command>,
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_kind_round_trips_known_strings() {
        for (s, kind) in [
            ("preview_content", CommandKind::PreviewContent),
            ("screen_share", CommandKind::ScreenShare),
            ("sync_status", CommandKind::SyncStatus),
            ("logout", CommandKind::Logout),
        ] {
            assert_eq!(CommandKind::from(s.to_owned()), kind);
            assert_eq!(kind.as_str(), s);
        }
    }

    #[test]
    fn command_kind_preserves_unknown_strings() {
        let kind = CommandKind::from("reboot_device".to_owned());
        assert_eq!(kind, CommandKind::Unknown("reboot_device".into()));
        assert_eq!(kind.as_str(), "reboot_device");
    }

    #[test]
    fn deserialize_command() {
        let json = r#"{
            "id": "c1",
            "deviceId": "dev-1",
            "command": "sync_status",
            "status": "pending",
            "payload": { "force": true },
            "createdAt": "2026-02-10T12:00:00Z"
        }"#;

        let cmd: Command = serde_json::from_str(json).expect("valid command");
        assert_eq!(cmd.id, "c1");
        assert_eq!(cmd.device_id, "dev-1");
        assert_eq!(cmd.kind, CommandKind::SyncStatus);
        assert_eq!(cmd.status, CommandStatus::Pending);
        assert_eq!(cmd.payload["force"], true);
    }

    #[test]
    fn deserialize_command_without_payload() {
        let json = r#"{
            "id": "c2",
            "deviceId": "dev-1",
            "command": "logout",
            "status": "pending"
        }"#;

        let cmd: Command = serde_json::from_str(json).expect("valid command");
        assert_eq!(cmd.kind, CommandKind::Logout);
        assert!(cmd.payload.is_null());
        assert!(cmd.created_at.is_none());
    }

    #[test]
    fn status_strings_are_snake_case() {
        assert_eq!(CommandStatus::Processing.to_string(), "processing");
        assert_eq!(DeviceStatus::Offline.to_string(), "offline");
        assert_eq!(PairingStatus::Authenticated.to_string(), "authenticated");
    }
}
