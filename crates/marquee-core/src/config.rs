// ── Runtime agent configuration ──
//
// These types describe *how* the agent talks to the backend and where
// it keeps local state. They carry credential data and tuning, but
// never touch disk themselves -- the config crate constructs an
// `AgentConfig` and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict). Default.
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(PathBuf),
    /// Skip verification (self-hosted backends with self-signed certs).
    DangerAcceptInvalid,
}

/// Configuration for one agent instance.
///
/// Built by the shell/config layer, passed to `Agent` -- core never
/// reads config files.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Backend base URL (e.g., `https://signage.example.com`).
    pub backend_url: Url,
    /// Optional API key attached to every backend request.
    pub api_key: Option<SecretString>,
    /// TLS verification strategy.
    pub tls: TlsVerification,
    /// Request timeout.
    pub timeout: Duration,
    /// Heartbeat interval while authenticated and on the active screen.
    pub heartbeat_interval: Duration,
    /// Command polling fallback interval.
    pub command_poll_interval: Duration,
    /// Pairing-code status polling interval.
    pub pairing_poll_interval: Duration,
    /// Free-form device description sent with pairing-code requests.
    pub device_info: Option<String>,
    /// Directory for the device identity and session store files.
    pub data_dir: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            backend_url: Url::parse("http://localhost:8787").expect("static URL is valid"),
            api_key: None,
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(30),
            command_poll_interval: Duration::from_secs(2),
            pairing_poll_interval: Duration::from_secs(3),
            device_info: None,
            data_dir: std::env::temp_dir().join("marquee"),
        }
    }
}
