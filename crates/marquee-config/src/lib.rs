//! On-disk configuration for the Marquee agent.
//!
//! TOML file + `MARQUEE_*` environment overlay, credential resolution
//! (env-named key or plaintext), and translation to
//! `marquee_core::AgentConfig`. The agent binary depends on this crate;
//! core never reads config files itself.

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use marquee_core::{AgentConfig, TlsVerification};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config struct ──────────────────────────────────────────────

/// Top-level TOML configuration for one agent install.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Backend base URL (e.g., "https://signage.example.com").
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    /// API key (plaintext — prefer `api_key_env`).
    pub api_key: Option<String>,

    /// Environment variable name containing the API key.
    pub api_key_env: Option<String>,

    /// Free-form device description shown in the pairing UI.
    pub device_info: Option<String>,

    /// Heartbeat interval in seconds while on the active screen.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// Command polling fallback interval in seconds.
    #[serde(default = "default_command_poll_secs")]
    pub command_poll_secs: u64,

    /// Pairing-code polling interval in seconds.
    #[serde(default = "default_pairing_poll_secs")]
    pub pairing_poll_secs: u64,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Skip TLS verification (self-hosted backends with self-signed
    /// certs).
    #[serde(default)]
    pub insecure: bool,

    /// Path to a custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override the data directory (device identity + session store).
    pub data_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            api_key: None,
            api_key_env: None,
            device_info: None,
            heartbeat_secs: default_heartbeat_secs(),
            command_poll_secs: default_command_poll_secs(),
            pairing_poll_secs: default_pairing_poll_secs(),
            timeout_secs: default_timeout_secs(),
            insecure: false,
            ca_cert: None,
            data_dir: None,
        }
    }
}

fn default_backend_url() -> String {
    "http://localhost:8787".into()
}
fn default_heartbeat_secs() -> u64 {
    30
}
fn default_command_poll_secs() -> u64 {
    2
}
fn default_pairing_poll_secs() -> u64 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

// ── Paths ───────────────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "marquee", "marquee").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Default data directory for the device identity and session store.
pub fn data_dir() -> PathBuf {
    ProjectDirs::from("com", "marquee", "marquee")
        .map_or_else(dirs_fallback, |dirs| dirs.data_dir().to_path_buf())
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".local");
    p.push("share");
    p.push("marquee");
    p
}

// ── Loading ─────────────────────────────────────────────────────────

/// Load the Config from an explicit file (or the canonical path) plus
/// the `MARQUEE_*` environment overlay.
pub fn load_config(path: Option<&PathBuf>) -> Result<Config, ConfigError> {
    let path = path.cloned().unwrap_or_else(config_path);

    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("MARQUEE_"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Serialize config to TOML and write it to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    let path = config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(&path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the API key: env-named variable first, then plaintext.
/// An agent may legitimately run without one (open backends).
pub fn resolve_api_key(config: &Config) -> Option<SecretString> {
    if let Some(ref env_name) = config.api_key_env {
        if let Ok(val) = std::env::var(env_name) {
            return Some(SecretString::from(val));
        }
    }

    config.api_key.clone().map(SecretString::from)
}

// ── Translation to runtime config ───────────────────────────────────

/// Build an [`AgentConfig`] from the on-disk config.
pub fn to_agent_config(config: &Config) -> Result<AgentConfig, ConfigError> {
    let backend_url: url::Url =
        config
            .backend_url
            .parse()
            .map_err(|_| ConfigError::Validation {
                field: "backend_url".into(),
                reason: format!("invalid URL: {}", config.backend_url),
            })?;

    for (field, value) in [
        ("heartbeat_secs", config.heartbeat_secs),
        ("command_poll_secs", config.command_poll_secs),
        ("pairing_poll_secs", config.pairing_poll_secs),
        ("timeout_secs", config.timeout_secs),
    ] {
        if value == 0 {
            return Err(ConfigError::Validation {
                field: field.into(),
                reason: "must be greater than zero".into(),
            });
        }
    }

    let tls = if config.insecure {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca_path) = config.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::SystemDefaults
    };

    Ok(AgentConfig {
        backend_url,
        api_key: resolve_api_key(config),
        tls,
        timeout: Duration::from_secs(config.timeout_secs),
        heartbeat_interval: Duration::from_secs(config.heartbeat_secs),
        command_poll_interval: Duration::from_secs(config.command_poll_secs),
        pairing_poll_interval: Duration::from_secs(config.pairing_poll_secs),
        device_info: config.device_info.clone(),
        data_dir: config.data_dir.clone().unwrap_or_else(data_dir),
    })
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_translate_cleanly() {
        let config = Config::default();
        let agent = to_agent_config(&config).expect("valid defaults");

        assert_eq!(agent.backend_url.as_str(), "http://localhost:8787/");
        assert_eq!(agent.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(agent.command_poll_interval, Duration::from_secs(2));
        assert_eq!(agent.pairing_poll_interval, Duration::from_secs(3));
        assert_eq!(agent.tls, TlsVerification::SystemDefaults);
        assert!(agent.api_key.is_none());
    }

    #[test]
    fn invalid_backend_url_is_rejected() {
        let config = Config {
            backend_url: "not a url".into(),
            ..Config::default()
        };

        let err = to_agent_config(&config).expect_err("invalid URL");
        assert!(err.to_string().contains("backend_url"));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let config = Config {
            command_poll_secs: 0,
            ..Config::default()
        };

        let err = to_agent_config(&config).expect_err("zero interval");
        assert!(err.to_string().contains("command_poll_secs"));
    }

    #[test]
    fn insecure_flag_wins_over_ca_cert() {
        let config = Config {
            insecure: true,
            ca_cert: Some(PathBuf::from("/tmp/ca.pem")),
            ..Config::default()
        };

        let agent = to_agent_config(&config).expect("valid");
        assert_eq!(agent.tls, TlsVerification::DangerAcceptInvalid);
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
                backend_url = "https://signage.example.com"
                heartbeat_secs = 20
                device_info = "Lobby TV"
            "#,
        )
        .expect("write config");

        let config = load_config(Some(&path)).expect("load");
        assert_eq!(config.backend_url, "https://signage.example.com");
        assert_eq!(config.heartbeat_secs, 20);
        assert_eq!(config.device_info.as_deref(), Some("Lobby TV"));
        // Untouched fields keep their defaults.
        assert_eq!(config.command_poll_secs, 2);
    }

    #[test]
    fn plaintext_api_key_resolves() {
        let config = Config {
            api_key: Some("abc123".into()),
            ..Config::default()
        };

        assert!(resolve_api_key(&config).is_some());
    }
}
