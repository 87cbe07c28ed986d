//! Push channel: long-lived command subscription with auto-reconnect.
//!
//! Connects to the backend's per-device WebSocket endpoint and streams
//! newly created [`Command`] records through a [`tokio::sync::broadcast`]
//! channel. Handles reconnection with exponential backoff + jitter
//! automatically, and publishes channel health through a
//! [`tokio::sync::watch`] so the dispatcher can expose it as
//! connection status.
//!
//! # Example
//!
//! ```rust,ignore
//! use marquee_api::push::{PushChannel, ReconnectConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let cancel = CancellationToken::new();
//! let url = client.push_url("dev-1")?;
//!
//! let channel = PushChannel::connect(url, ReconnectConfig::default(), cancel.clone(), None);
//! let mut rx = channel.subscribe();
//!
//! while let Ok(command) = rx.recv().await {
//!     println!("{}: {}", command.id, command.kind);
//! }
//!
//! channel.shutdown();
//! ```

use std::time::Duration;

use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::{broadcast, watch};
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::models::Command;

// ── Broadcast channel capacity ───────────────────────────────────────

const COMMAND_CHANNEL_CAPACITY: usize = 256;

// ── PushState ────────────────────────────────────────────────────────

/// Health of the push subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PushState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for push-channel reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

// ── PushChannel ──────────────────────────────────────────────────────

/// Handle to a running push subscription.
///
/// Drop all handles and call [`shutdown`](Self::shutdown) to tear down
/// the background task. Losing the push channel never loses commands:
/// the polling fallback covers outages.
pub struct PushChannel {
    command_rx: broadcast::Receiver<Command>,
    state_rx: watch::Receiver<PushState>,
    cancel: CancellationToken,
}

impl PushChannel {
    /// Spawn the subscription loop against the given WebSocket URL.
    ///
    /// Returns immediately; the first connection attempt happens
    /// asynchronously. Watch [`state`](Self::state) for
    /// `Connecting → Connected` transitions. If `api_key` is provided
    /// it is injected as an `X-API-Key` header on the upgrade request.
    pub fn connect(
        ws_url: Url,
        reconnect: ReconnectConfig,
        cancel: CancellationToken,
        api_key: Option<SecretString>,
    ) -> Self {
        let (command_tx, command_rx) = broadcast::channel(COMMAND_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(PushState::Disconnected);

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            push_loop(ws_url, command_tx, state_tx, reconnect, task_cancel, api_key).await;
        });

        Self {
            command_rx,
            state_rx,
            cancel,
        }
    }

    /// Get a new broadcast receiver for inbound commands.
    pub fn subscribe(&self) -> broadcast::Receiver<Command> {
        self.command_rx.resubscribe()
    }

    /// Observe connection-state transitions.
    pub fn state(&self) -> watch::Receiver<PushState> {
        self.state_rx.clone()
    }

    /// Signal the background task to shut down gracefully.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: connect → read → on error, backoff → reconnect.
async fn push_loop(
    ws_url: Url,
    command_tx: broadcast::Sender<Command>,
    state_tx: watch::Sender<PushState>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
    api_key: Option<SecretString>,
) {
    let mut attempt: u32 = 0;

    loop {
        let _ = state_tx.send(PushState::Connecting);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = connect_and_read(&ws_url, &command_tx, &state_tx, &cancel, api_key.as_ref()) => {
                let _ = state_tx.send(PushState::Disconnected);

                match result {
                    // Clean disconnect (server close frame or stream ended).
                    // Reset attempt counter and reconnect immediately.
                    Ok(()) => {
                        tracing::info!("push channel disconnected cleanly, reconnecting");
                        attempt = 0;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, attempt, "push channel error");

                        if let Some(max) = reconnect.max_retries {
                            if attempt >= max {
                                tracing::error!(
                                    max_retries = max,
                                    "push channel reconnection limit reached, giving up"
                                );
                                break;
                            }
                        }

                        let delay = calculate_backoff(attempt, &reconnect);
                        tracing::info!(
                            delay_ms = delay.as_millis() as u64,
                            attempt,
                            "waiting before reconnect"
                        );

                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }

                        attempt += 1;
                    }
                }
            }
        }
    }

    let _ = state_tx.send(PushState::Disconnected);
    tracing::debug!("push loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Establish a single WebSocket connection, read frames until it drops.
async fn connect_and_read(
    url: &Url,
    command_tx: &broadcast::Sender<Command>,
    state_tx: &watch::Sender<PushState>,
    cancel: &CancellationToken,
    api_key: Option<&SecretString>,
) -> Result<(), Error> {
    tracing::info!(url = %url, "connecting push channel");

    let uri: tungstenite::http::Uri = url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::PushConnect(e.to_string()))?;

    let mut request = ClientRequestBuilder::new(uri);
    if let Some(key) = api_key {
        request = request.with_header("X-API-Key", key.expose_secret());
    }

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| Error::PushConnect(e.to_string()))?;

    tracing::info!("push channel connected");
    let _ = state_tx.send(PushState::Connected);

    let (_write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        parse_and_broadcast(&text, command_tx);
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) => {
                        // tungstenite handles pong replies automatically
                        tracing::trace!("push channel ping");
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            tracing::info!(
                                code = %cf.code,
                                reason = %cf.reason,
                                "push channel close frame received"
                            );
                        } else {
                            tracing::info!("push channel close frame received (no payload)");
                        }
                        return Ok(());
                    }
                    Some(Err(e)) => {
                        return Err(Error::PushConnect(e.to_string()));
                    }
                    None => {
                        // Stream ended without a close frame
                        tracing::info!("push channel stream ended");
                        return Ok(());
                    }
                    _ => {
                        // Binary, Pong, Frame -- ignore
                    }
                }
            }
        }
    }
}

// ── Frame parsing ────────────────────────────────────────────────────

/// Envelope the backend sends over the push channel.
///
/// Only `command.created` frames carry a command; keep-alive and other
/// event kinds are ignored.
#[derive(Debug, Deserialize)]
struct PushFrame {
    event: String,
    #[serde(default)]
    command: Option<Command>,
}

/// Parse a text frame and broadcast the command it carries, if any.
fn parse_and_broadcast(text: &str, command_tx: &broadcast::Sender<Command>) {
    let frame: PushFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            tracing::debug!(error = %e, "failed to parse push frame");
            return;
        }
    };

    match (frame.event.as_str(), frame.command) {
        ("command.created", Some(command)) => {
            // Ignore send errors -- just means no active subscriber right now
            let _ = command_tx.send(command);
        }
        (event, _) => {
            tracing::trace!(event, "ignoring push frame");
        }
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) + jitter`
///
/// Jitter is +-25% to spread out reconnection storms when a fleet of
/// displays loses the same backend.
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(attempt.min(16) as i32);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic "jitter" seeded from the attempt number.
    // Not cryptographically random, but good enough for backoff spread.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ────────────────────────────────────────────────────────────
