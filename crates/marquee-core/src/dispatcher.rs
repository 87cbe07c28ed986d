// ── Command dispatcher ──
//
// Guarantees that every command the backend intends for this device is
// executed at most once, using two redundant delivery channels, and
// that execution status is reported back faithfully.
//
// Channels:
// - push: a per-device WebSocket subscription (low latency, may drop)
// - poll: a fixed-interval fallback that covers commands created before
//   the subscription was live and any push outage
//
// Both channels funnel into one gate. The gate's check-then-mark is a
// single atomic `DashSet::insert`, so two near-simultaneous
// observations of the same command id can never both pass.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use secrecy::SecretString;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use marquee_api::push::PushState;
use marquee_api::{PushChannel, ReconnectConfig, SignageClient};

use crate::config::AgentConfig;
use crate::error::CoreError;
use crate::model::{Command, CommandStatus, ConnectionStatus};
use crate::registry::CommandHandlerRegistry;
use crate::session::CommandListener;

// ── CommandDispatcher ────────────────────────────────────────────────

/// The command delivery core. Cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct CommandDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    device_id: String,
    client: Arc<SignageClient>,
    registry: Arc<CommandHandlerRegistry>,
    api_key: Option<SecretString>,
    poll_interval: Duration,
    reconnect: ReconnectConfig,
    /// Command ids accepted for processing and not yet finalized. Any
    /// observation of an in-flight id is dropped without side effects.
    in_flight: DashSet<String>,
    status_tx: watch::Sender<ConnectionStatus>,
    running: Mutex<Option<Listener>>,
}

/// Live listener state between `start_listening` and `stop_listening`.
struct Listener {
    cancel: CancellationToken,
    push: PushChannel,
    handles: Vec<JoinHandle<()>>,
}

impl CommandDispatcher {
    pub fn new(
        device_id: String,
        client: Arc<SignageClient>,
        registry: Arc<CommandHandlerRegistry>,
        config: &AgentConfig,
    ) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);

        Self {
            inner: Arc::new(DispatcherInner {
                device_id,
                client,
                registry,
                api_key: config.api_key.clone(),
                poll_interval: config.command_poll_interval,
                reconnect: ReconnectConfig::default(),
                in_flight: DashSet::new(),
                status_tx,
                running: Mutex::new(None),
            }),
        }
    }

    /// Health of the push channel. The polling fallback keeps commands
    /// flowing even while this reads `Disconnected`.
    pub fn connection_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Start both delivery channels.
    ///
    /// The push subscription is established first; the poll loop's
    /// first pass fires immediately, closing the window for commands
    /// that existed before the subscription went live. Idempotent:
    /// calling while already listening is a no-op.
    pub async fn start_listening(&self) -> Result<(), CoreError> {
        let inner = &self.inner;
        let mut running = inner.running.lock().await;
        if running.is_some() {
            debug!("dispatcher already listening");
            return Ok(());
        }

        let ws_url = inner.client.push_url(&inner.device_id)?;
        let cancel = CancellationToken::new();

        let push = PushChannel::connect(
            ws_url,
            inner.reconnect.clone(),
            cancel.clone(),
            inner.api_key.clone(),
        );

        let handles = vec![
            tokio::spawn(status_forward_task(
                Arc::clone(inner),
                push.state(),
                cancel.clone(),
            )),
            tokio::spawn(push_consumer_task(
                Arc::clone(inner),
                push.subscribe(),
                cancel.clone(),
            )),
            tokio::spawn(poll_task(Arc::clone(inner), cancel.clone())),
        ];

        *running = Some(Listener {
            cancel,
            push,
            handles,
        });

        info!(device_id = %inner.device_id, "command dispatcher listening");
        Ok(())
    }

    /// Tear down both channels.
    ///
    /// Does not wait for an in-flight handler: a handler mid-flight
    /// completes normally and its final status write still occurs, but
    /// no new commands are accepted once the loops observe the
    /// cancellation.
    pub async fn stop_listening(&self) {
        let Some(listener) = self.inner.running.lock().await.take() else {
            debug!("dispatcher not listening");
            return;
        };

        listener.cancel.cancel();
        listener.push.shutdown();
        drop(listener.handles);

        let _ = self.inner.status_tx.send(ConnectionStatus::Disconnected);
        info!("command dispatcher stopped");
    }
}

impl CommandListener for CommandDispatcher {
    fn stop(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.stop_listening())
    }
}

// ── Per-command protocol ─────────────────────────────────────────────

impl DispatcherInner {
    /// The single gate both channels funnel into.
    async fn process(&self, command: Command) {
        // Anything past `pending` is either already being handled here
        // or already finalized -- stale poll results are safe to replay.
        if command.status != CommandStatus::Pending {
            trace!(id = %command.id, status = %command.status, "dropping non-pending command");
            return;
        }

        // Atomic check-and-mark. No await sits between the check and
        // the mark: `insert` returns false for an id that is already
        // in flight, whichever channel it arrived on.
        if !self.in_flight.insert(command.id.clone()) {
            debug!(id = %command.id, "dropping duplicate observation");
            return;
        }

        let id = command.id.clone();
        self.execute(command).await;
        self.in_flight.remove(&id);
    }

    async fn execute(&self, command: Command) {
        // Best-effort observability write for the backend/UI; local
        // in-flight tracking is the real dedup guard, so a failure
        // here does not stop execution.
        if let Err(e) = self
            .client
            .ack_command(&command.id, CommandStatus::Processing, None)
            .await
        {
            warn!(id = %command.id, error = %e, "processing ack failed, continuing");
        }

        let Some(handler) = self.registry.get(&command.kind) else {
            warn!(id = %command.id, kind = %command.kind, "no handler registered");
            self.finalize(&command.id, CommandStatus::Failed, Some("no handler registered"))
                .await;
            return;
        };

        let id = command.id.clone();
        let kind = command.kind.clone();
        debug!(id = %id, kind = %kind, "executing command");

        let outcome = std::panic::AssertUnwindSafe(handler.handle(command))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {
                info!(id = %id, kind = %kind, "command completed");
                self.finalize(&id, CommandStatus::Completed, None).await;
            }
            Ok(Err(e)) => {
                warn!(id = %id, kind = %kind, error = %e, "command failed");
                self.finalize(&id, CommandStatus::Failed, Some(&e.to_string()))
                    .await;
            }
            Err(_) => {
                warn!(id = %id, kind = %kind, "command handler panicked");
                self.finalize(&id, CommandStatus::Failed, Some("handler panicked"))
                    .await;
            }
        }
    }

    /// Terminal status write. A command never stays `processing`: every
    /// execution path ends here with `completed` or `failed`.
    async fn finalize(&self, id: &str, status: CommandStatus, error_message: Option<&str>) {
        if let Err(e) = self.client.ack_command(id, status, error_message).await {
            warn!(id, %status, error = %e, "final status ack failed");
        }
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Mirror push-channel health into the public `ConnectionStatus`.
async fn status_forward_task(
    inner: Arc<DispatcherInner>,
    mut state_rx: watch::Receiver<PushState>,
    cancel: CancellationToken,
) {
    loop {
        let status = ConnectionStatus::from(*state_rx.borrow_and_update());
        inner.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}

/// Drain the push subscription into the gate.
async fn push_consumer_task(
    inner: Arc<DispatcherInner>,
    mut rx: broadcast::Receiver<Command>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Ok(command) => inner.process(command).await,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "push consumer lagged, polling fallback covers the gap");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

/// The polling fallback. Never stops itself on error -- transient
/// failures retry on the next tick; only `stop_listening` ends it.
async fn poll_task(inner: Arc<DispatcherInner>, cancel: CancellationToken) {
    // interval's first tick fires immediately: one poll pass right at
    // startup catches commands created before the subscription was live.
    let mut interval = tokio::time::interval(inner.poll_interval);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                match inner.client.poll_commands(&inner.device_id).await {
                    Ok(commands) => {
                        for command in commands {
                            if cancel.is_cancelled() {
                                return;
                            }
                            inner.process(command).await;
                        }
                    }
                    Err(e) => debug!(error = %e, "command poll failed, retrying next tick"),
                }
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::model::CommandKind;

    fn test_config() -> AgentConfig {
        AgentConfig {
            command_poll_interval: Duration::from_millis(50),
            ..AgentConfig::default()
        }
    }

    fn dispatcher_for(uri: &str) -> (CommandDispatcher, Arc<CommandHandlerRegistry>) {
        let client = Arc::new(
            SignageClient::from_reqwest(uri, reqwest::Client::new()).expect("valid url"),
        );
        let registry = Arc::new(CommandHandlerRegistry::new());
        let dispatcher = CommandDispatcher::new(
            "dev-1".into(),
            client,
            Arc::clone(&registry),
            &test_config(),
        );
        (dispatcher, registry)
    }

    /// Register a handler that counts invocations and yields briefly,
    /// widening the window a second observation would need to slip
    /// through.
    fn counting_handler(registry: &CommandHandlerRegistry, kind: CommandKind) -> Arc<AtomicUsize> {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        registry.register_fn(kind, move |_cmd| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            }
        });
        calls
    }

    fn pending_command(id: &str, kind: CommandKind) -> Command {
        Command {
            id: id.into(),
            device_id: "dev-1".into(),
            kind,
            status: CommandStatus::Pending,
            payload: serde_json::Value::Null,
            created_at: None,
        }
    }

    async fn ack_bodies(server: &MockServer) -> Vec<serde_json::Value> {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == "/api/v1/commands/ack")
            .map(|r| serde_json::from_slice(&r.body).expect("json body"))
            .collect()
    }

    // Acks go nowhere (connection refused); execution proceeds anyway
    // -- local in-flight tracking is the real guard.
    const UNROUTABLE: &str = "http://127.0.0.1:1";

    #[tokio::test]
    async fn duplicate_observations_execute_once() {
        let (dispatcher, registry) = dispatcher_for(UNROUTABLE);
        let calls = counting_handler(&registry, CommandKind::SyncStatus);

        let command = pending_command("c1", CommandKind::SyncStatus);

        // Same command arriving via both channels in the same tick.
        tokio::join!(
            dispatcher.inner.process(command.clone()),
            dispatcher.inner.process(command),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_pending_observation_is_dropped() {
        let (dispatcher, registry) = dispatcher_for(UNROUTABLE);
        let calls = counting_handler(&registry, CommandKind::SyncStatus);

        let mut command = pending_command("c1", CommandKind::SyncStatus);
        command.status = CommandStatus::Processing;
        dispatcher.inner.process(command).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(dispatcher.inner.in_flight.is_empty());
    }

    #[tokio::test]
    async fn in_flight_clears_after_execution() {
        let (dispatcher, registry) = dispatcher_for(UNROUTABLE);
        let _calls = counting_handler(&registry, CommandKind::SyncStatus);

        dispatcher
            .inner
            .process(pending_command("c1", CommandKind::SyncStatus))
            .await;

        assert!(dispatcher.inner.in_flight.is_empty());
    }

    #[tokio::test]
    async fn handler_failure_still_clears_in_flight() {
        let (dispatcher, registry) = dispatcher_for(UNROUTABLE);
        registry.register_fn(CommandKind::ScreenShare, |_cmd| async {
            Err(CoreError::Handler {
                message: "relay unavailable".into(),
            })
        });

        dispatcher
            .inner
            .process(pending_command("c1", CommandKind::ScreenShare))
            .await;

        assert!(dispatcher.inner.in_flight.is_empty());
    }

    #[tokio::test]
    async fn success_acks_are_monotonic() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/commands/ack"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
            .mount(&server)
            .await;

        let (dispatcher, registry) = dispatcher_for(&server.uri());
        let calls = counting_handler(&registry, CommandKind::PreviewContent);

        dispatcher
            .inner
            .process(pending_command("c1", CommandKind::PreviewContent))
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let acks = ack_bodies(&server).await;
        assert_eq!(acks.len(), 2);
        assert_eq!(acks[0]["status"], "processing");
        assert_eq!(acks[1]["status"], "completed");
    }

    #[tokio::test]
    async fn missing_handler_reports_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/commands/ack"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
            .mount(&server)
            .await;

        let (dispatcher, _registry) = dispatcher_for(&server.uri());

        dispatcher
            .inner
            .process(pending_command("c2", CommandKind::Unknown("reboot_device".into())))
            .await;

        let acks = ack_bodies(&server).await;
        assert_eq!(acks.len(), 2);
        assert_eq!(acks[0]["status"], "processing");
        assert_eq!(acks[1]["status"], "failed");
        assert_eq!(acks[1]["errorMessage"], "no handler registered");
        assert!(dispatcher.inner.in_flight.is_empty());
    }

    #[tokio::test]
    async fn handler_error_message_travels_in_failed_ack() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/commands/ack"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
            .mount(&server)
            .await;

        let (dispatcher, registry) = dispatcher_for(&server.uri());
        registry.register_fn(CommandKind::PreviewContent, |_cmd| async {
            Err(CoreError::Handler {
                message: "player jammed".into(),
            })
        });

        dispatcher
            .inner
            .process(pending_command("c3", CommandKind::PreviewContent))
            .await;

        let acks = ack_bodies(&server).await;
        let last = acks.last().expect("failed ack present");
        assert_eq!(last["status"], "failed");
        assert!(
            last["errorMessage"]
                .as_str()
                .expect("message")
                .contains("player jammed")
        );
    }

    #[tokio::test]
    async fn poll_fallback_delivers_when_push_unavailable() {
        let server = MockServer::start().await;

        // One pending command on the first poll pass, then empty.
        Mock::given(method("POST"))
            .and(path("/api/v1/commands/poll"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "commands": [{
                    "id": "c1",
                    "deviceId": "dev-1",
                    "command": "sync_status",
                    "status": "pending",
                }],
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/commands/poll"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "success": true, "commands": [] })),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/commands/ack"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
            .mount(&server)
            .await;

        let (dispatcher, registry) = dispatcher_for(&server.uri());
        let calls = counting_handler(&registry, CommandKind::SyncStatus);

        dispatcher.start_listening().await.expect("start");

        // The mock server speaks no WebSocket, so delivery rides the
        // polling fallback alone.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let mut status = dispatcher.connection_status();
        assert_eq!(*status.borrow_and_update(), ConnectionStatus::Disconnected);

        dispatcher.stop_listening().await;
    }

    #[tokio::test]
    async fn stop_listening_halts_polling() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/commands/poll"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "success": true, "commands": [] })),
            )
            .mount(&server)
            .await;

        let (dispatcher, _registry) = dispatcher_for(&server.uri());
        dispatcher.start_listening().await.expect("start");
        tokio::time::sleep(Duration::from_millis(150)).await;
        dispatcher.stop_listening().await;

        let before = server.received_requests().await.unwrap_or_default().len();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let after = server.received_requests().await.unwrap_or_default().len();

        assert_eq!(before, after, "no polls after stop_listening");
    }

    #[tokio::test]
    async fn start_listening_is_idempotent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/commands/poll"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "success": true, "commands": [] })),
            )
            .mount(&server)
            .await;

        let (dispatcher, _registry) = dispatcher_for(&server.uri());
        dispatcher.start_listening().await.expect("start");
        dispatcher.start_listening().await.expect("second start is a no-op");
        dispatcher.stop_listening().await;
    }
}
