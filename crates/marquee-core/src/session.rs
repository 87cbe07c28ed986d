// ── Authentication session manager ──
//
// Owns the full authentication lifecycle: direct login, code-based
// pairing, heartbeat status reporting while the session is active, and
// a strictly ordered, idempotent logout.
//
// State machine:
//
//   Uninitialized → Initializing → {Unauthenticated, Authenticated}
//                                         ⇅
//                                     LoggingOut → Unauthenticated
//
// The `DeviceSession` snapshot is mutated exclusively here; every other
// component reads it through `snapshot()` as immutable data.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::Utc;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use marquee_api::{DeviceStatus, PairingStatus, SignageClient};

use crate::config::AgentConfig;
use crate::error::CoreError;
use crate::model::{DeviceSession, PairingCode, SessionState};
use crate::shell::ScreenNavigator;
use crate::store::{
    CREDENTIAL_KEYS, KEY_JUST_LOGGED_OUT, KEY_PASSWORD, KEY_SCREEN_NAME, KEY_USERNAME,
    SessionStore,
};

/// How long the fire-and-forget logout side calls may run.
const LOGOUT_SIDE_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Retry attempts for backend-side auth invalidation on logout.
const CLEAR_AUTH_ATTEMPTS: u32 = 3;

// ── CommandListener ──────────────────────────────────────────────────

/// What the session manager needs from the command dispatcher during
/// logout: stop accepting commands on both channels before teardown
/// becomes externally observable.
pub trait CommandListener: Send + Sync {
    fn stop(&self) -> BoxFuture<'_, ()>;
}

// ── Task guard ───────────────────────────────────────────────────────

/// A cancellable background task. `stop` cancels and awaits it, so no
/// tick can land after `stop` returns.
struct TaskGuard {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl TaskGuard {
    async fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

// ── AuthSessionManager ───────────────────────────────────────────────

/// The authentication core. Cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct AuthSessionManager {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    device_id: String,
    client: Arc<SignageClient>,
    store: Arc<dyn SessionStore>,
    navigator: Arc<dyn ScreenNavigator>,
    config: AgentConfig,
    session: ArcSwap<DeviceSession>,
    state_tx: watch::Sender<SessionState>,
    /// A retained receiver keeps the state channel alive so `state_tx.send`
    /// always updates the stored value, even when no external subscriber is
    /// currently borrowing it.
    _state_rx: watch::Receiver<SessionState>,
    /// Network-connectivity input owned by the shell; heartbeats derive
    /// their online/offline payload from it.
    connectivity: watch::Receiver<bool>,
    screen_active: AtomicBool,
    /// Serializes re-entrant logout calls: the second caller sees the
    /// flag set and returns without side effects.
    logout_in_flight: AtomicBool,
    heartbeat: Mutex<Option<TaskGuard>>,
    pairing: Mutex<Option<TaskGuard>>,
    listener: std::sync::Mutex<Option<Arc<dyn CommandListener>>>,
}

impl AuthSessionManager {
    pub fn new(
        device_id: String,
        client: Arc<SignageClient>,
        store: Arc<dyn SessionStore>,
        navigator: Arc<dyn ScreenNavigator>,
        connectivity: watch::Receiver<bool>,
        config: AgentConfig,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(SessionState::Uninitialized);
        let session = ArcSwap::from_pointee(DeviceSession::empty(&device_id));

        Self {
            inner: Arc::new(SessionInner {
                device_id,
                client,
                store,
                navigator,
                config,
                session,
                state_tx,
                _state_rx: state_rx,
                connectivity,
                screen_active: AtomicBool::new(false),
                logout_in_flight: AtomicBool::new(false),
                heartbeat: Mutex::new(None),
                pairing: Mutex::new(None),
                listener: std::sync::Mutex::new(None),
            }),
        }
    }

    /// Wire in the command dispatcher so logout can stop it in order.
    pub fn set_command_listener(&self, listener: Arc<dyn CommandListener>) {
        if let Ok(mut guard) = self.inner.listener.lock() {
            *guard = Some(listener);
        }
    }

    /// Subscribe to session state changes.
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    /// Immutable snapshot of the current session.
    pub fn snapshot(&self) -> Arc<DeviceSession> {
        self.inner.session.load_full()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.session.load().is_authenticated
    }

    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    // ── Initialization ───────────────────────────────────────────────

    /// Restore session state from durable storage.
    ///
    /// The logout sentinel is checked *before* any credential load: if
    /// present, all persisted credential keys are force-cleared (the
    /// prior logout already cleared them, but may have been interrupted
    /// mid-sequence) and no restore is attempted. Otherwise cached
    /// credentials are restored all-or-nothing, with no network
    /// round-trip.
    pub async fn initialize(&self) -> Result<(), CoreError> {
        let inner = &self.inner;
        let _ = inner.state_tx.send(SessionState::Initializing);

        let sentinel = inner.store.get(KEY_JUST_LOGGED_OUT).unwrap_or_else(|e| {
            warn!(error = %e, "cannot read logout sentinel, assuming absent");
            None
        });

        if sentinel.is_some() {
            info!("logout sentinel present, suppressing session restore");
            inner.clear_persisted_credentials();
            if let Err(e) = inner.store.remove(KEY_JUST_LOGGED_OUT) {
                warn!(error = %e, "cannot remove logout sentinel");
            }
            inner
                .session
                .store(Arc::new(DeviceSession::empty(&inner.device_id)));
            let _ = inner.state_tx.send(SessionState::Unauthenticated);
            return Ok(());
        }

        let username = inner.read_key(KEY_USERNAME);
        let password = inner.read_key(KEY_PASSWORD);
        let screen_name = inner.read_key(KEY_SCREEN_NAME);

        if let (Some(username), Some(password), Some(screen_name)) =
            (username, password, screen_name)
        {
            inner.session.store(Arc::new(DeviceSession::authenticated(
                &inner.device_id,
                username,
                SecretString::from(password),
                screen_name,
            )));
            let _ = inner.state_tx.send(SessionState::Authenticated);
            info!("session restored from cached credentials");
            update_heartbeat(inner).await;
        } else {
            let _ = inner.state_tx.send(SessionState::Unauthenticated);
            debug!("no cached credentials, starting unauthenticated");
        }

        Ok(())
    }

    // ── Direct login ─────────────────────────────────────────────────

    /// Log in with explicit credentials.
    ///
    /// On success the credentials are persisted and the session becomes
    /// authenticated. On failure the backend's error string is surfaced
    /// verbatim and the session is unchanged.
    pub async fn login(
        &self,
        username: &str,
        password: SecretString,
        screen_name: &str,
    ) -> Result<(), CoreError> {
        let inner = &self.inner;
        if inner.session.load().is_authenticated {
            return Err(CoreError::AlreadyAuthenticated);
        }

        inner
            .client
            .login(&inner.device_id, username, &password, screen_name)
            .await?;

        inner.stop_pairing().await;
        complete_authentication(
            inner,
            username.to_owned(),
            password,
            screen_name.to_owned(),
        )
        .await;
        Ok(())
    }

    // ── Code pairing ─────────────────────────────────────────────────

    /// Request a device-bound pairing code and start polling for the
    /// companion client to claim it.
    ///
    /// Replaces any outstanding code (the backend invalidates the
    /// previous one on generation). An expired code regenerates
    /// silently; polling stops the instant the session authenticates
    /// through any path.
    pub async fn begin_pairing(&self) -> Result<PairingCode, CoreError> {
        let inner = &self.inner;
        if inner.session.load().is_authenticated {
            return Err(CoreError::AlreadyAuthenticated);
        }

        inner.stop_pairing().await;

        let code = request_code(inner).await?;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(pairing_task(Arc::clone(inner), cancel.clone()));
        *inner.pairing.lock().await = Some(TaskGuard { cancel, handle });

        Ok(code)
    }

    // ── Heartbeat condition inputs ───────────────────────────────────

    /// Report whether the playlist screen is the active foreground
    /// session. The heartbeat runs iff authenticated AND active; it
    /// starts immediately on entering the condition and stops
    /// immediately on leaving it.
    pub async fn set_screen_active(&self, active: bool) {
        self.inner.screen_active.store(active, Ordering::SeqCst);
        update_heartbeat(&self.inner).await;
    }

    // ── Logout ───────────────────────────────────────────────────────

    /// The ordered logout sequence.
    ///
    /// 1. Cancel the heartbeat and pairing-code timers.
    /// 2. Stop the command listener (both channels).
    /// 3. Fire-and-forget: final offline status push and backend-side
    ///    auth invalidation (retried), using the about-to-be-cleared
    ///    credentials.
    /// 4. Clear the in-memory session in one atomic snapshot swap.
    /// 5. Erase persisted credential keys.
    /// 6. Write the logout sentinel.
    /// 7. Navigate to the unauthenticated entry point.
    ///
    /// Step failures are logged, never fatal. Re-entrant calls while a
    /// logout is in flight are no-ops. If the sequence itself panics,
    /// an emergency pass repeats steps 4-7 unconditionally so the
    /// device never remains in an authenticated-looking state.
    pub async fn logout(&self) {
        let inner = &self.inner;
        if inner.logout_in_flight.swap(true, Ordering::SeqCst) {
            debug!("logout already in flight, ignoring");
            return;
        }

        let _ = inner.state_tx.send(SessionState::LoggingOut);
        info!("logout started");

        let outcome = std::panic::AssertUnwindSafe(run_logout(inner))
            .catch_unwind()
            .await;
        if outcome.is_err() {
            error!("logout sequence panicked, running emergency cleanup");
            clear_and_redirect(inner);
        }

        let _ = inner.state_tx.send(SessionState::Unauthenticated);
        inner.logout_in_flight.store(false, Ordering::SeqCst);
        info!("logout complete");
    }
}

// ── SessionInner helpers ─────────────────────────────────────────────

impl SessionInner {
    fn read_key(&self, key: &str) -> Option<String> {
        self.store.get(key).unwrap_or_else(|e| {
            warn!(key, error = %e, "cannot read session store key");
            None
        })
    }

    fn persist_credentials(&self, username: &str, password: &SecretString, screen_name: &str) {
        for (key, value) in [
            (KEY_USERNAME, username),
            (KEY_PASSWORD, password.expose_secret()),
            (KEY_SCREEN_NAME, screen_name),
        ] {
            if let Err(e) = self.store.set(key, value) {
                warn!(key, error = %e, "cannot persist credential key");
            }
        }
    }

    /// Remove all credential keys, logging (not propagating) failures.
    fn clear_persisted_credentials(&self) {
        for key in CREDENTIAL_KEYS {
            if let Err(e) = self.store.remove(key) {
                warn!(key, error = %e, "cannot clear credential key");
            }
        }
    }

    async fn stop_pairing(&self) {
        if let Some(task) = self.pairing.lock().await.take() {
            task.stop().await;
        }
    }

    /// Final offline status push, detached from the logout critical
    /// path. Skipped when any of the four required identity fields is
    /// already gone.
    fn send_final_offline_status(&self) {
        let session = self.session.load_full();
        let Some((device_id, screen_name, username, password)) = session.heartbeat_identity()
        else {
            debug!("skipping final offline status, incomplete session identity");
            return;
        };

        let client = Arc::clone(&self.client);
        let device_id = device_id.to_owned();
        let screen_name = screen_name.to_owned();
        let username = username.to_owned();
        let password = password.clone();

        tokio::spawn(async move {
            let push = client.push_status(
                &device_id,
                &screen_name,
                &username,
                &password,
                DeviceStatus::Offline,
                Utc::now(),
            );
            match tokio::time::timeout(LOGOUT_SIDE_CALL_TIMEOUT, push).await {
                Ok(Ok(())) => debug!("final offline status pushed"),
                Ok(Err(e)) => warn!(error = %e, "final offline status push failed"),
                Err(_) => warn!("final offline status push timed out"),
            }
        });
    }

    /// Backend-side auth invalidation, detached, retried with backoff.
    fn spawn_clear_device_auth(&self) {
        let client = Arc::clone(&self.client);
        let device_id = self.device_id.clone();

        tokio::spawn(async move {
            let mut delay = Duration::from_millis(500);
            for attempt in 1..=CLEAR_AUTH_ATTEMPTS {
                let call = client.clear_device_auth(&device_id);
                match tokio::time::timeout(LOGOUT_SIDE_CALL_TIMEOUT, call).await {
                    Ok(Ok(())) => {
                        debug!("backend device auth cleared");
                        return;
                    }
                    Ok(Err(e)) if attempt < CLEAR_AUTH_ATTEMPTS => {
                        warn!(error = %e, attempt, "clear device auth failed, retrying");
                    }
                    Ok(Err(e)) => {
                        warn!(error = %e, "clear device auth failed, giving up");
                        return;
                    }
                    Err(_) if attempt < CLEAR_AUTH_ATTEMPTS => {
                        warn!(attempt, "clear device auth timed out, retrying");
                    }
                    Err(_) => {
                        warn!("clear device auth timed out, giving up");
                        return;
                    }
                }
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        });
    }
}

// ── Shared authentication completion ─────────────────────────────────

/// Persist credentials, swap in an authenticated snapshot, and update
/// dependent state. Used by both the direct-login and pairing paths.
async fn complete_authentication(
    inner: &Arc<SessionInner>,
    username: String,
    password: SecretString,
    screen_name: String,
) {
    inner.persist_credentials(&username, &password, &screen_name);
    inner.session.store(Arc::new(DeviceSession::authenticated(
        &inner.device_id,
        username,
        password,
        screen_name,
    )));
    let _ = inner.state_tx.send(SessionState::Authenticated);
    info!("session authenticated");
    update_heartbeat(inner).await;
}

// ── Heartbeat ────────────────────────────────────────────────────────

/// Reconcile the heartbeat task against its run condition:
/// authenticated AND screen-active. Starting fires an immediate first
/// tick; stopping awaits the task so no tick lands afterwards.
async fn update_heartbeat(inner: &Arc<SessionInner>) {
    let should_run =
        inner.session.load().is_authenticated && inner.screen_active.load(Ordering::SeqCst);

    let mut guard = inner.heartbeat.lock().await;
    match (should_run, guard.is_some()) {
        (true, false) => {
            let cancel = CancellationToken::new();
            let handle = tokio::spawn(heartbeat_task(Arc::clone(inner), cancel.clone()));
            *guard = Some(TaskGuard { cancel, handle });
            debug!("heartbeat started");
        }
        (false, true) => {
            if let Some(task) = guard.take() {
                task.stop().await;
            }
            debug!("heartbeat stopped");
        }
        _ => {}
    }
}

async fn heartbeat_task(inner: Arc<SessionInner>, cancel: CancellationToken) {
    // interval's first tick fires immediately: the heartbeat starts the
    // moment the run condition holds, not one interval later.
    let mut interval = tokio::time::interval(inner.config.heartbeat_interval);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => send_heartbeat(&inner).await,
        }
    }
}

/// One status push. Failures are logged and never alter session state.
async fn send_heartbeat(inner: &SessionInner) {
    let session = inner.session.load_full();
    let Some((device_id, screen_name, username, password)) = session.heartbeat_identity() else {
        debug!("skipping heartbeat, incomplete session identity");
        return;
    };

    let status = if *inner.connectivity.borrow() {
        DeviceStatus::Online
    } else {
        DeviceStatus::Offline
    };

    if let Err(e) = inner
        .client
        .push_status(device_id, screen_name, username, password, status, Utc::now())
        .await
    {
        warn!(error = %e, "heartbeat push failed");
    }
}

// ── Pairing ──────────────────────────────────────────────────────────

/// Request a fresh code from the backend and swap it into the session.
async fn request_code(inner: &Arc<SessionInner>) -> Result<PairingCode, CoreError> {
    let grant = inner
        .client
        .generate_pairing_code(&inner.device_id, inner.config.device_info.as_deref())
        .await?;

    let code = PairingCode {
        code: grant.code,
        expires_at: grant.expires_at,
    };
    inner
        .session
        .store(Arc::new(DeviceSession::pairing(&inner.device_id, code.clone())));
    info!(code = %code.code, expires_at = %code.expires_at, "pairing code generated");
    Ok(code)
}

enum PairingTick {
    Continue,
    Done,
}

async fn pairing_task(inner: Arc<SessionInner>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(inner.config.pairing_poll_interval);
    interval.tick().await; // the code was just generated, poll on the interval

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                if matches!(pairing_tick(&inner).await, PairingTick::Done) {
                    break;
                }
            }
        }
    }
}

/// One poll tick of the pairing state machine.
async fn pairing_tick(inner: &Arc<SessionInner>) -> PairingTick {
    let current = inner.session.load_full();
    if current.is_authenticated {
        return PairingTick::Done;
    }

    let Some(code) = current.auth_code.clone() else {
        // Session was cleared underneath us (e.g. logout mid-pairing).
        return PairingTick::Done;
    };

    // Local expiry check wins over whatever the backend last said: a
    // stale poll response can never keep a dead code alive.
    if code.is_expired() {
        info!(code = %code.code, "pairing code expired locally, regenerating");
        regenerate(inner).await;
        return PairingTick::Continue;
    }

    match inner.client.poll_pairing(&inner.device_id).await {
        Ok(poll) => match poll.status {
            PairingStatus::Pending => PairingTick::Continue,
            PairingStatus::Expired => {
                info!(code = %code.code, "backend reports pairing code expired, regenerating");
                regenerate(inner).await;
                PairingTick::Continue
            }
            PairingStatus::Authenticated => match poll.credentials {
                Some(creds) => {
                    complete_authentication(
                        inner,
                        creds.username,
                        creds.password,
                        creds.screen_name,
                    )
                    .await;
                    PairingTick::Done
                }
                None => {
                    warn!("backend reported authenticated without credentials");
                    PairingTick::Continue
                }
            },
        },
        Err(e) => {
            // Transient failure: retry on the next tick.
            warn!(error = %e, "pairing poll failed");
            PairingTick::Continue
        }
    }
}

/// Regeneration is silent and requires no user action; a failure here
/// retries on the next tick.
async fn regenerate(inner: &Arc<SessionInner>) {
    if let Err(e) = request_code(inner).await {
        warn!(error = %e, "pairing code regeneration failed");
    }
}

// ── Logout sequence ──────────────────────────────────────────────────

async fn run_logout(inner: &Arc<SessionInner>) {
    // 1. No more timer ticks.
    if let Some(task) = inner.heartbeat.lock().await.take() {
        task.stop().await;
    }
    inner.stop_pairing().await;

    // 2. Stop the command listener before teardown becomes observable:
    //    no command may be accepted mid-logout.
    let listener = inner.listener.lock().ok().and_then(|guard| guard.clone());
    if let Some(listener) = listener {
        listener.stop().await;
    }

    // 3. Best-effort side calls with the about-to-be-cleared
    //    credentials. Detached: their failure is logged, never blocks.
    inner.send_final_offline_status();
    inner.spawn_clear_device_auth();

    // 4-7.
    clear_and_redirect(inner);
}

/// Steps 4-7, shared with the emergency path: in-memory clear,
/// persisted clear, sentinel write, navigation. Every failure is
/// swallowed after logging -- this must always run to completion.
fn clear_and_redirect(inner: &Arc<SessionInner>) {
    // 4. One atomic snapshot swap; no intermediate state is ever
    //    observable as authenticated.
    inner
        .session
        .store(Arc::new(DeviceSession::empty(&inner.device_id)));

    // 5. Erase persisted credentials.
    inner.clear_persisted_credentials();

    // 6. Sentinel: if the process dies before step 5's writes are
    //    durable, the next start must still refuse to restore.
    if let Err(e) = inner.store.set(KEY_JUST_LOGGED_OUT, "true") {
        warn!(error = %e, "cannot write logout sentinel");
    }

    // 7. Hand the screen back to the unauthenticated entry point.
    inner.navigator.to_login_screen();
}
