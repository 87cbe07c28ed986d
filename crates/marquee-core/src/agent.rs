// ── Agent context ──
//
// One explicitly-constructed object owning the whole device-side
// stack: identity, session store, backend client, session manager,
// command dispatcher. The shell builds exactly one at startup and
// passes it down -- there is no ambient global state anywhere in the
// agent.

use std::sync::Arc;

use tokio::sync::watch;

use marquee_api::SignageClient;
use marquee_api::transport::{TlsMode, TransportConfig};

use crate::config::{AgentConfig, TlsVerification};
use crate::dispatcher::CommandDispatcher;
use crate::error::CoreError;
use crate::identity::DeviceIdentity;
use crate::registry::CommandHandlerRegistry;
use crate::session::{AuthSessionManager, CommandListener};
use crate::shell::ScreenNavigator;
use crate::store::{FileStore, SessionStore};

/// The assembled device agent.
pub struct Agent {
    device_id: String,
    session: AuthSessionManager,
    dispatcher: CommandDispatcher,
    registry: Arc<CommandHandlerRegistry>,
    /// Keeps the default always-online connectivity source alive when
    /// the shell does not supply its own.
    _connectivity_tx: Option<watch::Sender<bool>>,
}

impl Agent {
    /// Build the agent from configuration.
    ///
    /// Resolves the device identity, opens the session store, builds
    /// the backend client, and wires the session manager and command
    /// dispatcher together. Does NOT touch the network -- call
    /// [`initialize`](Self::initialize) next, then start the
    /// dispatcher once the session is authenticated.
    ///
    /// `connectivity` is the shell's network-probe output used to
    /// derive heartbeat online/offline; pass `None` for always-online.
    pub fn new(
        config: AgentConfig,
        navigator: Arc<dyn ScreenNavigator>,
        connectivity: Option<watch::Receiver<bool>>,
    ) -> Result<Self, CoreError> {
        let device_id = DeviceIdentity::new(&config.data_dir).resolve()?;
        let store: Arc<dyn SessionStore> = Arc::new(FileStore::open(&config.data_dir)?);

        let transport = TransportConfig {
            tls: tls_mode(&config.tls),
            timeout: config.timeout,
        };
        let client = Arc::new(SignageClient::new(
            config.backend_url.clone(),
            config.api_key.as_ref(),
            &transport,
        )?);

        let (connectivity, connectivity_tx) = match connectivity {
            Some(rx) => (rx, None),
            None => {
                let (tx, rx) = watch::channel(true);
                (rx, Some(tx))
            }
        };

        let registry = Arc::new(CommandHandlerRegistry::new());
        let dispatcher = CommandDispatcher::new(
            device_id.clone(),
            Arc::clone(&client),
            Arc::clone(&registry),
            &config,
        );
        let session = AuthSessionManager::new(
            device_id.clone(),
            client,
            store,
            navigator,
            connectivity,
            config,
        );

        // Logout must be able to stop the listener in order.
        session.set_command_listener(Arc::new(dispatcher.clone()) as Arc<dyn CommandListener>);

        Ok(Self {
            device_id,
            session,
            dispatcher,
            registry,
            _connectivity_tx: connectivity_tx,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn session(&self) -> &AuthSessionManager {
        &self.session
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn registry(&self) -> &Arc<CommandHandlerRegistry> {
        &self.registry
    }

    /// Restore session state from durable storage (sentinel check
    /// first, then all-or-nothing credential restore).
    pub async fn initialize(&self) -> Result<(), CoreError> {
        self.session.initialize().await
    }

    /// Graceful process shutdown: stop accepting commands and stop the
    /// heartbeat. Unlike logout, credentials stay persisted so the
    /// session restores on next start.
    pub async fn shutdown(&self) {
        self.dispatcher.stop_listening().await;
        self.session.set_screen_active(false).await;
    }
}

fn tls_mode(tls: &TlsVerification) -> TlsMode {
    match tls {
        TlsVerification::SystemDefaults => TlsMode::System,
        TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
        TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
    }
}
