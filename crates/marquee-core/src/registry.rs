// ── Command handler registry ──
//
// Maps command kinds to executable actions. The UI shell registers
// handlers (screen navigation, forced sync, screen-share activation,
// logout); the dispatcher looks them up and invokes them. A kind with
// no registered handler resolves to a `failed` acknowledgement, never
// a dropped command.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use futures_util::future::BoxFuture;

use crate::error::CoreError;
use crate::model::{Command, CommandKind};

/// An executable action for one command kind.
///
/// Implementations should be short-running: the dispatcher awaits the
/// returned future before acknowledging the command, and shutdown does
/// not cancel a handler mid-flight.
pub trait CommandHandler: Send + Sync {
    fn handle(&self, command: Command) -> BoxFuture<'_, Result<(), CoreError>>;
}

/// Adapter turning an async closure into a [`CommandHandler`].
struct FnHandler<F>(F);

impl<F> CommandHandler for FnHandler<F>
where
    F: Fn(Command) -> BoxFuture<'static, Result<(), CoreError>> + Send + Sync,
{
    fn handle(&self, command: Command) -> BoxFuture<'_, Result<(), CoreError>> {
        (self.0)(command)
    }
}

/// Registry of command handlers, keyed by kind.
///
/// Registration happens at shell startup; lookups happen on the
/// dispatcher's hot path. The lock is never held across an await.
#[derive(Default)]
pub struct CommandHandlerRegistry {
    handlers: RwLock<HashMap<CommandKind, Arc<dyn CommandHandler>>>,
}

impl CommandHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a command kind, replacing any previous one.
    pub fn register(&self, kind: CommandKind, handler: Arc<dyn CommandHandler>) {
        if let Ok(mut map) = self.handlers.write() {
            map.insert(kind, handler);
        }
    }

    /// Register an async closure as the handler for a command kind.
    pub fn register_fn<F, Fut>(&self, kind: CommandKind, f: F)
    where
        F: Fn(Command) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CoreError>> + Send + 'static,
    {
        let handler = FnHandler(move |command| {
            Box::pin(f(command)) as BoxFuture<'static, Result<(), CoreError>>
        });
        self.register(kind, Arc::new(handler));
    }

    /// Look up the handler for a command kind.
    pub fn get(&self, kind: &CommandKind) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.read().ok()?.get(kind).cloned()
    }

    /// The kinds currently registered (diagnostics).
    pub fn registered_kinds(&self) -> Vec<CommandKind> {
        self.handlers
            .read()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn command(kind: CommandKind) -> Command {
        Command {
            id: "c1".into(),
            device_id: "dev-1".into(),
            kind,
            status: crate::model::CommandStatus::Pending,
            payload: serde_json::Value::Null,
            created_at: None,
        }
    }

    #[tokio::test]
    async fn registered_closure_is_invoked() {
        let registry = CommandHandlerRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        registry.register_fn(CommandKind::SyncStatus, move |_cmd| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let handler = registry.get(&CommandKind::SyncStatus).expect("registered");
        handler.handle(command(CommandKind::SyncStatus)).await.expect("ok");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unknown_kind_has_no_handler() {
        let registry = CommandHandlerRegistry::new();
        assert!(registry.get(&CommandKind::Unknown("reboot".into())).is_none());
    }

    #[test]
    fn re_registration_replaces_handler() {
        let registry = CommandHandlerRegistry::new();
        registry.register_fn(CommandKind::Logout, |_| async { Ok(()) });
        registry.register_fn(CommandKind::Logout, |_| async {
            Err(CoreError::Handler {
                message: "second".into(),
            })
        });
        assert_eq!(registry.registered_kinds(), vec![CommandKind::Logout]);
    }
}
