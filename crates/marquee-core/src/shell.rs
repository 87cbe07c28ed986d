// ── Presentation seams ──
//
// The agent never renders anything itself. The UI shell implements
// these traits and registers command handlers; the core calls through
// them at the few points where session lifecycle touches the screen.

/// Navigation hook into the presentation layer.
pub trait ScreenNavigator: Send + Sync {
    /// Redirect the presentation layer to the unauthenticated entry
    /// point. Called as the final step of logout.
    fn to_login_screen(&self);
}

/// No-op navigator for tests and headless deployments.
pub struct NoopNavigator;

impl ScreenNavigator for NoopNavigator {
    fn to_login_screen(&self) {}
}
