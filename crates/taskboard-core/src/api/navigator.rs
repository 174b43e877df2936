use tracing::warn;

/// Receives the "go to the logged-out view" side effect when the session
/// cannot be recovered.
pub trait Navigator: Send + Sync {
    fn redirect(&self, destination: &str);
}

/// Logs the redirect and does nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNavigator;

impl Navigator for TracingNavigator {
    fn redirect(&self, destination: &str) {
        warn!(destination = destination, "Session expired, redirecting to logged-out view");
    }
}
