/// Out-of-band notification delivery for recipients with no open live connection.
///
/// Best-effort and infallible from the caller's side: an implementation that
/// talks to a remote service logs its own failures.
pub trait PushProvider: Send + Sync {
    fn send(&self, target: &str, title: &str, body: &str);
}

/// Default provider: records the push in the log and nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPushProvider;

impl PushProvider for TracingPushProvider {
    fn send(&self, target: &str, title: &str, body: &str) {
        tracing::info!(user_id = %target, title = %title, body = %body, "Push notification");
    }
}
