//! User-facing error notifications

/// Sink for errors the user should see, separate from the log stream.
pub trait Notifier: Send + Sync {
    fn notify_error(&self, message: &str);
}

/// Routes notifications into tracing.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify_error(&self, message: &str) {
        tracing::warn!(target: "pinup::notify", "{message}");
    }
}
