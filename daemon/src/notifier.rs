//! Desktop notifications for finished runs

use notify_rust::Notification;
use tracing::warn;

pub fn send_notification(summary: &str, body: &str) -> Result<(), notify_rust::error::Error> {
    Notification::new()
        .summary(summary)
        .body(body)
        .appname("CancerDetect")
        .show()?;
    Ok(())
}

pub struct Notifier {
    enabled: bool,
}

impl Notifier {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Failures are logged only.
    pub fn send(&self, title: &str, body: &str) {
        if !self.enabled {
            return;
        }
        if let Err(e) = send_notification(title, body) {
            warn!("Failed to send notification: {}", e);
        }
    }
}
