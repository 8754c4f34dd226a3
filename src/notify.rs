use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::broadcast;

use crate::stream::ConnectionEvent;

/// Display severity of a notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// A user-facing, dismissible notification.
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub severity: Severity,
    /// Auto-expiry hint for display layers; `None` means sticky.
    pub timeout: Option<Duration>,
}

impl Notification {
    pub fn new(title: impl Into<String>, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            severity,
            timeout: Some(Duration::from_secs(5)),
        }
    }

    /// A notification that stays until dismissed.
    pub fn sticky(title: impl Into<String>, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            timeout: None,
            ..Self::new(title, message, severity)
        }
    }
}

/// Opaque handle identifying a subscribed listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListenerId(u64);

type Listener = Box<dyn Fn(&Notification) + Send + Sync>;

/// Fan-out hub for user-facing notifications.
///
/// Each listener call is isolated: a panicking listener is logged and
/// skipped, never blocking delivery to the remaining listeners.
#[derive(Default)]
pub struct Notifier {
    listeners: RwLock<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&Notification) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut listeners = match self.listeners.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        listeners.push((id, Box::new(listener)));
        ListenerId(id)
    }

    /// Removes a listener; returns whether it was still registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = match self.listeners.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id.0);
        listeners.len() != before
    }

    pub fn publish(&self, notification: &Notification) {
        let listeners = match self.listeners.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for (id, listener) in listeners.iter() {
            if catch_unwind(AssertUnwindSafe(|| listener(notification))).is_err() {
                tracing::error!(listener = id, "notification listener panicked");
            }
        }
    }
}

/// Translates stream lifecycle events into notifications until the
/// lifecycle channel closes.
pub async fn bridge_lifecycle(
    notifier: Arc<Notifier>,
    mut lifecycle: broadcast::Receiver<ConnectionEvent>,
) {
    loop {
        match lifecycle.recv().await {
            Ok(event) => {
                if let Some(notification) = notification_for(&event) {
                    notifier.publish(&notification);
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "lifecycle receiver lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

fn notification_for(event: &ConnectionEvent) -> Option<Notification> {
    match event {
        ConnectionEvent::Connected => Some(Notification::new(
            "Connection",
            "event stream connected",
            Severity::Success,
        )),
        ConnectionEvent::Disconnected { reason } => Some(Notification::new(
            "Connection",
            format!("event stream disconnected: {reason}"),
            Severity::Warning,
        )),
        ConnectionEvent::Reconnecting { .. } => None,
        ConnectionEvent::ReconnectFailed { attempts } => Some(Notification::sticky(
            "Connection",
            format!("reconnect gave up after {attempts} attempts; manual reconnect required"),
            Severity::Error,
        )),
    }
}
