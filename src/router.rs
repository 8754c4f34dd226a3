use std::collections::HashMap;

use tokio::sync::broadcast;

use crate::events::{EventKind, ServerEvent};

type Handler = Box<dyn Fn(&ServerEvent) + Send + Sync>;

/// Dispatch table from server event names to state-update handlers.
///
/// Each event kind maps to at most one handler; registering a kind twice
/// replaces the earlier handler. Events without a handler, including events
/// the client does not recognize, are dropped with a debug log.
#[derive(Default)]
pub struct EventRouter {
    handlers: HashMap<EventKind, Handler>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler for an event kind, replacing any existing one.
    pub fn on(
        &mut self,
        kind: EventKind,
        handler: impl Fn(&ServerEvent) + Send + Sync + 'static,
    ) -> &mut Self {
        self.handlers.insert(kind, Box::new(handler));
        self
    }

    /// Routes one event to its handler.
    pub fn dispatch(&self, event: &ServerEvent) {
        match event.kind().and_then(|kind| self.handlers.get(&kind)) {
            Some(handler) => handler(event),
            None => tracing::debug!(event = event.name(), "no handler registered, event dropped"),
        }
    }

    /// Drives a stream receiver until the channel closes. A lagged receiver
    /// skips ahead rather than stopping.
    pub async fn run(self, mut events: broadcast::Receiver<ServerEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => self.dispatch(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}
