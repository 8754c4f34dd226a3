use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crate::events::{EventKind, Frame, ServerEvent};
use crate::reconnect::{ConnectionState, ReconnectState};
use crate::ReconnectOptions;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle transitions emitted by [`EventStream`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected { reason: String },
    Reconnecting { attempt: u32 },
    /// Reconnect attempts exhausted; the stream stays down until a manual
    /// `connect()`.
    ReconnectFailed { attempts: u32 },
}

/// Reconnecting WebSocket consumer of the backend event feed.
///
/// The stream owns a single background task running the connect/reconnect
/// loop. Server events fan out on a broadcast channel ([`Self::events`]),
/// lifecycle transitions on a second one ([`Self::lifecycle`]), and the
/// coarse state is observable through a watch channel ([`Self::watch_state`]).
///
/// On every successful handshake the stream sends a `subscribe` frame with
/// the configured event names and starts the heartbeat. On transport loss it
/// reconnects with linearly increasing, capped delays up to the attempt
/// ceiling, then gives up permanently.
pub struct EventStream {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    url: String,
    options: ReconnectOptions,
    subscriptions: Vec<String>,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ServerEvent>,
    lifecycle: broadcast::Sender<ConnectionEvent>,
    manual_disconnect: AtomicBool,
}

impl EventStream {
    /// Creates a stream against a WebSocket endpoint, e.g.
    /// `ws://host:5000/ws`, subscribed to the compile lifecycle events.
    pub fn new(url: impl Into<String>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(256);
        let (lifecycle, _) = broadcast::channel(64);
        Self {
            shared: Arc::new(Shared {
                url: url.into(),
                options: ReconnectOptions::default(),
                subscriptions: EventKind::default_subscriptions(),
                state,
                events,
                lifecycle,
                manual_disconnect: AtomicBool::new(false),
            }),
            task: Mutex::new(None),
        }
    }

    /// Applies reconnect and heartbeat options. Must be called before
    /// `connect()`.
    pub fn with_options(mut self, options: ReconnectOptions) -> Self {
        self.with_shared(|shared| shared.options = options);
        self
    }

    /// Replaces the event-name set sent in the `subscribe` frame.
    pub fn with_subscriptions<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let subscriptions = events.into_iter().map(Into::into).collect();
        self.with_shared(|shared| shared.subscriptions = subscriptions);
        self
    }

    fn with_shared(&mut self, mutate: impl FnOnce(&mut Shared)) {
        // Builder-phase only: before connect() no task holds a clone.
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            mutate(shared);
        }
    }

    /// Starts the connect/reconnect loop.
    ///
    /// A no-op while a connect is in progress or the stream is connected.
    /// Clears the manual-disconnect flag, so this is also the manual restart
    /// after [`ConnectionState::PermanentlyFailed`].
    pub fn connect(&self) {
        let mut task = match self.task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(handle) = task.as_ref() {
            if !handle.is_finished() {
                return;
            }
        }
        self.shared.manual_disconnect.store(false, Ordering::SeqCst);
        self.shared.state.send_replace(ConnectionState::Connecting);
        let shared = Arc::clone(&self.shared);
        *task = Some(tokio::spawn(run(shared)));
    }

    /// Stops the stream and suppresses reconnection until the next
    /// `connect()`.
    pub fn disconnect(&self) {
        self.shared.manual_disconnect.store(true, Ordering::SeqCst);
        let mut task = match self.task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(handle) = task.take() {
            handle.abort();
        }
        self.shared
            .state
            .send_replace(ConnectionState::Disconnected);
        let _ = self.shared.lifecycle.send(ConnectionEvent::Disconnected {
            reason: "manual disconnect".to_owned(),
        });
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Watches coarse connection-state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Subscribes to decoded server events, delivered in transport order.
    pub fn events(&self) -> broadcast::Receiver<ServerEvent> {
        self.shared.events.subscribe()
    }

    /// Subscribes to lifecycle transitions.
    pub fn lifecycle(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.lifecycle.subscribe()
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }
}

async fn run(shared: Arc<Shared>) {
    let mut reconnect = ReconnectState::new(shared.options.clone());
    loop {
        if shared.manual_disconnect.load(Ordering::SeqCst) {
            shared.state.send_replace(ConnectionState::Disconnected);
            return;
        }
        shared.state.send_replace(ConnectionState::Connecting);

        match timeout(shared.options.connect_timeout, connect_async(&shared.url)).await {
            Ok(Ok((socket, _response))) => {
                reconnect.reset();
                shared.state.send_replace(ConnectionState::Connected);
                let _ = shared.lifecycle.send(ConnectionEvent::Connected);
                tracing::debug!(url = %shared.url, "event stream connected");

                let reason = drive(&shared, socket).await;
                shared.state.send_replace(ConnectionState::Disconnected);
                let _ = shared
                    .lifecycle
                    .send(ConnectionEvent::Disconnected {
                        reason: reason.clone(),
                    });
                tracing::warn!(%reason, "event stream disconnected");
            }
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "event stream connect failed");
                shared.state.send_replace(ConnectionState::Disconnected);
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = shared.options.connect_timeout.as_millis() as u64,
                    "event stream connect timed out"
                );
                shared.state.send_replace(ConnectionState::Disconnected);
            }
        }

        if shared.manual_disconnect.load(Ordering::SeqCst) {
            return;
        }
        match reconnect.next_delay() {
            Some(delay) => {
                let attempt = reconnect.attempts();
                let _ = shared
                    .lifecycle
                    .send(ConnectionEvent::Reconnecting { attempt });
                tracing::debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "scheduling reconnect"
                );
                tokio::time::sleep(delay).await;
            }
            None => {
                let attempts = reconnect.attempts();
                shared
                    .state
                    .send_replace(ConnectionState::PermanentlyFailed);
                let _ = shared
                    .lifecycle
                    .send(ConnectionEvent::ReconnectFailed { attempts });
                tracing::error!(attempts, "reconnect attempts exhausted; manual reconnect required");
                return;
            }
        }
    }
}

/// Drives one connected socket until it fails; returns the disconnect
/// reason.
async fn drive(shared: &Shared, mut socket: WsStream) -> String {
    let subscribe = Frame::subscribe(&shared.subscriptions);
    if let Err(err) = socket.send(Message::Text(subscribe)).await {
        return format!("subscribe failed: {err}");
    }

    let mut heartbeat = interval(shared.options.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first interval tick completes immediately; consume it so the
    // first probe goes out one full period after connect.
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if let Err(err) = socket.send(Message::Text(Frame::ping())).await {
                    return format!("heartbeat send failed: {err}");
                }
            }
            message = socket.next() => match message {
                Some(Ok(Message::Text(text))) => match Frame::decode(&text) {
                    Ok(event) => {
                        let _ = shared.events.send(event);
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "dropping unparseable event frame");
                    }
                },
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(err) = socket.send(Message::Pong(payload)).await {
                        return format!("pong send failed: {err}");
                    }
                }
                Some(Ok(Message::Close(_))) => return "closed by server".to_owned(),
                Some(Ok(_)) => {}
                Some(Err(err)) => return format!("transport error: {err}"),
                None => return "stream ended".to_owned(),
            }
        }
    }
}
