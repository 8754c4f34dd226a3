use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Names of the server-pushed events the backend emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Pong,
    Subscribed,
    CompileLog,
    CompileProgress,
    CompileStatus,
    CompileComplete,
    CompileError,
    CloneProgress,
    CloneComplete,
    CloneError,
    FeedsLog,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Pong => "pong",
            EventKind::Subscribed => "subscribed",
            EventKind::CompileLog => "compile_log",
            EventKind::CompileProgress => "compile_progress",
            EventKind::CompileStatus => "compile_status",
            EventKind::CompileComplete => "compile_complete",
            EventKind::CompileError => "compile_error",
            EventKind::CloneProgress => "clone_progress",
            EventKind::CloneComplete => "clone_complete",
            EventKind::CloneError => "clone_error",
            EventKind::FeedsLog => "feeds_log",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "connected" => EventKind::Connected,
            "pong" => EventKind::Pong,
            "subscribed" => EventKind::Subscribed,
            "compile_log" => EventKind::CompileLog,
            "compile_progress" => EventKind::CompileProgress,
            "compile_status" => EventKind::CompileStatus,
            "compile_complete" => EventKind::CompileComplete,
            "compile_error" => EventKind::CompileError,
            "clone_progress" => EventKind::CloneProgress,
            "clone_complete" => EventKind::CloneComplete,
            "clone_error" => EventKind::CloneError,
            "feeds_log" => EventKind::FeedsLog,
            _ => return None,
        })
    }

    /// The compile-lifecycle set the control panel subscribes to by default.
    pub fn default_subscriptions() -> Vec<String> {
        [
            EventKind::CompileLog,
            EventKind::CompileProgress,
            EventKind::CompileStatus,
            EventKind::CompileComplete,
            EventKind::CompileError,
        ]
        .iter()
        .map(|kind| kind.as_str().to_owned())
        .collect()
    }
}

/// A single build output line, streamed by `compile_log` and `feeds_log`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct LogLine {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub line: String,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Progress payload for `compile_progress` and `clone_progress`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ProgressUpdate {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Status payload for `compile_status`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct StatusUpdate {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Completion payload for `compile_complete` and `clone_complete`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Completion {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub firmware_files: Vec<JsonValue>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Failure payload for `compile_error` and `clone_error`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Failure {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Server acknowledgement sent right after the WebSocket handshake.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ConnectedAck {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
}

/// Heartbeat response payload.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Heartbeat {
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Acknowledgement of a `subscribe` request.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct SubscribeAck {
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// A decoded server-pushed event.
///
/// Decoding is forward-compatible: unknown event names are preserved as
/// [`ServerEvent::Unknown`], and extra payload fields are ignored.
#[derive(Clone, Debug, PartialEq)]
pub enum ServerEvent {
    Connected(ConnectedAck),
    Pong(Heartbeat),
    Subscribed(SubscribeAck),
    CompileLog(LogLine),
    CompileProgress(ProgressUpdate),
    CompileStatus(StatusUpdate),
    CompileComplete(Completion),
    CompileError(Failure),
    CloneProgress(ProgressUpdate),
    CloneComplete(Completion),
    CloneError(Failure),
    FeedsLog(LogLine),
    /// Event name this client does not know; payload kept raw.
    Unknown { name: String, data: JsonValue },
}

impl ServerEvent {
    /// Decodes a named event payload.
    ///
    /// Fails only when a known event's payload has the wrong shape; unknown
    /// names never fail.
    pub fn decode(name: &str, data: JsonValue) -> Result<Self, serde_json::Error> {
        let Some(kind) = EventKind::from_name(name) else {
            return Ok(ServerEvent::Unknown {
                name: name.to_owned(),
                data,
            });
        };
        Ok(match kind {
            EventKind::Connected => ServerEvent::Connected(serde_json::from_value(data)?),
            EventKind::Pong => ServerEvent::Pong(serde_json::from_value(data)?),
            EventKind::Subscribed => ServerEvent::Subscribed(serde_json::from_value(data)?),
            EventKind::CompileLog => ServerEvent::CompileLog(serde_json::from_value(data)?),
            EventKind::CompileProgress => {
                ServerEvent::CompileProgress(serde_json::from_value(data)?)
            }
            EventKind::CompileStatus => ServerEvent::CompileStatus(serde_json::from_value(data)?),
            EventKind::CompileComplete => {
                ServerEvent::CompileComplete(serde_json::from_value(data)?)
            }
            EventKind::CompileError => ServerEvent::CompileError(serde_json::from_value(data)?),
            EventKind::CloneProgress => ServerEvent::CloneProgress(serde_json::from_value(data)?),
            EventKind::CloneComplete => ServerEvent::CloneComplete(serde_json::from_value(data)?),
            EventKind::CloneError => ServerEvent::CloneError(serde_json::from_value(data)?),
            EventKind::FeedsLog => ServerEvent::FeedsLog(serde_json::from_value(data)?),
        })
    }

    /// The event's kind, or `None` for [`ServerEvent::Unknown`].
    pub fn kind(&self) -> Option<EventKind> {
        Some(match self {
            ServerEvent::Connected(_) => EventKind::Connected,
            ServerEvent::Pong(_) => EventKind::Pong,
            ServerEvent::Subscribed(_) => EventKind::Subscribed,
            ServerEvent::CompileLog(_) => EventKind::CompileLog,
            ServerEvent::CompileProgress(_) => EventKind::CompileProgress,
            ServerEvent::CompileStatus(_) => EventKind::CompileStatus,
            ServerEvent::CompileComplete(_) => EventKind::CompileComplete,
            ServerEvent::CompileError(_) => EventKind::CompileError,
            ServerEvent::CloneProgress(_) => EventKind::CloneProgress,
            ServerEvent::CloneComplete(_) => EventKind::CloneComplete,
            ServerEvent::CloneError(_) => EventKind::CloneError,
            ServerEvent::FeedsLog(_) => EventKind::FeedsLog,
            ServerEvent::Unknown { .. } => return None,
        })
    }

    /// The wire name of the event.
    pub fn name(&self) -> &str {
        match self {
            ServerEvent::Unknown { name, .. } => name,
            _ => match self.kind() {
                Some(kind) => kind.as_str(),
                None => "unknown",
            },
        }
    }
}

/// Wire frame carried in each WebSocket text message, both directions:
/// `{"event": <name>, "data": <object>}`.
#[derive(Debug, Deserialize, Serialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: JsonValue,
}

impl Frame {
    /// Decodes a raw text message into a [`ServerEvent`].
    pub fn decode(text: &str) -> Result<ServerEvent, serde_json::Error> {
        let frame: Frame = serde_json::from_str(text)?;
        ServerEvent::decode(&frame.event, frame.data)
    }

    pub(crate) fn subscribe(events: &[String]) -> String {
        serde_json::json!({ "event": "subscribe", "data": { "events": events } }).to_string()
    }

    pub(crate) fn ping() -> String {
        serde_json::json!({ "event": "ping", "data": {} }).to_string()
    }
}

/// Display severity assigned to a build log line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warning,
    Success,
    Info,
}

impl LogLevel {
    /// Keyword heuristic over the lowercased line, checked in severity
    /// order. Styling aid only; the backend makes no level contract.
    pub fn classify(line: &str) -> Self {
        let lower = line.to_lowercase();
        if ["error", "failed", "fatal"].iter().any(|k| lower.contains(k)) {
            LogLevel::Error
        } else if lower.contains("warning") || lower.contains("warn") {
            LogLevel::Warning
        } else if ["success", "complete", "done"]
            .iter()
            .any(|k| lower.contains(k))
        {
            LogLevel::Success
        } else {
            LogLevel::Info
        }
    }
}
