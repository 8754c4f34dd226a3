//! `owcompiler-client` is an async client for the OpenWrt Compiler build
//! service.
//!
//! Two halves, sharing one error type:
//! - [`ApiClient`]: the REST API with bearer auth and a retrying send
//!   loop (5xx and transport failures retried, 4xx and timeouts terminal).
//! - [`EventStream`]: the WebSocket event feed with bounded reconnection,
//!   a periodic heartbeat, and broadcast fan-out of decoded
//!   [`ServerEvent`]s; [`EventRouter`] dispatches them to handlers.
//!
//! ```no_run
//! use owcompiler_client::{ApiClient, EventStream};
//!
//! # async fn demo() -> owcompiler_client::Result<()> {
//! let api = ApiClient::new("http://127.0.0.1:5000/api");
//! api.login("kit", "hunter2").await?;
//! let status = api.compile_status().await?;
//! println!("{}: {:.0}%", status.status, status.progress);
//!
//! let stream = EventStream::new("ws://127.0.0.1:5000/ws");
//! let mut events = stream.events();
//! stream.connect();
//! while let Ok(event) = events.recv().await {
//!     println!("{}", event.name());
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod events;
mod notify;
mod options;
mod reconnect;
mod router;
mod stream;
mod token;
mod wire;

pub use client::ApiClient;
pub use error::ClientError;
pub use events::{
    Completion, ConnectedAck, EventKind, Failure, Frame, Heartbeat, LogLevel, LogLine,
    ProgressUpdate, ServerEvent, StatusUpdate, SubscribeAck,
};
pub use notify::{bridge_lifecycle, ListenerId, Notification, Notifier, Severity};
pub use options::{ClientOptions, ReconnectOptions};
pub use reconnect::ConnectionState;
pub use router::EventRouter;
pub use stream::{ConnectionEvent, EventStream};
pub use token::TokenCache;
pub use wire::{
    Ack, CompileOptions, CompileStatus, ConfigTemplate, Device, DeviceConfig, DeviceSearch,
    Envelope, FileEntry, FileKind, FileValidation, Health, LoginData, RepositoryStatus,
    StorageInfo,
};

pub type Result<T> = std::result::Result<T, ClientError>;
