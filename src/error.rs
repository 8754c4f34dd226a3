/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Network or request execution error from `reqwest`.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// Non-success response from the backend, either as an HTTP status or
    /// as a `success: false` envelope.
    #[error("api error {status}: {message}")]
    Api {
        status: u16,
        /// Error message text from the response envelope, or a synthesized
        /// `HTTP <status>` fallback when the body was not decodable.
        message: String,
        /// Backend-specific error code, when supplied.
        error_code: Option<String>,
    },
    /// Response decoding or envelope-shape validation error.
    #[error("decode error: {0}")]
    Decode(String),
    /// Token cache file I/O error.
    #[error("token cache error: {0}")]
    TokenCache(#[from] std::io::Error),
}

impl ClientError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Timeouts are terminal: a repeat attempt would spend the same budget
    /// on the same stalled endpoint. Server-side 5xx and transport-level
    /// failures (refused, reset, DNS) are transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport(err) => !err.is_timeout(),
            ClientError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
