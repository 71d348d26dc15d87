use std::sync::Arc;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the experiment client.
///
/// Most per-fetch errors never reach the caller directly: they are logged and delivered through
/// the [`AsyncResult`](crate::AsyncResult) returned by the operation that started the fetch.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The client was configured with invalid settings (e.g., a blank API key).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Invalid server URL configuration.
    #[error("invalid server_url configuration")]
    InvalidServerUrl(#[source] url::ParseError),

    /// Network error while talking to the server.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),

    /// Timed out waiting for an asynchronous result.
    #[error("timed out waiting for result")]
    Timeout,

    /// Malformed JSON.
    #[error(transparent)]
    Parse(Arc<serde_json::Error>),

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// No client has been initialized under the requested instance name.
    #[error("client instance {0:?} must be initialized before it is accessed")]
    UninitializedClient(String),

    /// The shared scheduler has been shut down and does not accept new tasks.
    #[error("scheduler has been shut down")]
    Shutdown,

    /// A worker thread panicked while running a task. This should normally never happen.
    #[error("worker thread panicked")]
    WorkerPanicked,
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        // The request URL embeds the encoded user, keep it out of error messages.
        Error::Network(Arc::new(value.without_url()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::Parse(Arc::new(value))
    }
}
