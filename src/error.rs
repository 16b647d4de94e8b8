//! Error types for the twarc2 client.

use std::error::Error as StdError;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the client.
#[derive(Error, Debug)]
pub enum Error {
    // ===== API Errors =====
    #[error("API error: {status} {status_text} - {message}")]
    Api {
        status: u16,
        status_text: String,
        message: String,
        /// Server supplied hint for when the request may be retried.
        retry_after: Option<Duration>,
    },

    #[error("Credentials not found: {0}")]
    CredentialsNotFound(String),

    // ===== Stream Errors =====
    #[error("Stream parse error: {source} (line: {line:?})")]
    Parse {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Stream decode error: {source} (line: {line:?})")]
    InvalidUtf8 {
        line: Vec<u8>,
        #[source]
        source: std::str::Utf8Error,
    },

    #[error("Session closed: http session {0} was replaced while a response was open")]
    SessionClosed(u64),

    // ===== I/O Errors =====
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // ===== HTTP Errors =====
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // ===== Internal Errors =====
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cancelled: operation was cancelled")]
    Cancelled,
}

/// Transport level failure classes, as seen by the retry policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// The peer reset or aborted the connection.
    ConnectionReset,
    /// A read did not complete in time.
    Timeout,
    /// The body could not be decoded (e.g. corrupt gzip).
    Decode,
    /// Connect, TLS or protocol failure.
    Connection,
}

impl Error {
    /// Create an API error from HTTP response details.
    pub fn api(status: u16, status_text: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            status_text: status_text.into(),
            message: message.into(),
            retry_after: None,
        }
    }

    /// Attach a retry-after hint to an API error. Other variants are returned unchanged.
    pub fn with_retry_after(self, hint: Option<Duration>) -> Self {
        match self {
            Self::Api {
                status,
                status_text,
                message,
                ..
            } => Self::Api {
                status,
                status_text,
                message,
                retry_after: hint,
            },
            other => other,
        }
    }

    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether the server signalled rate limiting (429, or 420 on streaming endpoints).
    pub fn is_rate_limited(&self) -> bool {
        matches!(self.status(), Some(420) | Some(429))
    }

    /// Classify a transport failure. Returns `None` for errors that did not
    /// come from the wire (status errors, builder errors, parse errors...).
    pub fn transport_kind(&self) -> Option<TransportKind> {
        match self {
            Self::Http(e) => classify_reqwest(e),
            Self::Io(e) => Some(classify_io(e.kind())),
            Self::SessionClosed(_) => Some(TransportKind::ConnectionReset),
            _ => None,
        }
    }
}

fn classify_reqwest(e: &reqwest::Error) -> Option<TransportKind> {
    if e.is_builder() || e.is_redirect() || e.is_status() {
        return None;
    }
    // connect timeouts count as connection failures, not read timeouts
    if e.is_timeout() {
        return Some(if e.is_connect() {
            TransportKind::Connection
        } else {
            TransportKind::Timeout
        });
    }
    if let Some(kind) = io_source_kind(e) {
        if matches!(classify_io(kind), TransportKind::ConnectionReset) {
            return Some(TransportKind::ConnectionReset);
        }
    }
    if e.is_decode() {
        return Some(TransportKind::Decode);
    }
    Some(TransportKind::Connection)
}

fn io_source_kind(e: &reqwest::Error) -> Option<std::io::ErrorKind> {
    let mut source = StdError::source(e);
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            return Some(io.kind());
        }
        source = StdError::source(err);
    }
    None
}

fn classify_io(kind: std::io::ErrorKind) -> TransportKind {
    use std::io::ErrorKind;
    match kind {
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
            TransportKind::ConnectionReset
        }
        ErrorKind::TimedOut => TransportKind::Timeout,
        ErrorKind::InvalidData => TransportKind::Decode,
        _ => TransportKind::Connection,
    }
}
