//! Authenticated HTTP session management.
//!
//! The [`SessionManager`] is the only component allowed to open or close the
//! underlying connection pool. Everything else borrows the current
//! [`Session`] for the duration of one request attempt.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Connect timeout for every request.
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(3050);

/// Per-read timeout for every request.
pub const READ_TIMEOUT: Duration = Duration::from_secs(31);

/// User agent string for API requests.
fn user_agent() -> String {
    format!("twarc2-rs/{}", crate::VERSION)
}

/// Timeouts applied to every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    pub connect: Duration,
    pub read: Duration,
    /// Optional cap on a whole request; unset by default because stream
    /// responses live indefinitely.
    pub total: Option<Duration>,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            connect: CONNECT_TIMEOUT,
            read: READ_TIMEOUT,
            total: None,
        }
    }
}

/// One open, authenticated connection pool.
#[derive(Debug, Clone)]
pub struct Session {
    http: reqwest::Client,
    generation: u64,
    closed: CancellationToken,
}

impl Session {
    fn open(bearer_token: &str, timeouts: &SessionTimeouts, generation: u64) -> Result<Self> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", bearer_token))
            .map_err(|_| Error::Config("bearer token contains invalid header characters".to_string()))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let mut builder = reqwest::Client::builder()
            .user_agent(user_agent())
            .default_headers(headers)
            .connect_timeout(timeouts.connect)
            .read_timeout(timeouts.read);
        if let Some(total) = timeouts.total {
            builder = builder.timeout(total);
        }

        let http = builder
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            generation,
            closed: CancellationToken::new(),
        })
    }

    /// The underlying HTTP client, pre-configured with the bearer header.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Monotonic identifier; bumped on every reconnect.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

#[derive(Debug, Clone)]
struct LastResponse {
    generation: u64,
    url: String,
    status: u16,
}

#[derive(Debug)]
struct SessionState {
    session: Session,
    last_response: Option<LastResponse>,
}

/// Owns the single open [`Session`] and replaces it on demand.
#[derive(Debug)]
pub struct SessionManager {
    bearer_token: String,
    timeouts: SessionTimeouts,
    state: RwLock<SessionState>,
}

impl SessionManager {
    /// Open the first session.
    pub fn new(bearer_token: impl Into<String>, timeouts: SessionTimeouts) -> Result<Self> {
        let bearer_token = bearer_token.into();
        info!("creating http session");
        let session = Session::open(&bearer_token, &timeouts, 1)?;

        Ok(Self {
            bearer_token,
            timeouts,
            state: RwLock::new(SessionState {
                session,
                last_response: None,
            }),
        })
    }

    /// Close the current session and any response still open on it, then
    /// open a fresh one. Always leaves exactly one open session.
    pub async fn connect(&self) -> Result<()> {
        let mut state = self.state.write().await;

        info!(generation = state.session.generation, "closing existing http session");
        state.session.close();

        if let Some(last) = state.last_response.take() {
            info!(
                generation = last.generation,
                url = %last.url,
                status = last.status,
                "closing last response"
            );
        }

        let generation = state.session.generation + 1;
        info!(generation, "creating http session");
        state.session = Session::open(&self.bearer_token, &self.timeouts, generation)?;
        Ok(())
    }

    /// A handle to the currently open session.
    pub async fn current(&self) -> Session {
        self.state.read().await.session.clone()
    }

    /// Remember the most recent response so the next reconnect can report it.
    pub async fn record_response(&self, session: &Session, url: &str, status: u16) {
        let mut state = self.state.write().await;
        if state.session.generation == session.generation {
            state.last_response = Some(LastResponse {
                generation: session.generation,
                url: url.to_string(),
                status,
            });
        }
    }

    pub async fn generation(&self) -> u64 {
        self.state.read().await.session.generation
    }
}

/// A successful (or allowed) response, bound to the session it came from.
///
/// The body is either buffered during the request attempt or left on the
/// wire for line-by-line reading. Reading from a response whose session has
/// since been replaced fails with [`Error::SessionClosed`].
#[derive(Debug)]
pub struct ApiResponse {
    status: StatusCode,
    url: String,
    inner: Option<Response>,
    buffer: Vec<u8>,
    eof: bool,
    generation: u64,
    closed: CancellationToken,
}

impl ApiResponse {
    pub(crate) fn streaming(response: Response, session: &Session) -> Self {
        Self {
            status: response.status(),
            url: response.url().to_string(),
            inner: Some(response),
            buffer: Vec::new(),
            eof: false,
            generation: session.generation,
            closed: session.closed.clone(),
        }
    }

    pub(crate) fn buffered(status: StatusCode, url: String, body: Vec<u8>, session: &Session) -> Self {
        Self {
            status,
            url,
            inner: None,
            buffer: body,
            eof: true,
            generation: session.generation,
            closed: session.closed.clone(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Session generation this response belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Read the next newline-delimited line, without its terminator.
    ///
    /// Returns `Ok(None)` once the body is exhausted. A trailing partial line
    /// is returned as a final line. A line that is not valid UTF-8 fails with
    /// [`Error::InvalidUtf8`].
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
                let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
                line.pop();
                return decode_line(line).map(Some);
            }

            if self.eof {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                let line = std::mem::take(&mut self.buffer);
                return decode_line(line).map(Some);
            }

            let Some(response) = self.inner.as_mut() else {
                self.eof = true;
                continue;
            };

            let chunk = tokio::select! {
                biased;
                _ = self.closed.cancelled() => None,
                chunk = response.chunk() => Some(chunk),
            };

            let Some(chunk) = chunk else {
                debug!(generation = self.generation, "response closed by reconnect");
                self.inner = None;
                return Err(Error::SessionClosed(self.generation));
            };

            match chunk? {
                Some(bytes) => self.buffer.extend_from_slice(&bytes),
                None => {
                    self.inner = None;
                    self.eof = true;
                }
            }
        }
    }

    /// Read the remaining body as bytes.
    pub async fn bytes(mut self) -> Result<Vec<u8>> {
        if let Some(response) = self.inner.take() {
            let rest = tokio::select! {
                biased;
                _ = self.closed.cancelled() => return Err(Error::SessionClosed(self.generation)),
                rest = response.bytes() => rest?,
            };
            self.buffer.extend_from_slice(&rest);
        }
        Ok(self.buffer)
    }

    /// Deserialize the remaining body as JSON.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        let body = self.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Drop the connection explicitly.
    pub fn close(mut self) {
        if self.inner.take().is_some() {
            debug!(url = %self.url, "closing response");
        }
    }
}

fn decode_line(mut raw: Vec<u8>) -> Result<String> {
    if raw.last() == Some(&b'\r') {
        raw.pop();
    }
    String::from_utf8(raw).map_err(|e| Error::InvalidUtf8 {
        source: e.utf8_error(),
        line: e.into_bytes(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionManager {
        SessionManager::new("test-token", SessionTimeouts::default()).unwrap()
    }

    #[test]
    fn test_default_timeouts() {
        let timeouts = SessionTimeouts::default();
        assert_eq!(timeouts.connect, Duration::from_millis(3050));
        assert_eq!(timeouts.read, Duration::from_secs(31));
        assert!(timeouts.total.is_none());
    }

    #[test]
    fn test_invalid_token_rejected() {
        let err = SessionManager::new("bad\ntoken", SessionTimeouts::default()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_connect_replaces_and_closes_session() {
        let manager = manager();
        let first = manager.current().await;
        assert_eq!(first.generation(), 1);
        assert!(!first.is_closed());

        manager.connect().await.unwrap();
        let second = manager.current().await;

        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(second.generation(), 2);
        assert_eq!(manager.generation().await, 2);
    }

    #[tokio::test]
    async fn test_connect_is_repeatable() {
        let manager = manager();
        for _ in 0..3 {
            manager.connect().await.unwrap();
        }
        assert_eq!(manager.generation().await, 4);
        assert!(!manager.current().await.is_closed());
    }

    #[tokio::test]
    async fn test_buffered_lines() {
        let manager = manager();
        let session = manager.current().await;
        let body = b"{\"a\":1}\r\n\n{\"b\":2}".to_vec();
        let mut response = ApiResponse::buffered(StatusCode::OK, "http://x".into(), body, &session);

        assert_eq!(response.next_line().await.unwrap().as_deref(), Some("{\"a\":1}"));
        assert_eq!(response.next_line().await.unwrap().as_deref(), Some(""));
        assert_eq!(response.next_line().await.unwrap().as_deref(), Some("{\"b\":2}"));
        assert_eq!(response.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_rejected() {
        let manager = manager();
        let session = manager.current().await;
        let body = b"{\"text\":\"a\xffb\"}\n".to_vec();
        let mut response = ApiResponse::buffered(StatusCode::OK, "http://x".into(), body, &session);

        match response.next_line().await {
            Err(Error::InvalidUtf8 { line, .. }) => assert_eq!(line, b"{\"text\":\"a\xffb\"}".to_vec()),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_buffered_json() {
        let manager = manager();
        let session = manager.current().await;
        let response = ApiResponse::buffered(
            StatusCode::OK,
            "http://x".into(),
            br#"{"data":[{"id":"1"}]}"#.to_vec(),
            &session,
        );

        let value: serde_json::Value = response.json().await.unwrap();
        assert_eq!(value["data"][0]["id"], "1");
    }
}
