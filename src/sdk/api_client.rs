//! HTTP client for the Twitter v2 API.
//!
//! Every outbound request goes through [`Client::get`], which replays a
//! [`RequestDescriptor`] against the current session until it succeeds or
//! the [`PolicyStack`] decides to give up. Streaming endpoints hand the
//! response over to a [`StreamConsumer`], which owns reconnects from then on.

use futures::stream::{self, Stream, StreamExt};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::metrics::ClientMetrics;
use crate::sdk::cancel::{PollingSleeper, Sleeper, StopToken};
use crate::sdk::request::RequestDescriptor;
use crate::sdk::retry::{retry_after_from_headers, Decision, FailureKind, PolicyStack, RetryConfig, RetryContext};
use crate::sdk::session::{ApiResponse, Session, SessionManager, SessionTimeouts};
use crate::sdk::stream::{StreamBackoff, StreamConsumer};
use crate::sdk::types::{everything, user_everything, RulesResponse, SearchOptions, StreamRule};

/// Default API root.
pub const DEFAULT_API_URL: &str = "https://api.twitter.com/2";

/// Maximum ids per lookup request.
pub const LOOKUP_BATCH_SIZE: usize = 100;

/// Builder for [`Client`].
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    bearer_token: String,
    api_url: String,
    retry: RetryConfig,
    http_errors: u32,
    timeouts: SessionTimeouts,
    backoff: StreamBackoff,
    sleeper: Option<Arc<dyn Sleeper>>,
}

impl ClientBuilder {
    pub fn new(bearer_token: impl Into<String>) -> Self {
        Self {
            bearer_token: bearer_token.into(),
            api_url: DEFAULT_API_URL.to_string(),
            retry: RetryConfig::default(),
            http_errors: 0,
            timeouts: SessionTimeouts::default(),
            backoff: StreamBackoff::default(),
            sleeper: None,
        }
    }

    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    /// Maximum connection errors per request (0 = unlimited).
    pub fn connection_errors(mut self, max: u32) -> Self {
        self.retry.connection_errors = max;
        self
    }

    /// Maximum consecutive stream errors (0 = unlimited).
    pub fn http_errors(mut self, max: u32) -> Self {
        self.http_errors = max;
        self
    }

    /// Replace the whole retry configuration, including the connection
    /// error budget.
    pub fn retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn timeouts(mut self, timeouts: SessionTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn stream_backoff(mut self, backoff: StreamBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Override the waiting primitive used for pauses and backoff.
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    /// Open the first session and build the client.
    pub fn build(self) -> Result<Client> {
        let sessions = SessionManager::new(self.bearer_token, self.timeouts)?;
        Ok(Client {
            api_url: self.api_url.trim_end_matches('/').to_string(),
            sessions,
            policies: PolicyStack::from_config(&self.retry),
            http_errors: self.http_errors,
            backoff: self.backoff,
            sleeper: self.sleeper.unwrap_or_else(|| Arc::new(PollingSleeper::default())),
            idle: StopToken::new(),
            metrics: ClientMetrics::new(),
        })
    }
}

/// API client.
#[derive(Debug)]
pub struct Client {
    api_url: String,
    sessions: SessionManager,
    policies: PolicyStack,
    http_errors: u32,
    backoff: StreamBackoff,
    sleeper: Arc<dyn Sleeper>,
    /// Never cancelled; used for pauses outside a stream.
    idle: StopToken,
    metrics: Arc<ClientMetrics>,
}

impl Client {
    /// Create a client with default settings.
    pub fn new(bearer_token: impl Into<String>) -> Result<Self> {
        ClientBuilder::new(bearer_token).build()
    }

    pub fn builder(bearer_token: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(bearer_token)
    }

    /// Get the API URL.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Absolute URL for an endpoint path.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_url, path.trim_start_matches('/'))
    }

    pub fn metrics(&self) -> &Arc<ClientMetrics> {
        &self.metrics
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub(crate) fn http_errors(&self) -> u32 {
        self.http_errors
    }

    pub(crate) fn stream_backoff(&self) -> StreamBackoff {
        self.backoff
    }

    pub(crate) fn sleeper(&self) -> &dyn Sleeper {
        self.sleeper.as_ref()
    }

    /// Close the current session and open a new one.
    pub async fn connect(&self) -> Result<()> {
        self.sessions.connect().await?;
        self.metrics.inc_reconnects();
        Ok(())
    }

    /// Issue a request through the retry policy stack.
    pub async fn get(&self, request: &RequestDescriptor) -> Result<ApiResponse> {
        self.execute(request, None).await
    }

    /// Issue a request and decode its JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, request: &RequestDescriptor) -> Result<T> {
        self.get(request).await?.json().await
    }

    /// The retry driver. When `stop` is given it is checked before every
    /// attempt and during pauses; cancellation ends the call with
    /// [`Error::Cancelled`].
    pub(crate) async fn execute(&self, request: &RequestDescriptor, stop: Option<&StopToken>) -> Result<ApiResponse> {
        let mut ctx = RetryContext::new();

        loop {
            if stop.is_some_and(StopToken::is_cancelled) {
                info!(attempt = ctx.attempts, "request cancelled");
                return Err(Error::Cancelled);
            }

            let session = self.sessions.current().await;
            ctx.attach(&session);

            let failure = match self.attempt(&session, request).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            let connection_errors = ctx.connection_errors;
            let kind = FailureKind::classify(&failure);
            let (policy, decision) = self.policies.decide(&kind, &mut ctx);
            if ctx.connection_errors > connection_errors {
                self.metrics.inc_connection_errors();
            }

            match decision {
                Decision::Retry { pause, reconnect } => {
                    self.metrics.inc_retries();
                    warn!(
                        policy = policy.unwrap_or("none"),
                        attempt = ctx.attempts,
                        generation = ctx.session_generation(),
                        error = %failure,
                        "retrying request"
                    );
                    if reconnect {
                        self.connect().await?;
                    }
                    if let Some(pause) = pause {
                        if self.sleeper.sleep(pause, stop.unwrap_or(&self.idle)).await {
                            return Err(Error::Cancelled);
                        }
                    }
                }
                Decision::Propagate | Decision::Pass => {
                    error!(
                        policy = policy.unwrap_or("none"),
                        attempt = ctx.attempts,
                        error = %failure,
                        "request failed"
                    );
                    return Err(failure);
                }
            }
        }
    }

    /// One attempt on one session. Non-success statuses become
    /// [`Error::Api`]; non-streaming bodies are read here so that decoding
    /// failures are retried like any other transport failure.
    async fn attempt(&self, session: &Session, request: &RequestDescriptor) -> Result<ApiResponse> {
        self.metrics.inc_requests();
        info!(method = %request.method, url = %request.url, "getting");

        let response = request.build(session.http()).send().await?;
        let status = response.status();
        let url = response.url().to_string();
        self.sessions.record_response(session, &url, status.as_u16()).await;

        if status.is_success() || (status == StatusCode::NOT_FOUND && request.allow_404) {
            if request.stream {
                return Ok(ApiResponse::streaming(response, session));
            }
            let body = response.bytes().await?;
            return Ok(ApiResponse::buffered(status, url, body.to_vec(), session));
        }

        let retry_after = retry_after_from_headers(response.headers(), chrono::Utc::now().timestamp());
        let status_text = status.canonical_reason().unwrap_or("Unknown");
        let body = response.text().await.unwrap_or_default();
        debug!(status = status.as_u16(), body = %body, "unsuccessful response");
        Err(Error::api(status.as_u16(), status_text, body).with_retry_after(retry_after))
    }

    // ===== Streaming Endpoints =====

    /// Sample of all public tweets.
    pub fn sample(&self, stop: StopToken, record_keepalive: bool) -> StreamConsumer<'_> {
        let request = RequestDescriptor::get(self.endpoint("tweets/sample/stream")).params(everything());
        StreamConsumer::new(self, request, stop, record_keepalive)
    }

    /// Tweets matching the active stream rules.
    pub fn stream(&self, stop: StopToken, record_keepalive: bool) -> StreamConsumer<'_> {
        let request = RequestDescriptor::get(self.endpoint("tweets/search/stream")).params(everything());
        StreamConsumer::new(self, request, stop, record_keepalive)
    }

    // ===== Stream Rules =====

    /// List the active stream rules.
    pub async fn get_stream_rules(&self) -> Result<RulesResponse> {
        let request = RequestDescriptor::get(self.endpoint("tweets/search/stream/rules"));
        self.get_json(&request).await
    }

    /// Add stream rules. The raw response is returned so callers can report
    /// per-rule errors.
    pub async fn add_stream_rules(&self, rules: &[StreamRule]) -> Result<Value> {
        let request = RequestDescriptor::post(self.endpoint("tweets/search/stream/rules"), json!({ "add": rules }));
        self.get_json(&request).await
    }

    /// Delete stream rules by id.
    pub async fn delete_stream_rule_ids(&self, ids: &[String]) -> Result<Value> {
        let request = RequestDescriptor::post(
            self.endpoint("tweets/search/stream/rules"),
            json!({ "delete": { "ids": ids } }),
        );
        self.get_json(&request).await
    }

    // ===== Search and Lookup =====

    /// Search tweets, yielding one response page at a time.
    pub fn search<'a>(&'a self, query: &str, options: &SearchOptions) -> impl Stream<Item = Result<Value>> + 'a {
        let base = RequestDescriptor::get(self.endpoint(options.path()))
            .params(options.params(query))
            .params(everything());

        // state: Some(token) while there are pages to fetch
        stream::unfold(Some(None::<String>), move |next| {
            let base = base.clone();
            async move {
                let token = next?;
                let request = match &token {
                    Some(t) => base.param("next_token", t.clone()),
                    None => base,
                };
                match self.get_json::<Value>(&request).await {
                    Ok(page) => {
                        let next = page["meta"]["next_token"].as_str().map(|t| Some(t.to_string()));
                        if next.is_none() {
                            info!("no more search results");
                        }
                        Some((Ok(page), next))
                    }
                    Err(e) => Some((Err(e), None)),
                }
            }
        })
    }

    /// Hydrate tweet ids, in batches of 100.
    pub fn tweet_lookup(&self, ids: Vec<String>) -> impl Stream<Item = Result<Value>> + '_ {
        let request = RequestDescriptor::get(self.endpoint("tweets")).params(everything());
        self.lookup(request, "ids", ids)
    }

    /// Look up users by id or by username, in batches of 100.
    pub fn user_lookup(&self, users: Vec<String>, usernames: bool) -> impl Stream<Item = Result<Value>> + '_ {
        let (path, key) = if usernames {
            ("users/by", "usernames")
        } else {
            ("users", "ids")
        };
        let request = RequestDescriptor::get(self.endpoint(path)).params(user_everything());
        self.lookup(request, key, users)
    }

    fn lookup(&self, base: RequestDescriptor, key: &'static str, values: Vec<String>) -> impl Stream<Item = Result<Value>> + '_ {
        let values: Vec<String> = values
            .into_iter()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        let batches: Vec<String> = values.chunks(LOOKUP_BATCH_SIZE).map(|chunk| chunk.join(",")).collect();

        stream::iter(batches).then(move |batch| {
            let request = base.clone().param(key, batch);
            async move { self.get_json::<Value>(&request).await }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_paths() {
        let client = Client::builder("token").api_url("http://localhost:1234/2/").build().unwrap();
        assert_eq!(client.api_url(), "http://localhost:1234/2");
        assert_eq!(client.endpoint("tweets/sample/stream"), "http://localhost:1234/2/tweets/sample/stream");
        assert_eq!(client.endpoint("/users"), "http://localhost:1234/2/users");
    }

    #[test]
    fn test_builder_thresholds() {
        let client = Client::builder("token")
            .retry_config(RetryConfig {
                not_found_retries: Some(1),
                ..Default::default()
            })
            .connection_errors(3)
            .http_errors(5)
            .build()
            .unwrap();

        assert_eq!(client.http_errors(), 5);
        assert_eq!(client.stream_backoff(), StreamBackoff::default());
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let client = Client::builder("token").api_url("http://127.0.0.1:9/2").build().unwrap();
        let stop = StopToken::new();
        stop.cancel();

        let request = RequestDescriptor::get(client.endpoint("tweets"));
        let err = client.execute(&request, Some(&stop)).await.unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(client.metrics().snapshot().requests_total, 0);
    }

    #[test]
    fn test_default_api_url() {
        let client = Client::new("token").unwrap();
        assert_eq!(client.api_url(), DEFAULT_API_URL);
    }
}
