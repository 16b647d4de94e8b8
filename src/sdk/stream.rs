//! Self-healing consumer for line-delimited streaming endpoints.
//!
//! The consumer is a small state machine:
//!
//! ```text
//! CONNECTING --ok--> STREAMING --line--> (yield) STREAMING
//!     |                  |  \--end of body, short pause--> CONNECTING
//!     |                  '--failure--> BACKOFF
//!     '--failure------------------------> BACKOFF --waited--> CONNECTING
//! any state --stop token / error budget spent--> STOPPED
//! ```
//!
//! Opening the stream goes through the client's retry policy stack; failures
//! after that are handled here by reconnecting the whole stream.

use futures::stream::{self, Stream};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::sdk::api_client::Client;
use crate::sdk::cancel::StopToken;
use crate::sdk::request::RequestDescriptor;
use crate::sdk::session::ApiResponse;

/// One element produced by a stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    /// One parsed JSON object.
    Record(Map<String, Value>),
    /// An empty line the server sent to hold the connection open.
    KeepAlive,
}

impl StreamItem {
    pub fn as_record(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Record(record) => Some(record),
            Self::KeepAlive => None,
        }
    }
}

/// Reconnect backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamBackoff {
    /// Wait per consecutive error when the server signalled rate limiting.
    pub rate_limit_step: Duration,
    /// Wait per consecutive error for any other failure.
    pub error_step: Duration,
    /// Wait before reopening a stream whose body ended cleanly.
    pub reconnect_pause: Duration,
}

impl Default for StreamBackoff {
    fn default() -> Self {
        Self {
            rate_limit_step: Duration::from_secs(60),
            error_step: Duration::from_secs(5),
            reconnect_pause: Duration::from_secs(1),
        }
    }
}

impl StreamBackoff {
    /// Wait before the next reconnect after `errors` consecutive failures.
    pub fn delay(&self, error: &Error, errors: u32) -> Duration {
        let step = if error.is_rate_limited() {
            self.rate_limit_step
        } else {
            self.error_step
        };
        step * errors
    }
}

/// Per-stream counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamState {
    /// Failures since the last delivered record.
    pub errors: u32,
    /// The most recent backoff wait.
    pub backoff: Duration,
}

impl StreamState {
    fn reset(&mut self) {
        self.errors = 0;
        self.backoff = Duration::ZERO;
    }
}

enum Phase {
    Connecting,
    Streaming(ApiResponse),
    Backoff(Error),
    Stopped,
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Streaming(_) => "streaming",
            Self::Backoff(_) => "backoff",
            Self::Stopped => "stopped",
        }
    }
}

/// Lazily yields records from a streaming endpoint, reconnecting forever
/// unless stopped or out of error budget.
pub struct StreamConsumer<'a> {
    client: &'a Client,
    request: RequestDescriptor,
    stop: StopToken,
    record_keepalive: bool,
    max_errors: u32,
    backoff: StreamBackoff,
    state: StreamState,
    phase: Phase,
}

impl<'a> StreamConsumer<'a> {
    pub(crate) fn new(client: &'a Client, request: RequestDescriptor, stop: StopToken, record_keepalive: bool) -> Self {
        Self {
            client,
            request: request.streaming(),
            stop,
            record_keepalive,
            max_errors: client.http_errors(),
            backoff: client.stream_backoff(),
            state: StreamState::default(),
            phase: Phase::Connecting,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Current state machine phase, for logging and tests.
    pub fn phase(&self) -> &'static str {
        self.phase.name()
    }

    /// Produce the next item.
    ///
    /// `None` means the stream has stopped cleanly (cancelled). An `Err` is
    /// terminal: the error budget was spent or a line was not valid JSON.
    pub async fn next_item(&mut self) -> Option<Result<StreamItem>> {
        loop {
            match std::mem::replace(&mut self.phase, Phase::Stopped) {
                Phase::Stopped => return None,

                Phase::Connecting => {
                    if self.stop.is_cancelled() {
                        info!("stopping stream");
                        return None;
                    }
                    info!(url = %self.request.url, "connecting to stream");
                    match self.client.execute(&self.request, Some(&self.stop)).await {
                        Ok(response) => self.phase = Phase::Streaming(response),
                        Err(Error::Cancelled) => {
                            info!("stopping stream");
                            return None;
                        }
                        Err(e) => self.phase = Phase::Backoff(e),
                    }
                }

                Phase::Streaming(mut response) => {
                    if self.stop.is_cancelled() {
                        info!("stopping stream");
                        response.close();
                        return None;
                    }

                    let line = match response.next_line().await {
                        Ok(Some(line)) => line,
                        Ok(None) => {
                            info!("stream ended, reconnecting");
                            if self.client.sleeper().sleep(self.backoff.reconnect_pause, &self.stop).await {
                                info!("stopping stream");
                                return None;
                            }
                            self.phase = Phase::Connecting;
                            continue;
                        }
                        Err(e @ Error::InvalidUtf8 { .. }) => {
                            error!(error = %e, "undecodable stream line");
                            response.close();
                            return Some(Err(e));
                        }
                        Err(e) => {
                            self.phase = Phase::Backoff(e);
                            continue;
                        }
                    };

                    if self.stop.is_cancelled() {
                        info!("stopping stream");
                        response.close();
                        return None;
                    }

                    if line.trim().is_empty() {
                        info!("keep-alive");
                        self.client.metrics().inc_keepalives();
                        self.phase = Phase::Streaming(response);
                        if self.record_keepalive {
                            return Some(Ok(StreamItem::KeepAlive));
                        }
                        continue;
                    }

                    match serde_json::from_str::<Map<String, Value>>(&line) {
                        Ok(record) => {
                            self.state.reset();
                            self.client.metrics().inc_records();
                            self.phase = Phase::Streaming(response);
                            return Some(Ok(StreamItem::Record(record)));
                        }
                        Err(source) => {
                            error!(error = %source, "unparseable stream line");
                            response.close();
                            return Some(Err(Error::Parse { line, source }));
                        }
                    }
                }

                Phase::Backoff(failure) => {
                    self.state.errors += 1;
                    self.client.metrics().inc_stream_errors();
                    error!(error = %failure, errors = self.state.errors, "caught stream error");

                    if self.max_errors != 0 && self.state.errors >= self.max_errors {
                        warn!(errors = self.state.errors, "too many stream errors");
                        return Some(Err(failure));
                    }

                    let wait = self.backoff.delay(&failure, self.state.errors);
                    self.state.backoff = wait;
                    info!(seconds = wait.as_secs_f64(), "backing off before reconnect");

                    if self.client.sleeper().sleep(wait, &self.stop).await {
                        info!("stopping stream");
                        return None;
                    }
                    self.phase = Phase::Connecting;
                }
            }
        }
    }

    /// Adapt into a [`Stream`].
    pub fn into_stream(self) -> impl Stream<Item = Result<StreamItem>> + 'a {
        stream::unfold(self, |mut consumer| async move {
            let item = consumer.next_item().await?;
            Some((item, consumer))
        })
    }
}
