//! Layered retry policies for single-shot requests.
//!
//! Each policy owns exactly one failure class and maps it to a [`Decision`].
//! A [`PolicyStack`] holds them in a fixed order, outermost first:
//!
//! 1. rate limit (429)
//! 2. server errors (5xx)
//! 3. connection reset
//! 4. read timeout
//! 5. content decoding
//! 6. not found (404 when not allowed)
//! 7. any other connection error
//!
//! Policies 3 to 7 share one connection error budget per call.
//!
//! The driver asks each policy in turn; the first one that does not
//! [`Decision::Pass`] decides. A failure nobody claims is propagated.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::collections::HashMap;
use std::fmt::Debug;
use std::time::Duration;
use tracing::{error, warn};

use crate::error::{Error, TransportKind};
use crate::sdk::session::Session;

/// Extra slack added to an `x-rate-limit-reset` deadline.
const RATE_LIMIT_RESET_SLACK_SECS: i64 = 10;

/// Tunables for the standard policy stack.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum connection errors per call (0 = unlimited)
    pub connection_errors: u32,
    /// Pause on 429 when the server gives no hint
    pub rate_limit_pause: Duration,
    /// Pause per consecutive 5xx (multiplied by the count)
    pub server_error_step: Duration,
    /// Consecutive 5xx tolerated before giving up
    pub server_error_retries: u32,
    /// Pause before reconnecting after a transport failure
    pub reconnect_pause: Duration,
    /// Pause before retrying a 404
    pub not_found_pause: Duration,
    /// Cap on 404 retries (None = unlimited)
    pub not_found_retries: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            connection_errors: 0,
            rate_limit_pause: Duration::from_secs(60),
            server_error_step: Duration::from_secs(60),
            server_error_retries: 30,
            reconnect_pause: Duration::from_secs(1),
            not_found_pause: Duration::from_secs(1),
            not_found_retries: None,
        }
    }
}

impl RetryConfig {
    /// Create a config with the given connection error budget.
    pub fn with_connection_errors(max: u32) -> Self {
        Self {
            connection_errors: max,
            ..Default::default()
        }
    }
}

/// Work out how long the server wants us to wait, from `Retry-After`
/// (seconds) or `x-rate-limit-reset` (epoch seconds).
pub fn retry_after_from_headers(headers: &HeaderMap, now_epoch_secs: i64) -> Option<Duration> {
    if let Some(secs) = header_number(headers, RETRY_AFTER.as_str()) {
        return Some(Duration::from_secs(secs.max(0) as u64));
    }

    let reset = header_number(headers, "x-rate-limit-reset")?;
    let secs = reset - now_epoch_secs + RATE_LIMIT_RESET_SLACK_SECS;
    let secs = if secs < 1 { RATE_LIMIT_RESET_SLACK_SECS } else { secs };
    Some(Duration::from_secs(secs as u64))
}

fn header_number(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// Failure classes the policies can claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    RateLimited { retry_after: Option<Duration> },
    ServerError(u16),
    NotFound,
    /// Any other non-success status.
    Status(u16),
    Transport(TransportKind),
    Other,
}

impl FailureKind {
    pub fn classify(error: &Error) -> Self {
        if let Error::Api {
            status,
            retry_after,
            ..
        } = error
        {
            return match *status {
                429 => Self::RateLimited {
                    retry_after: *retry_after,
                },
                404 => Self::NotFound,
                s if (500..600).contains(&s) => Self::ServerError(s),
                s => Self::Status(s),
            };
        }

        match error.transport_kind() {
            Some(kind) => Self::Transport(kind),
            None => Self::Other,
        }
    }
}

/// What the driver should do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Not this policy's failure class.
    Pass,
    /// Issue the same request again.
    Retry { pause: Option<Duration>, reconnect: bool },
    /// Give up and hand the original error to the caller.
    Propagate,
}

/// Per-call retry bookkeeping.
///
/// Created fresh for every externally initiated call and carried only across
/// the internal retries of that call.
#[derive(Debug, Default)]
pub struct RetryContext {
    pub attempts: u32,
    pub connection_errors: u32,
    pub server_errors: u32,
    pub not_found_retries: u32,
    transient: HashMap<&'static str, u32>,
    session_generation: u64,
}

impl RetryContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note the session the next attempt runs on.
    pub fn attach(&mut self, session: &Session) {
        self.attempts += 1;
        self.session_generation = session.generation();
    }

    pub fn session_generation(&self) -> u64 {
        self.session_generation
    }

    pub fn transient_retries(&self, policy: &str) -> u32 {
        self.transient.get(policy).copied().unwrap_or(0)
    }

    fn bump_transient(&mut self, policy: &'static str) -> u32 {
        let count = self.transient.entry(policy).or_insert(0);
        *count += 1;
        *count
    }
}

/// One retry rule for one failure class.
pub trait RetryPolicy: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// Inspect a failure and decide. Policies only touch their own counters.
    fn decide(&self, failure: &FailureKind, ctx: &mut RetryContext) -> Decision;
}

/// Waits out 429 responses, honouring the server's hint. Unbounded.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub default_pause: Duration,
}

impl RetryPolicy for RateLimitPolicy {
    fn name(&self) -> &'static str {
        "rate-limit"
    }

    fn decide(&self, failure: &FailureKind, _ctx: &mut RetryContext) -> Decision {
        let FailureKind::RateLimited { retry_after } = failure else {
            return Decision::Pass;
        };
        let pause = retry_after.unwrap_or(self.default_pause);
        warn!(seconds = pause.as_secs_f64(), "rate limit exceeded: sleeping");
        Decision::Retry {
            pause: Some(pause),
            reconnect: false,
        }
    }
}

/// Backs off linearly on 5xx responses and gives up after `max_errors`.
#[derive(Debug, Clone)]
pub struct ServerErrorPolicy {
    pub step: Duration,
    pub max_errors: u32,
}

impl RetryPolicy for ServerErrorPolicy {
    fn name(&self) -> &'static str {
        "server-error"
    }

    fn decide(&self, failure: &FailureKind, ctx: &mut RetryContext) -> Decision {
        let FailureKind::ServerError(status) = failure else {
            return Decision::Pass;
        };
        ctx.server_errors += 1;
        if ctx.server_errors > self.max_errors {
            warn!(status, errors = ctx.server_errors, "too many server errors, giving up");
            return Decision::Propagate;
        }
        let pause = self.step * ctx.server_errors;
        warn!(status, seconds = pause.as_secs_f64(), "server error: sleeping");
        Decision::Retry {
            pause: Some(pause),
            reconnect: false,
        }
    }
}

/// Reconnects and retries one transport failure class. Every failure counts
/// against the shared connection error budget (0 = unlimited).
#[derive(Debug, Clone)]
pub struct TransientPolicy {
    name: &'static str,
    kind: TransportKind,
    max_errors: u32,
    pause: Duration,
}

impl TransientPolicy {
    pub fn connection_reset(max_errors: u32, pause: Duration) -> Self {
        Self {
            name: "connection-reset",
            kind: TransportKind::ConnectionReset,
            max_errors,
            pause,
        }
    }

    pub fn timeout(max_errors: u32, pause: Duration) -> Self {
        Self {
            name: "timeout",
            kind: TransportKind::Timeout,
            max_errors,
            pause,
        }
    }

    pub fn decode(max_errors: u32, pause: Duration) -> Self {
        Self {
            name: "decode",
            kind: TransportKind::Decode,
            max_errors,
            pause,
        }
    }
}

impl RetryPolicy for TransientPolicy {
    fn name(&self) -> &'static str {
        self.name
    }

    fn decide(&self, failure: &FailureKind, ctx: &mut RetryContext) -> Decision {
        if *failure != FailureKind::Transport(self.kind) {
            return Decision::Pass;
        }
        ctx.connection_errors += 1;
        let count = ctx.bump_transient(self.name);
        warn!(
            policy = self.name,
            retry = count,
            attempt = ctx.connection_errors,
            "caught transient transport error"
        );
        if self.max_errors != 0 && ctx.connection_errors >= self.max_errors {
            error!("received too many connection errors");
            return Decision::Propagate;
        }
        Decision::Retry {
            pause: Some(self.pause),
            reconnect: true,
        }
    }
}

/// Retries a 404 after a short pause. Never touches the error counters.
#[derive(Debug, Clone)]
pub struct NotFoundPolicy {
    pub pause: Duration,
    pub max_retries: Option<u32>,
}

impl RetryPolicy for NotFoundPolicy {
    fn name(&self) -> &'static str {
        "not-found"
    }

    fn decide(&self, failure: &FailureKind, ctx: &mut RetryContext) -> Decision {
        if *failure != FailureKind::NotFound {
            return Decision::Pass;
        }
        if let Some(max) = self.max_retries {
            if ctx.not_found_retries >= max {
                warn!(retries = ctx.not_found_retries, "404 persisted, giving up");
                return Decision::Propagate;
            }
        }
        ctx.not_found_retries += 1;
        warn!("404 from API, trying again");
        Decision::Retry {
            pause: Some(self.pause),
            reconnect: false,
        }
    }
}

/// Counts connection level failures, reconnecting until the budget is spent.
#[derive(Debug, Clone)]
pub struct ConnectionErrorPolicy {
    /// 0 = unlimited
    pub max_errors: u32,
    pub pause: Duration,
}

impl RetryPolicy for ConnectionErrorPolicy {
    fn name(&self) -> &'static str {
        "connection-errors"
    }

    fn decide(&self, failure: &FailureKind, ctx: &mut RetryContext) -> Decision {
        let FailureKind::Transport(kind) = failure else {
            return Decision::Pass;
        };
        ctx.connection_errors += 1;
        error!(?kind, attempt = ctx.connection_errors, "caught connection error");
        if self.max_errors != 0 && ctx.connection_errors >= self.max_errors {
            error!("received too many connection errors");
            return Decision::Propagate;
        }
        Decision::Retry {
            pause: Some(self.pause),
            reconnect: true,
        }
    }
}

/// Ordered list of policies, outermost first.
#[derive(Debug)]
pub struct PolicyStack {
    policies: Vec<Box<dyn RetryPolicy>>,
}

impl PolicyStack {
    pub fn new(policies: Vec<Box<dyn RetryPolicy>>) -> Self {
        Self { policies }
    }

    /// The standard stack.
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(vec![
            Box::new(RateLimitPolicy {
                default_pause: config.rate_limit_pause,
            }),
            Box::new(ServerErrorPolicy {
                step: config.server_error_step,
                max_errors: config.server_error_retries,
            }),
            Box::new(TransientPolicy::connection_reset(config.connection_errors, config.reconnect_pause)),
            Box::new(TransientPolicy::timeout(config.connection_errors, config.reconnect_pause)),
            Box::new(TransientPolicy::decode(config.connection_errors, config.reconnect_pause)),
            Box::new(NotFoundPolicy {
                pause: config.not_found_pause,
                max_retries: config.not_found_retries,
            }),
            Box::new(ConnectionErrorPolicy {
                max_errors: config.connection_errors,
                pause: config.reconnect_pause,
            }),
        ])
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.policies.iter().map(|p| p.name()).collect()
    }

    /// Ask each policy in order. Returns the deciding policy's name, or
    /// `None` with [`Decision::Propagate`] when nobody claims the failure.
    pub fn decide(&self, failure: &FailureKind, ctx: &mut RetryContext) -> (Option<&'static str>, Decision) {
        for policy in &self.policies {
            match policy.decide(failure, ctx) {
                Decision::Pass => continue,
                decision => return (Some(policy.name()), decision),
            }
        }
        (None, Decision::Propagate)
    }
}

impl Default for PolicyStack {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn stack(connection_errors: u32) -> PolicyStack {
        PolicyStack::from_config(&RetryConfig::with_connection_errors(connection_errors))
    }

    fn transport(kind: TransportKind) -> FailureKind {
        FailureKind::Transport(kind)
    }

    #[test]
    fn test_stack_order() {
        assert_eq!(
            PolicyStack::default().names(),
            vec![
                "rate-limit",
                "server-error",
                "connection-reset",
                "timeout",
                "decode",
                "not-found",
                "connection-errors",
            ]
        );
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            FailureKind::classify(&Error::api(429, "Too Many Requests", "")),
            FailureKind::RateLimited { retry_after: None }
        );
        assert_eq!(
            FailureKind::classify(&Error::api(404, "Not Found", "")),
            FailureKind::NotFound
        );
        assert_eq!(
            FailureKind::classify(&Error::api(503, "Service Unavailable", "")),
            FailureKind::ServerError(503)
        );
        assert_eq!(
            FailureKind::classify(&Error::api(420, "Enhance Your Calm", "")),
            FailureKind::Status(420)
        );
        assert_eq!(FailureKind::classify(&Error::SessionClosed(2)), transport(TransportKind::ConnectionReset));
        assert_eq!(FailureKind::classify(&Error::Cancelled), FailureKind::Other);
    }

    #[test]
    fn test_nth_connection_error_propagates() {
        for n in 1..=5 {
            let stack = stack(n);
            let mut ctx = RetryContext::new();
            let failure = transport(TransportKind::Connection);

            for i in 1..n {
                let (name, decision) = stack.decide(&failure, &mut ctx);
                assert_eq!(name, Some("connection-errors"));
                assert_eq!(
                    decision,
                    Decision::Retry {
                        pause: Some(Duration::from_secs(1)),
                        reconnect: true
                    },
                    "error {} of {} should retry",
                    i,
                    n
                );
            }
            let (_, decision) = stack.decide(&failure, &mut ctx);
            assert_eq!(decision, Decision::Propagate, "error {} should be fatal", n);
            assert_eq!(ctx.connection_errors, n);
        }
    }

    #[test]
    fn test_unlimited_connection_errors() {
        let stack = stack(0);
        let mut ctx = RetryContext::new();
        for _ in 0..100 {
            let (_, decision) = stack.decide(&transport(TransportKind::Connection), &mut ctx);
            assert!(matches!(decision, Decision::Retry { reconnect: true, .. }));
        }
    }

    #[test]
    fn test_not_found_never_counts() {
        let stack = stack(1);
        let mut ctx = RetryContext::new();

        let (name, decision) = stack.decide(&FailureKind::NotFound, &mut ctx);

        assert_eq!(name, Some("not-found"));
        assert_eq!(
            decision,
            Decision::Retry {
                pause: Some(Duration::from_secs(1)),
                reconnect: false
            }
        );
        assert_eq!(ctx.connection_errors, 0);
        assert_eq!(ctx.server_errors, 0);
        assert_eq!(ctx.not_found_retries, 1);
    }

    #[test]
    fn test_not_found_cap() {
        let stack = PolicyStack::from_config(&RetryConfig {
            not_found_retries: Some(2),
            ..Default::default()
        });
        let mut ctx = RetryContext::new();

        assert!(matches!(stack.decide(&FailureKind::NotFound, &mut ctx).1, Decision::Retry { .. }));
        assert!(matches!(stack.decide(&FailureKind::NotFound, &mut ctx).1, Decision::Retry { .. }));
        assert_eq!(stack.decide(&FailureKind::NotFound, &mut ctx).1, Decision::Propagate);
    }

    #[test]
    fn test_rate_limit_uses_hint_and_is_not_counted() {
        let stack = stack(1);
        let mut ctx = RetryContext::new();

        let hinted = FailureKind::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(
            stack.decide(&hinted, &mut ctx).1,
            Decision::Retry {
                pause: Some(Duration::from_secs(7)),
                reconnect: false
            }
        );

        let bare = FailureKind::RateLimited { retry_after: None };
        assert_eq!(
            stack.decide(&bare, &mut ctx).1,
            Decision::Retry {
                pause: Some(Duration::from_secs(60)),
                reconnect: false
            }
        );
        assert_eq!(ctx.connection_errors, 0);
    }

    #[test]
    fn test_server_errors_back_off_linearly_then_give_up() {
        let stack = PolicyStack::from_config(&RetryConfig {
            server_error_retries: 3,
            ..Default::default()
        });
        let mut ctx = RetryContext::new();
        let failure = FailureKind::ServerError(503);

        for n in 1..=3u32 {
            assert_eq!(
                stack.decide(&failure, &mut ctx).1,
                Decision::Retry {
                    pause: Some(Duration::from_secs(60 * u64::from(n))),
                    reconnect: false
                }
            );
        }
        assert_eq!(stack.decide(&failure, &mut ctx).1, Decision::Propagate);
    }

    #[test]
    fn test_transient_failures_share_connection_budget() {
        for kind in [TransportKind::ConnectionReset, TransportKind::Timeout, TransportKind::Decode] {
            let stack = stack(1);
            let mut ctx = RetryContext::new();

            let (name, decision) = stack.decide(&transport(kind), &mut ctx);
            assert_ne!(name, Some("connection-errors"));
            assert_eq!(decision, Decision::Propagate, "{:?} should be fatal at a budget of 1", kind);
            assert_eq!(ctx.connection_errors, 1);
        }
    }

    #[test]
    fn test_mixed_transport_failures_raise_on_nth() {
        let stack = stack(3);
        let mut ctx = RetryContext::new();

        let (name, decision) = stack.decide(&transport(TransportKind::ConnectionReset), &mut ctx);
        assert_eq!(name, Some("connection-reset"));
        assert_eq!(
            decision,
            Decision::Retry {
                pause: Some(Duration::from_secs(1)),
                reconnect: true
            }
        );

        let (name, decision) = stack.decide(&transport(TransportKind::Timeout), &mut ctx);
        assert_eq!(name, Some("timeout"));
        assert!(matches!(decision, Decision::Retry { reconnect: true, .. }));

        let (name, decision) = stack.decide(&transport(TransportKind::Connection), &mut ctx);
        assert_eq!(name, Some("connection-errors"));
        assert_eq!(decision, Decision::Propagate);

        assert_eq!(ctx.connection_errors, 3);
        assert_eq!(ctx.transient_retries("connection-reset"), 1);
        assert_eq!(ctx.transient_retries("timeout"), 1);
        assert_eq!(ctx.transient_retries("decode"), 0);
    }

    #[test]
    fn test_unclaimed_failures_propagate() {
        let stack = stack(0);
        let mut ctx = RetryContext::new();
        assert_eq!(stack.decide(&FailureKind::Status(401), &mut ctx), (None, Decision::Propagate));
        assert_eq!(stack.decide(&FailureKind::Other, &mut ctx), (None, Decision::Propagate));
    }

    #[test]
    fn test_retry_after_header() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("30"));
        assert_eq!(retry_after_from_headers(&headers, 0), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_rate_limit_reset_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-rate-limit-reset", HeaderValue::from_static("1000"));

        // reset in 50s, plus slack
        assert_eq!(retry_after_from_headers(&headers, 950), Some(Duration::from_secs(60)));
        // reset already passed
        assert_eq!(retry_after_from_headers(&headers, 2000), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_no_rate_limit_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after_from_headers(&headers, 0), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(retry_after_from_headers(&headers, 0), None);
    }
}
