//! Twitter v2 API client.
//!
//! # Architecture
//!
//! - `api_client` - Client, retry driver and endpoints
//! - `cancel` - Stop token and interruptible waits
//! - `credentials` - Bearer token resolution
//! - `request` - Replayable request descriptors
//! - `retry` - Retry policies and the policy stack
//! - `session` - Session manager and response bodies
//! - `stream` - Reconnecting stream consumer
//! - `types` - SDK-specific types

pub mod api_client;
pub mod cancel;
pub mod credentials;
pub mod request;
pub mod retry;
pub mod session;
pub mod stream;
pub mod types;

pub use api_client::{Client, ClientBuilder, DEFAULT_API_URL};
pub use cancel::{interruptible_sleep, PollingSleeper, Sleeper, StopToken};
pub use credentials::resolve_bearer_token;
pub use request::RequestDescriptor;
pub use retry::{PolicyStack, RetryConfig, RetryPolicy};
pub use session::{ApiResponse, SessionManager, SessionTimeouts};
pub use stream::{StreamBackoff, StreamConsumer, StreamItem, StreamState};
pub use types::*;
