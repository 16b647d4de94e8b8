//! twarc2 - Rust Implementation
//!
//! A resilient client for the Twitter v2 API and its line-delimited
//! streaming endpoints, plus the `twarc2` command line tool built on it.
//!
//! # Architecture
//!
//! 1. **SDK Layer** (`sdk`) - sessions, retry policy stack, stream consumer, endpoints
//! 2. **Commands** (`commands`) - CLI subcommands writing JSON lines
//! 3. **Support** (`config`, `error`, `metrics`) - arguments, error type, counters
//!
//! # Features
//!
//! - **Retry Policies**: rate limits, server errors, transient transport
//!   failures, 404s and connection errors each handled by a named policy
//! - **Streaming**: automatic reconnects with linear backoff and cooperative stop
//! - **Sessions**: reconnecting swaps the HTTP session and aborts stale responses

pub mod commands;
pub mod config;
pub mod error;
pub mod metrics;
pub mod sdk;

pub use error::{Error, Result};

/// Client version, sent in the User-Agent header.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
