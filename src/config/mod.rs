//! Configuration management for the twarc2 CLI.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::sdk::api_client::DEFAULT_API_URL;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "twarc2")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Collect raw data from the Twitter v2 API")]
pub struct Args {
    /// Twitter app bearer token
    #[arg(long, env = "BEARER_TOKEN", hide_env_values = true)]
    pub bearer_token: Option<String>,

    /// API root URL
    #[arg(long, default_value = DEFAULT_API_URL, env = "TWARC_API_URL")]
    pub api_url: String,

    /// Maximum connection errors per request (0 = unlimited)
    #[arg(long, default_value = "0", env = "TWARC_CONNECTION_ERRORS")]
    pub connection_errors: u32,

    /// Maximum consecutive stream errors (0 = unlimited)
    #[arg(long, default_value = "0", env = "TWARC_HTTP_ERRORS")]
    pub http_errors: u32,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    pub log: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, env = "TWARC_DEBUG")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Search for tweets
    Search {
        /// Search query
        query: String,
        /// Output file (default: stdout)
        outfile: Option<PathBuf>,
        /// Match tweets sent after tweet id
        #[arg(long)]
        since_id: Option<String>,
        /// Match tweets sent prior to tweet id
        #[arg(long)]
        until_id: Option<String>,
        /// Match tweets created after time, e.g. 2021-01-01T12:31:04
        #[arg(long, value_parser = parse_datetime)]
        start_time: Option<DateTime<Utc>>,
        /// Match tweets sent before time
        #[arg(long, value_parser = parse_datetime)]
        end_time: Option<DateTime<Utc>>,
        /// Search the full archive
        #[arg(long)]
        archive: bool,
        /// Maximum number of tweets to save (0 = unlimited)
        #[arg(long, default_value = "0")]
        limit: usize,
    },
    /// Fetch tweets from the sample stream
    Sample {
        /// Output file (default: stdout)
        outfile: Option<PathBuf>,
        /// Maximum number of tweets to save (0 = unlimited)
        #[arg(long, default_value = "0")]
        limit: usize,
    },
    /// Fetch tweets from the filtered stream
    Stream {
        /// Output file (default: stdout)
        outfile: Option<PathBuf>,
        /// Maximum number of tweets to save (0 = unlimited)
        #[arg(long, default_value = "0")]
        limit: usize,
    },
    /// Hydrate tweet ids from a file or stdin
    Hydrate {
        /// File with one tweet id per line (default: stdin)
        infile: Option<PathBuf>,
        /// Output file (default: stdout)
        outfile: Option<PathBuf>,
    },
    /// Get data for user ids or usernames
    Users {
        /// File with one user id (or username) per line (default: stdin)
        infile: Option<PathBuf>,
        /// Output file (default: stdout)
        outfile: Option<PathBuf>,
        /// Input contains usernames instead of ids
        #[arg(long)]
        usernames: bool,
    },
    /// List, add and delete rules for the filtered stream
    #[command(subcommand)]
    StreamRules(RulesCommand),
}

/// Stream rule subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum RulesCommand {
    /// List all the active stream rules
    List,
    /// Add a rule
    Add {
        value: String,
        /// A tag to help identify the rule
        #[arg(long)]
        tag: Option<String>,
    },
    /// Delete the rule matching a value
    Delete { value: String },
    /// Delete all rules
    DeleteAll,
}

/// Accept `YYYY-MM-DD`, `YYYY-MM-DDTHH:MM:SS` or full RFC 3339.
pub fn parse_datetime(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Ok(t.with_timezone(&Utc));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Ok(t.and_utc());
    }
    if let Ok(d) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(t) = d.and_hms_opt(0, 0, 0) {
            return Ok(t.and_utc());
        }
    }
    Err(format!("invalid date/time: {value}"))
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Bearer token, if given on the command line or environment
    #[serde(skip_serializing)]
    pub bearer_token: Option<String>,
    /// API root URL
    pub api_url: String,
    /// Maximum connection errors (0 = unlimited)
    pub connection_errors: u32,
    /// Maximum consecutive stream errors (0 = unlimited)
    pub http_errors: u32,
    /// Debug mode
    pub debug: bool,
    /// Log file
    pub log: Option<PathBuf>,
}

impl From<&Args> for Config {
    fn from(args: &Args) -> Self {
        Self {
            bearer_token: args.bearer_token.clone(),
            api_url: args.api_url.clone(),
            connection_errors: args.connection_errors,
            http_errors: args.http_errors,
            debug: args.debug,
            log: args.log.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bearer_token: None,
            api_url: DEFAULT_API_URL.to_string(),
            connection_errors: 0,
            http_errors: 0,
            debug: false,
            log: None,
        }
    }
}
