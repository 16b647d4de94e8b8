//! Bearer token resolution.
//!
//! The token is resolved in order:
//! 1. Explicit option
//! 2. Environment variable (BEARER_TOKEN)
//! 3. Config file (`<config dir>/twarc/config`)

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::error::{Error, Result};

/// Environment variable holding the bearer token.
pub const BEARER_TOKEN_ENV: &str = "BEARER_TOKEN";

/// Get the path to the config file.
pub fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("twarc").join("config"))
}

/// Parse `key = value` lines. Values may be single or double quoted;
/// `#` starts a comment line.
pub fn parse_config(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), unquote(value.trim()).to_string()))
        .collect()
}

fn unquote(value: &str) -> &str {
    for quote in ['\'', '"'] {
        if let Some(inner) = value.strip_prefix(quote).and_then(|v| v.strip_suffix(quote)) {
            return inner;
        }
    }
    value
}

/// Read the bearer token from a config file, if present.
async fn read_config_token(path: &Path) -> Option<String> {
    let content = fs::read_to_string(path).await.ok()?;
    debug!(path = %path.display(), "read config file");
    parse_config(&content)
        .remove("bearer_token")
        .filter(|t| !t.is_empty())
}

/// Resolve the bearer token from options, environment, or config file.
///
/// # Errors
///
/// Returns an error if no source provides a token.
pub async fn resolve_bearer_token(explicit: Option<&str>) -> Result<String> {
    let env = std::env::var(BEARER_TOKEN_ENV).ok();
    resolve_from(explicit, env.as_deref(), config_file_path().as_deref()).await
}

/// Resolution with every source passed in.
pub async fn resolve_from(explicit: Option<&str>, env: Option<&str>, config: Option<&Path>) -> Result<String> {
    if let Some(token) = explicit.or(env).filter(|t| !t.is_empty()) {
        return Ok(token.to_string());
    }

    if let Some(path) = config {
        if let Some(token) = read_config_token(path).await {
            return Ok(token);
        }
    }

    Err(Error::CredentialsNotFound(
        "bearer token is required. Provide it via:\n\
         1. --bearer-token option\n\
         2. BEARER_TOKEN environment variable\n\
         3. bearer_token = '...' in the twarc config file\n\
         Create a project and app at https://developer.twitter.com/en/portal/ to get one."
            .to_string(),
    ))
}
