//! SDK-specific types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Expansions requested with every tweet payload.
pub const TWEET_EXPANSIONS: &str = "author_id,in_reply_to_user_id,referenced_tweets.id,\
referenced_tweets.id.author_id,entities.mentions.username,attachments.poll_ids,\
attachments.media_keys,geo.place_id";

pub const TWEET_FIELDS: &str = "attachments,author_id,context_annotations,conversation_id,\
created_at,entities,geo,id,in_reply_to_user_id,lang,public_metrics,text,possibly_sensitive,\
referenced_tweets,reply_settings,source,withheld";

pub const USER_FIELDS: &str = "created_at,description,entities,id,location,name,\
pinned_tweet_id,profile_image_url,protected,public_metrics,url,username,verified,withheld";

pub const MEDIA_FIELDS: &str = "duration_ms,height,media_key,preview_image_url,type,url,width,public_metrics";

pub const POLL_FIELDS: &str = "duration_minutes,end_datetime,id,options,voting_status";

pub const PLACE_FIELDS: &str = "contained_within,country,country_code,full_name,geo,id,name,place_type";

/// Every expansion and field, for tweet endpoints.
pub fn everything() -> Vec<(&'static str, &'static str)> {
    vec![
        ("expansions", TWEET_EXPANSIONS),
        ("tweet.fields", TWEET_FIELDS),
        ("user.fields", USER_FIELDS),
        ("media.fields", MEDIA_FIELDS),
        ("poll.fields", POLL_FIELDS),
        ("place.fields", PLACE_FIELDS),
    ]
}

/// Expansions and fields for user endpoints.
pub fn user_everything() -> Vec<(&'static str, &'static str)> {
    vec![
        ("expansions", "pinned_tweet_id"),
        ("tweet.fields", TWEET_FIELDS),
        ("user.fields", USER_FIELDS),
    ]
}

/// A filtered stream rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRule {
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl StreamRule {
    pub fn new(value: impl Into<String>, tag: Option<String>) -> Self {
        Self {
            value: value.into(),
            tag,
        }
    }
}

/// A rule as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveRule {
    pub id: String,
    pub value: String,
    #[serde(default)]
    pub tag: Option<String>,
}

/// Response of the rule listing endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesResponse {
    #[serde(default)]
    pub data: Vec<ActiveRule>,
    #[serde(default)]
    pub errors: Option<serde_json::Value>,
}

/// Options for search.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub since_id: Option<String>,
    pub until_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Search the full archive instead of the last week.
    pub archive: bool,
}

impl SearchOptions {
    /// Endpoint path relative to the API root.
    pub fn path(&self) -> &'static str {
        if self.archive {
            "tweets/search/all"
        } else {
            "tweets/search/recent"
        }
    }

    /// Page size: the archive endpoint allows larger pages.
    pub fn max_results(&self) -> u32 {
        if self.archive {
            500
        } else {
            100
        }
    }

    /// Query parameters for a search, excluding pagination.
    pub fn params(&self, query: &str) -> Vec<(String, String)> {
        let mut params = vec![
            ("query".to_string(), query.to_string()),
            ("max_results".to_string(), self.max_results().to_string()),
        ];
        if let Some(id) = &self.since_id {
            params.push(("since_id".to_string(), id.clone()));
        }
        if let Some(id) = &self.until_id {
            params.push(("until_id".to_string(), id.clone()));
        }
        if let Some(t) = &self.start_time {
            params.push(("start_time".to_string(), format_time(t)));
        }
        if let Some(t) = &self.end_time {
            params.push(("end_time".to_string(), format_time(t)));
        }
        params
    }
}

fn format_time(t: &DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
