//! Request descriptors.

use reqwest::{Client, Method, RequestBuilder};
use serde_json::Value;

/// Everything needed to (re)issue one logical request.
///
/// Descriptors are cheap to clone and are replayed verbatim by the retry
/// driver, so they never hold a live connection.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: Method,
    pub url: String,
    pub params: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Treat a 404 as a normal response instead of retrying.
    pub allow_404: bool,
    /// Leave the body unread so it can be consumed line by line.
    pub stream: bool,
}

impl RequestDescriptor {
    /// A GET request for `url`.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            params: Vec::new(),
            body: None,
            allow_404: false,
            stream: false,
        }
    }

    /// A POST request for `url` carrying a JSON body.
    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::get(url)
        }
    }

    /// Add one query parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Add several query parameters.
    pub fn params<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn allow_404(mut self, allow: bool) -> Self {
        self.allow_404 = allow;
        self
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    /// Build a request on the given session client.
    pub(crate) fn build(&self, client: &Client) -> RequestBuilder {
        let mut builder = client.request(self.method.clone(), &self.url);
        if !self.params.is_empty() {
            builder = builder.query(&self.params);
        }
        if let Some(body) = &self.body {
            builder = builder.json(body);
        }
        builder
    }
}
