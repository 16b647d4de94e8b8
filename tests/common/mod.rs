//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::{Request, Respond, ResponseTemplate};

use twarc2::sdk::{Client, ClientBuilder, Sleeper, StopToken};

/// Returns the templates in order, repeating the last one forever.
pub struct Scripted {
    responses: Vec<ResponseTemplate>,
    calls: AtomicUsize,
}

impl Scripted {
    pub fn new(responses: Vec<ResponseTemplate>) -> Self {
        assert!(!responses.is_empty());
        Self {
            responses,
            calls: AtomicUsize::new(0),
        }
    }
}

impl Respond for Scripted {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses[n.min(self.responses.len() - 1)].clone()
    }
}

/// Records every requested wait and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    waits: Mutex<Vec<Duration>>,
    /// Cancel the stop token on this (1-based) call.
    cancel_on: Option<usize>,
}

impl RecordingSleeper {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn cancelling_on(call: usize) -> Arc<Self> {
        Arc::new(Self {
            waits: Mutex::new(Vec::new()),
            cancel_on: Some(call),
        })
    }

    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().unwrap().clone()
    }

    pub fn seconds(&self) -> Vec<u64> {
        self.waits().iter().map(Duration::as_secs).collect()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration, stop: &StopToken) -> bool {
        let mut waits = self.waits.lock().unwrap();
        waits.push(duration);
        if self.cancel_on == Some(waits.len()) {
            stop.cancel();
        }
        stop.is_cancelled()
    }
}

/// A client pointed at `base` (a mock server URI) with the given sleeper.
pub fn builder(base: &str, sleeper: Arc<RecordingSleeper>) -> ClientBuilder {
    Client::builder("test-token")
        .api_url(format!("{base}/2"))
        .sleeper(sleeper)
}

/// An address nothing is listening on.
pub fn refused_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{port}")
}
