//! Scripted [`HttpClient`] for unit tests.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Request, Response};

use super::HttpClient;

#[derive(Debug, Clone)]
pub struct SentRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl SentRequest {
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }
}

struct Scripted {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

/// Replays queued responses in order; answers 503 once the queue runs dry.
#[derive(Default)]
pub struct FakeClient {
    queue: Mutex<VecDeque<Scripted>>,
    sent: Mutex<Vec<SentRequest>>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, status: u16, headers: &[(&str, &str)], body: &str) {
        self.queue.lock().push_back(Scripted {
            status,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: body.to_string(),
        });
    }

    pub fn requests(&self) -> Vec<SentRequest> {
        self.sent.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl HttpClient for FakeClient {
    async fn execute(&self, req: Request) -> reqwest::Result<Response> {
        self.sent.lock().push(SentRequest {
            method: req.method().to_string(),
            url: req.url().to_string(),
            headers: req
                .headers()
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
                .collect(),
            body: req
                .body()
                .and_then(|b| b.as_bytes())
                .map(|b| String::from_utf8_lossy(b).into_owned()),
        });
        let next = self.queue.lock().pop_front().unwrap_or(Scripted {
            status: 503,
            headers: Vec::new(),
            body: "no scripted response".to_string(),
        });
        let mut builder = http::Response::builder().status(next.status);
        for (k, v) in &next.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        Ok(Response::from(builder.body(next.body).unwrap()))
    }
}
