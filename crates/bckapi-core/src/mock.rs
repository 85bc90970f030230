//! In-memory backend for offline runs and tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use url::Url;

use crate::http_client::{HttpClient, HttpError, HttpFuture, HttpMethod, HttpRequest, HttpResponse};

/// Canned answer for one route.
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    Json(Value),
    Status(u16),
    NetworkError,
}

#[derive(Debug, Default)]
struct Route {
    queued: VecDeque<MockReply>,
    sticky: Option<MockReply>,
}

#[derive(Debug, Default)]
struct MockInner {
    routes: HashMap<(HttpMethod, String), Route>,
    requests: Vec<HttpRequest>,
    latency: Duration,
}

/// [`HttpClient`] answering from per-method URL tables. Unknown routes fail
/// with a 404, like a backend that does not expose the resource.
///
/// Queued replies are consumed first, then the route's sticky reply repeats.
#[derive(Debug, Default)]
pub struct MockBackend {
    inner: Mutex<MockInner>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_get(self, url: &str, body: Value) -> Self {
        self.respond(HttpMethod::Get, url, MockReply::Json(body));
        self
    }

    pub fn on_put(self, url: &str, body: Value) -> Self {
        self.respond(HttpMethod::Put, url, MockReply::Json(body));
        self
    }

    pub fn on_post(self, url: &str, body: Value) -> Self {
        self.respond(HttpMethod::Post, url, MockReply::Json(body));
        self
    }

    /// Replaces the sticky reply for a route.
    pub fn respond(&self, method: HttpMethod, url: &str, reply: MockReply) {
        let mut inner = self.lock();
        inner.routes.entry((method, normalize(url))).or_default().sticky = Some(reply);
    }

    /// Queues a one-shot reply served before the sticky one.
    pub fn enqueue(&self, method: HttpMethod, url: &str, reply: MockReply) {
        let mut inner = self.lock();
        inner
            .routes
            .entry((method, normalize(url)))
            .or_default()
            .queued
            .push_back(reply);
    }

    /// Delay applied to every answer.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.lock().requests.clone()
    }

    pub fn request_count(&self, method: HttpMethod, url: &str) -> usize {
        let url = normalize(url);
        self.lock()
            .requests
            .iter()
            .filter(|request| request.method == method && request.url == url)
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockInner> {
        self.inner.lock().expect("mock backend lock is not poisoned")
    }

    fn answer(&self, request: HttpRequest) -> (Duration, Result<HttpResponse, HttpError>) {
        let mut inner = self.lock();
        let key = (request.method, normalize(&request.url));
        inner.requests.push(request);

        let reply = inner.routes.get_mut(&key).and_then(|route| {
            route.queued.pop_front().or_else(|| route.sticky.clone())
        });

        let result = match reply {
            Some(MockReply::Json(body)) => Ok(HttpResponse::ok_json(body.to_string())),
            Some(MockReply::Status(status)) => Ok(HttpResponse {
                status,
                body: String::new(),
            }),
            Some(MockReply::NetworkError) => Err(HttpError::new(format!(
                "mock network failure for {} {}",
                key.0, key.1
            ))),
            None => Ok(HttpResponse {
                status: 404,
                body: format!("mock backend has no {} route for {}", key.0, key.1),
            }),
        };
        (inner.latency, result)
    }
}

impl HttpClient for MockBackend {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a> {
        Box::pin(async move {
            let (latency, result) = self.answer(request);
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            result
        })
    }
}

fn normalize(url: &str) -> String {
    Url::parse(url)
        .map(String::from)
        .unwrap_or_else(|_| url.to_owned())
}
