//! JSON verbs over an [`HttpClient`].

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::ApiError;
use crate::http_client::{HttpAuth, HttpClient, HttpError, HttpMethod, HttpRequest};

/// Issues `get`/`put`/`post` calls and decodes JSON answers.
///
/// Any non-2xx status becomes a [`HttpError`] carrying that status, so callers
/// see every backend refusal as an ordinary transport failure.
#[derive(Clone)]
pub struct Transport {
    client: Arc<dyn HttpClient>,
    auth: HttpAuth,
    timeout_ms: u64,
}

impl Transport {
    pub fn new(client: Arc<dyn HttpClient>, auth: HttpAuth, timeout_ms: u64) -> Self {
        Self {
            client,
            auth,
            timeout_ms,
        }
    }

    pub async fn get(&self, url: &Url) -> Result<Value, ApiError> {
        self.send(HttpRequest::get(url.as_str()), url).await
    }

    pub async fn put(&self, url: &Url, body: &Value) -> Result<Value, ApiError> {
        let request = HttpRequest::put(url.as_str()).with_json_body(encode(url, body)?);
        self.send(request, url).await
    }

    pub async fn post(&self, url: &Url, body: &Value) -> Result<Value, ApiError> {
        let request = HttpRequest::post(url.as_str()).with_json_body(encode(url, body)?);
        self.send(request, url).await
    }

    async fn send(&self, request: HttpRequest, url: &Url) -> Result<Value, ApiError> {
        let method = request.method;
        let request = request
            .with_auth(&self.auth)
            .with_header("accept", "application/json")
            .with_timeout_ms(self.timeout_ms);

        debug!(%method, url = %url, "issuing request");
        let response = self.client.execute(request).await?;

        if !response.is_success() {
            return Err(HttpError::with_status(response.status, status_message(method, &response.body)).into());
        }

        if response.body.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&response.body).map_err(|error| ApiError::Decode {
            url: url.to_string(),
            message: error.to_string(),
        })
    }
}

fn encode(url: &Url, body: &Value) -> Result<String, ApiError> {
    serde_json::to_string(body).map_err(|error| ApiError::Encode {
        url: url.to_string(),
        message: error.to_string(),
    })
}

fn status_message(method: HttpMethod, body: &str) -> String {
    const MAX_DETAIL: usize = 200;
    let detail = body.trim();
    if detail.is_empty() {
        return format!("{method} rejected by backend");
    }
    let mut end = detail.len().min(MAX_DETAIL);
    while !detail.is_char_boundary(end) {
        end -= 1;
    }
    format!("{method} rejected by backend: {}", &detail[..end])
}
