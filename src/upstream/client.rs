use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::Stream;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use tokio::time::timeout;
use tracing::warn;

use crate::error::GatewayError;

/// Raw SSE body of a streamed completion
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// Longest upstream error text echoed back to callers
const MAX_ERROR_TEXT: usize = 500;

/// Client for the backend's `/chat/completions` endpoint
#[derive(Clone)]
pub struct UpstreamClient {
    http: Client,
    completions_url: String,
    api_key: String,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(http: Client, base_url: &str, api_key: String, timeout: Duration) -> Self {
        Self {
            http,
            completions_url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            timeout,
        }
    }

    fn request(&self, stream: bool) -> RequestBuilder {
        let accept = if stream {
            "text/event-stream"
        } else {
            "application/json"
        };

        self.http
            .post(&self.completions_url)
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {}", self.api_key))
            .header("accept", accept)
    }

    /// Send `body` and return the successful response, classified by status
    async fn send(&self, body: &Value, stream: bool) -> Result<Response, GatewayError> {
        let response = self.request(stream).json(body).send().await?;
        classify(response).await
    }

    /// Buffered completion: the timeout covers the response and its body
    pub async fn complete(&self, body: &Value) -> Result<Value, GatewayError> {
        let call = async {
            let response = self.send(body, false).await?;
            let status = response.status();
            let bytes = response.bytes().await?;
            serde_json::from_slice::<Value>(&bytes).map_err(|e| GatewayError::UpstreamApi {
                status: status.as_u16(),
                message: format!("Backend returned invalid JSON: {e}"),
            })
        };

        timeout(self.timeout, call)
            .await
            .map_err(|_| GatewayError::UpstreamTimeout(self.timeout))?
    }

    /// Open a streamed completion. The timeout covers obtaining the response;
    /// the body is relayed for as long as the backend keeps sending.
    pub async fn open_stream(&self, body: &Value) -> Result<ByteStream, GatewayError> {
        let response = timeout(self.timeout, self.send(body, true))
            .await
            .map_err(|_| GatewayError::UpstreamTimeout(self.timeout))??;
        Ok(Box::pin(response.bytes_stream()))
    }
}

/// Map a non-success backend status onto the gateway's error taxonomy
async fn classify(response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = upstream_message(&text);
    warn!("Backend API returned {status}: {message}");

    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        Err(GatewayError::UpstreamAuth(message))
    } else {
        Err(GatewayError::UpstreamApi {
            status: status.as_u16(),
            message,
        })
    }
}

/// Prefer `error.message` (or a bare `error` string) from an OpenAI-style body
fn upstream_message(text: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        let error = value.get("error");
        if let Some(msg) = error
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .or_else(|| error.and_then(|e| e.as_str()))
        {
            return msg.to_string();
        }
    }

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }
    trimmed.chars().take(MAX_ERROR_TEXT).collect()
}
