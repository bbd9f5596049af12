use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;

use crate::errors::{PilotError, PilotResult};
use crate::llm::provider::LlmProvider;
use crate::llm::sse_parser;
use crate::llm::types::{CallConfig, ChatMessage, LlmResponse, StreamChunkKind};

const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

pub struct OpenAiCompatibleProvider {
    id: String,
    api_base: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: String, api_base: String, api_key: String, max_retries: u32) -> Self {
        Self {
            id,
            api_base,
            api_key,
            max_retries,
            client: reqwest::Client::new(),
        }
    }

    async fn send_once(&self, body: &serde_json::Value) -> Result<reqwest::Response, Attempt> {
        let response = self
            .client
            .post(&self.api_base)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    Attempt::Retryable(PilotError::Http(e))
                } else {
                    Attempt::Fatal(PilotError::Http(e))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let err_body = response.text().await.unwrap_or_default();
        let err = PilotError::PlannerUnavailable(format!("{}: {}: {}", self.id, status, err_body));
        if status.as_u16() == 429 || status.is_server_error() {
            Err(Attempt::Retryable(err))
        } else {
            Err(Attempt::Fatal(err))
        }
    }
}

enum Attempt {
    Retryable(PilotError),
    Fatal(PilotError),
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.id
    }

    async fn chat(&self, messages: Vec<ChatMessage>, cfg: &CallConfig) -> PilotResult<LlmResponse> {
        let body = serde_json::json!({
            "model": cfg.model,
            "messages": &messages,
            "stream": cfg.stream,
            "temperature": cfg.temperature,
            "max_tokens": cfg.max_tokens,
        });

        tracing::debug!(
            provider = %self.id,
            model = %cfg.model,
            stream = cfg.stream,
            "sending LLM request"
        );
        tracing::trace!(body = %sanitized_body(&body), "request body (sanitized, base64 omitted)");

        let mut attempt = 0u32;
        let response = loop {
            match self.send_once(&body).await {
                Ok(resp) => break resp,
                Err(Attempt::Retryable(e)) if attempt < self.max_retries => {
                    let delay = RETRY_BASE_DELAY * 2u32.saturating_pow(attempt);
                    attempt += 1;
                    tracing::warn!(
                        provider = %self.id,
                        attempt,
                        max = self.max_retries,
                        error = %e,
                        "LLM request failed, retrying in {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(Attempt::Retryable(e)) | Err(Attempt::Fatal(e)) => return Err(e),
            }
        };

        if cfg.stream {
            self.handle_stream(response).await
        } else {
            self.handle_json(response).await
        }
    }
}

impl OpenAiCompatibleProvider {
    /// Accumulates an SSE streaming response.
    async fn handle_stream(&self, response: reqwest::Response) -> PilotResult<LlmResponse> {
        let mut byte_stream = response.bytes_stream();
        let mut line_buf: Vec<u8> = Vec::new();
        let mut resp = LlmResponse::default();

        'stream: while let Some(result) = byte_stream.next().await {
            let bytes = result?;
            for &b in bytes.iter() {
                if b != b'\n' {
                    line_buf.push(b);
                    continue;
                }
                let line = String::from_utf8_lossy(&line_buf).trim().to_string();
                line_buf.clear();
                if line.is_empty() {
                    continue;
                }
                match sse_parser::parse_sse_line(&line) {
                    Ok(Some(chunk)) => match chunk.kind {
                        StreamChunkKind::Reasoning => resp.reasoning.push_str(&chunk.content),
                        StreamChunkKind::Content => resp.content.push_str(&chunk.content),
                        StreamChunkKind::Done => break 'stream,
                    },
                    Ok(None) => {}
                    Err(e) => tracing::debug!("SSE parse skipped: {e}"),
                }
            }
        }

        tracing::info!(
            content_len = resp.content.len(),
            reasoning_len = resp.reasoning.len(),
            "LLM stream complete"
        );
        Ok(resp)
    }

    /// Handle a non-streaming JSON response.
    async fn handle_json(&self, response: reqwest::Response) -> PilotResult<LlmResponse> {
        let json: serde_json::Value = response.json().await?;

        let message = &json["choices"][0]["message"];
        let content = message["content"].as_str().unwrap_or("").to_string();
        let reasoning = message["reasoning_content"].as_str().unwrap_or("").to_string();

        tracing::info!(content_len = content.len(), "LLM JSON response received");
        Ok(LlmResponse { content, reasoning })
    }
}

/// Request body for logging: the real request keeps its image payloads,
/// the logged copy has every `image_url` replaced by a placeholder.
fn sanitized_body(body: &serde_json::Value) -> String {
    let mut log_body = body.clone();
    if let Some(msgs) = log_body.get_mut("messages").and_then(|m| m.as_array_mut()) {
        for msg in msgs {
            let Some(parts) = msg.get_mut("content").and_then(|c| c.as_array_mut()) else {
                continue;
            };
            for part in parts {
                if part.get("type").and_then(|t| t.as_str()) == Some("image_url") {
                    if let Some(url) = part.get_mut("image_url").and_then(|u| u.get_mut("url")) {
                        *url = serde_json::Value::String("<omitted_base64_image>".to_string());
                    }
                }
            }
        }
    }
    serde_json::to_string(&log_body).unwrap_or_default()
}
