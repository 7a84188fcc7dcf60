use super::sse::{self, Decoded, SseEvent};
use super::{ChatRequest, Provider, StreamFuture};
use crate::conversation::Role;
use crate::error::ChatError;
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Url;
use serde::{Deserialize, Serialize};

const NAME: &str = "anthropic";

pub const DEFAULT_API_BASE: &str = "https://api.anthropic.com/";

const API_VERSION: &str = "2023-06-01";

/// The messages API rejects requests without `max_tokens`.
pub const DEFAULT_MAX_TOKENS: u32 = 1000;

/// Anthropic messages API, streamed.
#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    http: reqwest::Client,
    headers: HeaderMap,
    endpoint: Url,
}

impl AnthropicProvider {
    pub fn new(http: reqwest::Client, api_key: &str, api_base: &str) -> anyhow::Result<Self> {
        let base = if api_base.ends_with('/') {
            Url::parse(api_base)
        } else {
            Url::parse(&format!("{api_base}/"))
        }
        .with_context(|| format!("invalid Anthropic base URL: {api_base}"))?;
        let endpoint = base.join("v1/messages")?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            HeaderName::from_static("anthropic-version"),
            HeaderValue::from_static(API_VERSION),
        );
        let key = HeaderValue::from_str(api_key).context("Anthropic API key is not a valid header value")?;
        headers.insert(HeaderName::from_static("x-api-key"), key);

        Ok(Self { http, headers, endpoint })
    }
}

impl Provider for AnthropicProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn stream_chat(&self, req: ChatRequest) -> StreamFuture {
        let this = self.clone();

        Box::pin(async move {
            let body = MessagesRequest::from_request(req);

            tracing::debug!(model = %body.model, messages = body.messages.len(), "opening Anthropic stream");

            let resp = this
                .http
                .post(this.endpoint.clone())
                .headers(this.headers.clone())
                .json(&body)
                .send()
                .await
                .map_err(|source| ChatError::Transport { provider: NAME, source })?;

            if !resp.status().is_success() {
                return Err(sse::api_error(NAME, resp).await);
            }

            Ok(sse::spawn_pump(NAME, resp, decode_event))
        })
    }
}

#[derive(Debug, Clone, Serialize)]
struct MessagesRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

impl MessagesRequest {
    /// System turns move to the top-level `system` field.
    fn from_request(req: ChatRequest) -> Self {
        let mut system: Vec<String> = Vec::new();
        let mut messages = Vec::with_capacity(req.messages.len());
        for turn in req.messages {
            match turn.role {
                Role::System => system.push(turn.content),
                role => messages.push(WireMessage {
                    role: role.as_str(),
                    content: turn.content,
                }),
            }
        }

        Self {
            model: req.model,
            system: if system.is_empty() { None } else { Some(system.join("\n\n")) },
            messages,
            max_tokens: req.sampling.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: req.sampling.temperature,
            stream: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    ContentBlockDelta { delta: BlockDelta },
    MessageStop,
    Error { error: ErrorBody },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}

fn decode_event(ev: &SseEvent) -> Decoded {
    let parsed: StreamEvent = match serde_json::from_str(&ev.data) {
        Ok(e) => e,
        Err(e) => {
            return Decoded::Fail(ChatError::Protocol {
                provider: NAME,
                detail: format!("failed to parse {} event: {e}", ev.event.as_deref().unwrap_or("SSE")),
            })
        }
    };

    match parsed {
        StreamEvent::ContentBlockDelta { delta: BlockDelta::TextDelta { text } } => Decoded::Text(text),
        StreamEvent::ContentBlockDelta { delta: BlockDelta::Other } | StreamEvent::Other => Decoded::Skip,
        StreamEvent::MessageStop => Decoded::Done,
        StreamEvent::Error { error } => Decoded::Fail(ChatError::Upstream {
            provider: NAME,
            message: format!("{}: {}", error.kind, error.message),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Turn;
    use crate::provider::{mock, Sampling};
    use axum::http::StatusCode;
    use tokio_stream::StreamExt;

    const HAPPY: &str = concat!(
        "event: message_start\n",
        "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\"}}\n\n",
        "event: content_block_start\n",
        "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
        "event: ping\n",
        "data: {\"type\":\"ping\"}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"lo\"}}\n\n",
        "event: content_block_stop\n",
        "data: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
        "event: message_delta\n",
        "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"}}\n\n",
        "event: message_stop\n",
        "data: {\"type\":\"message_stop\"}\n\n",
    );

    fn request() -> ChatRequest {
        ChatRequest {
            model: "claude-3-5-sonnet-20240620".into(),
            messages: vec![
                Turn::system("be brief"),
                Turn::user("hi"),
                Turn::assistant("hello"),
                Turn::user("again"),
            ],
            sampling: Sampling { max_tokens: None, temperature: Some(0.7) },
        }
    }

    #[tokio::test]
    async fn streams_text_deltas_with_system_split_out() {
        let (base, seen) = mock::serve("/v1/messages", StatusCode::OK, HAPPY).await;
        let p = AnthropicProvider::new(reqwest::Client::new(), "ak-test", &base).unwrap();

        let stream = p.stream_chat(request()).await.unwrap();
        let out: Vec<Result<String, ChatError>> = stream.map(|r| r.map(|c| c.text)).collect().await;
        let texts: Vec<String> = out.into_iter().map(Result::unwrap).collect();
        assert_eq!(texts, vec!["Hel", "lo"]);

        let seen = seen.lock().unwrap();
        let req = &seen[0];
        assert_eq!(req.headers["x-api-key"], "ak-test");
        assert_eq!(req.headers["anthropic-version"], API_VERSION);
        assert_eq!(req.body["system"], "be brief");
        assert_eq!(req.body["max_tokens"], DEFAULT_MAX_TOKENS);
        assert_eq!(req.body["messages"].as_array().unwrap().len(), 3);
        assert_eq!(req.body["messages"][0]["role"], "user");
        assert_eq!(req.body["messages"][1]["role"], "assistant");
    }

    #[tokio::test]
    async fn error_event_ends_stream_with_failure() {
        let body = concat!(
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"x\"}}\n\n",
            "event: error\n",
            "data: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n",
        );
        let (base, _) = mock::serve("/v1/messages", StatusCode::OK, body).await;
        let p = AnthropicProvider::new(reqwest::Client::new(), "k", &base).unwrap();

        let stream = p.stream_chat(request()).await.unwrap();
        let out: Vec<_> = stream.collect().await;
        assert_eq!(out.len(), 2);
        match &out[1] {
            Err(ChatError::Upstream { message, .. }) => assert_eq!(message, "overloaded_error: Overloaded"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn no_system_turn_omits_field() {
        let body = MessagesRequest::from_request(ChatRequest {
            model: "m".into(),
            messages: vec![Turn::user("hi")],
            sampling: Sampling { max_tokens: Some(42), temperature: None },
        });
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("system").is_none());
        assert!(json.get("temperature").is_none());
        assert_eq!(json["max_tokens"], 42);
    }
}
