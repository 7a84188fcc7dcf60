use super::sse::{self, Decoded, SseEvent};
use super::{ChatRequest, Provider, StreamFuture};
use crate::error::ChatError;
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use serde::{Deserialize, Serialize};

const NAME: &str = "openai";

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1/";

/// OpenAI chat completions, streamed.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    http: reqwest::Client,
    headers: HeaderMap,
    endpoint: Url,
}

impl OpenAiProvider {
    pub fn new(http: reqwest::Client, api_key: &str, api_base: &str) -> anyhow::Result<Self> {
        let base = if api_base.ends_with('/') {
            Url::parse(api_base)
        } else {
            Url::parse(&format!("{api_base}/"))
        }
        .with_context(|| format!("invalid OpenAI base URL: {api_base}"))?;
        let endpoint = base.join("chat/completions")?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .context("OpenAI API key is not a valid header value")?;
        headers.insert(AUTHORIZATION, auth);

        Ok(Self { http, headers, endpoint })
    }
}

impl Provider for OpenAiProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn stream_chat(&self, req: ChatRequest) -> StreamFuture {
        let this = self.clone();

        Box::pin(async move {
            let body = ChatCompletionRequest {
                messages: req
                    .messages
                    .iter()
                    .map(|t| WireMessage {
                        role: t.role.as_str(),
                        content: t.content.clone(),
                    })
                    .collect(),
                model: req.model,
                stream: true,
                max_tokens: req.sampling.max_tokens,
                temperature: req.sampling.temperature,
            };

            tracing::debug!(model = %body.model, messages = body.messages.len(), "opening OpenAI stream");

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
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// Role-only and finish-reason chunks carry no content and are skipped.
fn decode_event(ev: &SseEvent) -> Decoded {
    let data = ev.data.trim();
    if data.is_empty() {
        return Decoded::Skip;
    }
    if data == "[DONE]" {
        return Decoded::Done;
    }

    let chunk: CompletionChunk = match serde_json::from_str(data) {
        Ok(c) => c,
        Err(e) => {
            return Decoded::Fail(ChatError::Protocol {
                provider: NAME,
                detail: format!("failed to parse chunk JSON: {e}"),
            })
        }
    };

    if let Some(err) = chunk.error {
        return Decoded::Fail(ChatError::Upstream { provider: NAME, message: err.message });
    }

    match chunk.choices.into_iter().next().and_then(|c| c.delta.content) {
        Some(text) => Decoded::Text(text),
        None => Decoded::Skip,
    }
}
