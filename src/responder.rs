use crate::conversation::SharedConversation;
use crate::error::ChatError;
use crate::provider::{ChatRequest, Provider, Sampling};
use futures_core::stream::BoxStream;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

/// Cumulative response text so far, or the failure that ended the reply.
pub type ReplyStream = BoxStream<'static, Result<String, ChatError>>;

/// Turns one user message plus a conversation into a stream of ever-longer
/// response buffers.
///
/// Each call opens a fresh provider stream. Every delta is appended to the
/// buffer and the whole buffer is yielded, so callers can re-render without
/// diffing. When the provider finishes cleanly the user/assistant pair is
/// appended to the conversation before the stream ends. A failure is yielded
/// as the last item and leaves the conversation untouched.
#[derive(Clone)]
pub struct Responder {
    provider: Arc<dyn Provider>,
    model: String,
    system_prompt: Option<String>,
    sampling: Sampling,
}

impl Responder {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            system_prompt: None,
            sampling: Sampling::default(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_sampling(mut self, sampling: Sampling) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub fn respond(&self, message: impl Into<String>, history: SharedConversation) -> ReplyStream {
        let message = message.into();
        let provider = self.provider.clone();
        let model = self.model.clone();
        let system_prompt = self.system_prompt.clone();
        let sampling = self.sampling;

        let (tx, rx) = mpsc::channel::<Result<String, ChatError>>(64);

        tokio::spawn(async move {
            let name = provider.name();
            let messages = history.lock().await.outbound(system_prompt.as_deref(), &message);
            let req = ChatRequest { model, messages, sampling };

            let mut stream = match provider.stream_chat(req).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(provider = name, error = %e, "failed to open chat stream");
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };

            let mut buffer = String::new();
            while let Some(item) = stream.next().await {
                match item {
                    Ok(chunk) => {
                        buffer.push_str(&chunk.text);
                        if tx.send(Ok(buffer.clone())).await.is_err() {
                            tracing::debug!(provider = name, "reply abandoned; exchange not recorded");
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(provider = name, error = %e, "chat stream failed");
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }

            let mut history = history.lock().await;
            history.record_exchange(message, buffer);
            tracing::debug!(provider = name, turns = history.len(), "exchange recorded");
        });

        Box::pin(ReceiverStream::new(rx))
    }
}

/// Render failures as `"Error: …"` text in place of an answer.
#[cfg_attr(not(test), allow(dead_code))]
pub fn display_text(stream: ReplyStream) -> BoxStream<'static, String> {
    Box::pin(stream.map(|r| r.unwrap_or_else(|e| e.display_text())))
}
