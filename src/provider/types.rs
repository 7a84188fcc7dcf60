use crate::conversation::Turn;
use crate::error::ChatError;
use futures_core::stream::BoxStream;
use std::future::Future;
use std::pin::Pin;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Sampling {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,

    /// Full outbound list; a leading system turn carries the system prompt.
    pub messages: Vec<Turn>,

    pub sampling: Sampling,
}

/// One text delta. May be empty.
#[derive(Debug, Clone)]
pub struct ChatChunk {
    pub text: String,
}

pub type ChunkStream = BoxStream<'static, Result<ChatChunk, ChatError>>;

pub type StreamFuture = Pin<Box<dyn Future<Output = Result<ChunkStream, ChatError>> + Send>>;

/// Provider interface: a single streaming chat call.
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start streaming a response. The stream ends when the vendor signals
    /// end of message; a failure is always the last item.
    fn stream_chat(&self, req: ChatRequest) -> StreamFuture;
}
