use super::{ChatChunk, ChatRequest, ChunkStream, Provider, StreamFuture};
use crate::conversation::Role;
use crate::error::ChatError;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Debug, Clone)]
#[cfg_attr(not(test), allow(dead_code))]
enum Script {
    /// Drip back the last user message.
    Echo,
    /// Emit these deltas, then optionally fail.
    Deltas { deltas: Vec<String>, fail: Option<String> },
    /// Fail before any stream is opened.
    Refuse(String),
}

/// Offline provider. Backs `--stub` mode and the test suites; records every
/// request it receives.
#[derive(Debug, Clone)]
pub struct StubProvider {
    name: &'static str,
    script: Script,
    delay: Duration,
    calls: Arc<Mutex<Vec<ChatRequest>>>,
}

impl StubProvider {
    pub fn echo(name: &'static str) -> Self {
        Self::with_script(name, Script::Echo).with_delay(Duration::from_millis(120))
    }

    fn with_script(name: &'static str, script: Script) -> Self {
        Self {
            name,
            script,
            delay: Duration::ZERO,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Scripted behaviours for tests.
#[cfg_attr(not(test), allow(dead_code))]
impl StubProvider {
    pub fn scripted<I, S>(name: &'static str, deltas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let deltas = deltas.into_iter().map(Into::into).collect();
        Self::with_script(name, Script::Deltas { deltas, fail: None })
    }

    /// Emit `deltas`, then end the stream with an upstream error.
    pub fn failing_after<I, S>(name: &'static str, deltas: I, message: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let deltas = deltas.into_iter().map(Into::into).collect();
        Self::with_script(name, Script::Deltas { deltas, fail: Some(message.into()) })
    }

    pub fn refusing(name: &'static str, message: impl Into<String>) -> Self {
        Self::with_script(name, Script::Refuse(message.into()))
    }

    /// Requests received so far, oldest first.
    pub fn calls(&self) -> Vec<ChatRequest> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl Provider for StubProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    fn stream_chat(&self, req: ChatRequest) -> StreamFuture {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(req.clone());
        }
        let this = self.clone();

        Box::pin(async move {
            let (deltas, fail) = match this.script {
                Script::Refuse(message) => {
                    return Err(ChatError::Upstream { provider: this.name, message });
                }
                Script::Deltas { deltas, fail } => (deltas, fail),
                Script::Echo => {
                    let said = req
                        .messages
                        .iter()
                        .rev()
                        .find(|t| t.role == Role::User)
                        .map(|t| t.content.clone())
                        .unwrap_or_default();
                    let deltas = vec![
                        format!("[stub {}]\nmodel: {}\n\n", this.name, req.model),
                        "You said: ".to_string(),
                        said,
                        "\n\n".to_string(),
                        "(Offline stub provider; no API was called.)".to_string(),
                    ];
                    (deltas, None)
                }
            };

            let (tx, rx) = mpsc::channel::<Result<ChatChunk, ChatError>>(32);
            let provider = this.name;
            let delay = this.delay;

            tokio::spawn(async move {
                for text in deltas {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    if tx.send(Ok(ChatChunk { text })).await.is_err() {
                        return;
                    }
                }
                if let Some(message) = fail {
                    let _ = tx.send(Err(ChatError::Upstream { provider, message })).await;
                }
            });

            Ok(Box::pin(ReceiverStream::new(rx)) as ChunkStream)
        })
    }
}
