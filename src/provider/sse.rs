use super::{ChatChunk, ChunkStream};
use crate::error::ChatError;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Value of the `event:` field, if the server sent one.
    pub event: Option<String>,
    pub data: String,
}

/// Minimal SSE parser.
///
/// - Collects UTF-8 lines across arbitrary chunk boundaries
/// - Emits an event when a blank line ends a block with at least one `data:` line
/// - Ignores `id:`, `retry:` and comment lines
pub struct SseParser {
    buf: Vec<u8>,
    cur_event: Option<String>,
    cur_data: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            cur_event: None,
            cur_data: String::new(),
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<SseEvent, std::str::Utf8Error>> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line = self.buf.drain(..=pos).collect::<Vec<u8>>();
            line.pop();
            if line.ends_with(b"\r") {
                line.pop();
            }

            if line.is_empty() {
                let event = self.cur_event.take();
                if !self.cur_data.is_empty() {
                    // Drop the separator added after the last data line.
                    self.cur_data.pop();
                    let data = std::mem::take(&mut self.cur_data);
                    out.push(Ok(SseEvent { event, data }));
                }
                continue;
            }

            let s = match std::str::from_utf8(&line) {
                Ok(s) => s,
                Err(e) => {
                    out.push(Err(e));
                    continue;
                }
            };

            if let Some(rest) = s.strip_prefix("data:") {
                let rest = rest.strip_prefix(' ').unwrap_or(rest);
                self.cur_data.push_str(rest);
                self.cur_data.push('\n');
            } else if let Some(rest) = s.strip_prefix("event:") {
                let rest = rest.strip_prefix(' ').unwrap_or(rest);
                self.cur_event = Some(rest.to_string());
            }
        }

        out
    }
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

/// What a vendor decoder made of one SSE event.
#[derive(Debug)]
pub enum Decoded {
    Text(String),
    Skip,
    Done,
    Fail(ChatError),
}

/// Drive an SSE response body on a background task, turning decoded events
/// into chunks. A body that ends before the decoder reports `Done` yields
/// [`ChatError::Incomplete`].
pub fn spawn_pump<F>(provider: &'static str, resp: reqwest::Response, mut decode: F) -> ChunkStream
where
    F: FnMut(&SseEvent) -> Decoded + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Result<ChatChunk, ChatError>>(64);

    tokio::spawn(async move {
        let mut stream = resp.bytes_stream();
        let mut parser = SseParser::new();

        while let Some(item) = stream.next().await {
            let bytes = match item {
                Ok(b) => b,
                Err(source) => {
                    let _ = tx.send(Err(ChatError::Transport { provider, source })).await;
                    return;
                }
            };

            for ev in parser.push(&bytes) {
                let ev = match ev {
                    Ok(ev) => ev,
                    Err(e) => {
                        let detail = format!("SSE line is not valid UTF-8: {e}");
                        let _ = tx.send(Err(ChatError::Protocol { provider, detail })).await;
                        return;
                    }
                };

                match decode(&ev) {
                    Decoded::Text(text) => {
                        if tx.send(Ok(ChatChunk { text })).await.is_err() {
                            tracing::debug!(provider, "receiver dropped; closing provider stream");
                            return;
                        }
                    }
                    Decoded::Skip => {}
                    Decoded::Done => return,
                    Decoded::Fail(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }
        }

        let _ = tx.send(Err(ChatError::Incomplete { provider })).await;
    });

    Box::pin(ReceiverStream::new(rx))
}

/// Read a failed response into [`ChatError::Api`].
pub async fn api_error(provider: &'static str, resp: reqwest::Response) -> ChatError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    ChatError::Api { provider, status, body }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(ev: &str) -> SseEvent {
        SseEvent { event: None, data: ev.to_string() }
    }

    #[test]
    fn events_split_across_chunks() {
        let mut p = SseParser::new();
        assert!(p.push(b"data: {\"a\"").is_empty());
        assert!(p.push(b":1}\n").is_empty());
        let out = p.push(b"\ndata: [DONE]\n\n");
        let out: Vec<_> = out.into_iter().map(Result::unwrap).collect();
        assert_eq!(out, vec![data("{\"a\":1}"), data("[DONE]")]);
    }

    #[test]
    fn crlf_and_event_names() {
        let mut p = SseParser::new();
        let out = p.push(b"event: ping\r\ndata: {}\r\n\r\n: comment\r\ndata: x\r\n\r\n");
        let out: Vec<_> = out.into_iter().map(Result::unwrap).collect();
        assert_eq!(
            out,
            vec![
                SseEvent { event: Some("ping".into()), data: "{}".into() },
                data("x"),
            ]
        );
    }

    #[test]
    fn multi_line_data_is_joined() {
        let mut p = SseParser::new();
        let out = p.push(b"data: one\ndata: two\n\n");
        assert_eq!(out.into_iter().next().unwrap().unwrap().data, "one\ntwo");
    }

    #[test]
    fn event_name_does_not_leak_into_next_block() {
        let mut p = SseParser::new();
        let out = p.push(b"event: lonely\n\ndata: y\n\n");
        let out: Vec<_> = out.into_iter().map(Result::unwrap).collect();
        assert_eq!(out, vec![data("y")]);
    }

    #[test]
    fn invalid_utf8_is_reported() {
        let mut p = SseParser::new();
        let out = p.push(b"data: \xff\xfe\n\n");
        assert!(out.iter().any(|r| r.is_err()));
    }
}
