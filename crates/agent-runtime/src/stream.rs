//! Response Stream Framing
//!
//! Turns a raw HTTP byte stream into backend fragments. Bytes are decoded
//! as UTF-8 across network chunk boundaries, split into lines and grouped
//! into payloads: the `data:` lines of one server-sent event, or one line
//! of newline-delimited JSON. A [`FrameParser`] turns payloads into
//! fragments and may keep state between them (e.g. partial tool calls).

use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;

use agent_core::{AgentError, ChunkStream, Result};
use futures::{Stream, StreamExt};

/// Largest undecoded or unterminated input kept before giving up
const MAX_BUFFER: usize = 16 * 1024 * 1024;

/// How payloads are delimited
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Framing {
    /// Server-sent events; the `[DONE]` sentinel is dropped
    Sse,
    /// One JSON document per line
    Ndjson,
}

/// Stateful payload parser for one response
pub trait FrameParser: Send + 'static {
    type Output: Send + 'static;

    /// Handle one payload, yielding zero or more fragments
    fn on_frame(&mut self, payload: &str) -> Result<Vec<Self::Output>>;

    /// Called once after the last payload
    fn finish(&mut self) -> Result<Vec<Self::Output>> {
        Ok(Vec::new())
    }
}

/// Incremental UTF-8 line splitter
#[derive(Debug)]
struct LineDecoder {
    framing: Framing,
    undecoded: Vec<u8>,
    line: String,
    event_data: Vec<String>,
}

impl LineDecoder {
    const fn new(framing: Framing) -> Self {
        Self {
            framing,
            undecoded: Vec::new(),
            line: String::new(),
            event_data: Vec::new(),
        }
    }

    /// Feed bytes, returning every payload they complete
    fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>> {
        self.undecoded.extend_from_slice(bytes);
        if self.undecoded.len() + self.line.len() > MAX_BUFFER {
            return Err(AgentError::Transport(
                "Response stream exceeded the 16 MiB frame limit".into(),
            ));
        }

        let valid = match std::str::from_utf8(&self.undecoded) {
            Ok(text) => text.len(),
            // Incomplete sequence at the end: keep it for the next chunk
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(e) => {
                return Err(AgentError::Transport(format!(
                    "Response stream is not valid UTF-8: {e}"
                )));
            }
        };
        let decoded: Vec<u8> = self.undecoded.drain(..valid).collect();
        let text = String::from_utf8_lossy(&decoded);

        let mut payloads = Vec::new();
        for ch in text.chars() {
            if ch == '\n' {
                let line = std::mem::take(&mut self.line);
                self.on_line(line.trim_end_matches('\r'), &mut payloads);
            } else {
                self.line.push(ch);
            }
        }
        Ok(payloads)
    }

    /// Flush whatever is left at end of stream
    fn flush(&mut self) -> Vec<String> {
        let mut payloads = Vec::new();
        let line = std::mem::take(&mut self.line);
        if !line.is_empty() {
            self.on_line(line.trim_end_matches('\r'), &mut payloads);
        }
        if self.framing == Framing::Sse {
            self.on_line("", &mut payloads);
        }
        payloads
    }

    fn on_line(&mut self, line: &str, payloads: &mut Vec<String>) {
        match self.framing {
            Framing::Ndjson => {
                if !line.trim().is_empty() {
                    payloads.push(line.to_owned());
                }
            }
            Framing::Sse => {
                if line.is_empty() {
                    if !self.event_data.is_empty() {
                        let data = self.event_data.join("\n");
                        self.event_data.clear();
                        if data != "[DONE]" {
                            payloads.push(data);
                        }
                    }
                } else if let Some(data) = line.strip_prefix("data:") {
                    self.event_data
                        .push(data.strip_prefix(' ').unwrap_or(data).to_owned());
                }
                // `event:`, `id:`, `retry:` and `:` comments carry nothing we use
            }
        }
    }
}

type ByteStream<B, E> = Pin<Box<dyn Stream<Item = std::result::Result<B, E>> + Send>>;

struct FrameState<B, E, P: FrameParser> {
    bytes: ByteStream<B, E>,
    decoder: LineDecoder,
    parser: P,
    pending: VecDeque<Result<P::Output>>,
    finished: bool,
}

impl<B, E, P: FrameParser> FrameState<B, E, P> {
    fn feed(&mut self, payloads: Vec<String>) {
        for payload in payloads {
            match self.parser.on_frame(&payload) {
                Ok(fragments) => self.pending.extend(fragments.into_iter().map(Ok)),
                Err(e) => {
                    self.fail(e);
                    return;
                }
            }
        }
    }

    fn fail(&mut self, error: AgentError) {
        self.pending.push_back(Err(error));
        self.finished = true;
    }
}

/// Parse a byte stream into fragments.
///
/// The stream ends after the first error.
pub fn parse_frames<S, B, E, P>(bytes: S, framing: Framing, parser: P) -> ChunkStream<P::Output>
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
    P: FrameParser,
{
    let state = FrameState {
        bytes: Box::pin(bytes),
        decoder: LineDecoder::new(framing),
        parser,
        pending: VecDeque::new(),
        finished: false,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => match state.decoder.push(chunk.as_ref()) {
                    Ok(payloads) => state.feed(payloads),
                    Err(e) => state.fail(e),
                },
                Some(Err(e)) => {
                    state.fail(AgentError::Transport(format!("Stream read error: {e}")));
                }
                None => {
                    let payloads = state.decoder.flush();
                    state.feed(payloads);
                    if !state.finished {
                        match state.parser.finish() {
                            Ok(fragments) => state.pending.extend(fragments.into_iter().map(Ok)),
                            Err(e) => state.pending.push_back(Err(e)),
                        }
                        state.finished = true;
                    }
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Echoes payloads, failing on "boom"
    struct Echo;

    impl FrameParser for Echo {
        type Output = String;

        fn on_frame(&mut self, payload: &str) -> Result<Vec<String>> {
            if payload == "boom" {
                return Err(AgentError::Transport("boom".into()));
            }
            Ok(vec![payload.to_owned()])
        }

        fn finish(&mut self) -> Result<Vec<String>> {
            Ok(vec!["<end>".into()])
        }
    }

    async fn collect(chunks: Vec<&[u8]>, framing: Framing) -> Vec<Result<String>> {
        let owned: Vec<Vec<u8>> = chunks.into_iter().map(<[u8]>::to_vec).collect();
        let bytes = tokio_stream::iter(owned.into_iter().map(Ok::<_, std::io::Error>));
        parse_frames(bytes, framing, Echo).collect().await
    }

    fn ok(items: Vec<Result<String>>) -> Vec<String> {
        items.into_iter().map(|r| r.unwrap()).collect()
    }

    #[tokio::test]
    async fn sse_events_split_across_chunks() {
        let items = collect(
            vec![
                b"event: message\ndata: {\"a\"",
                b":1}\n\n: keep-alive\n\ndata: two\r\n\r\n",
                b"data: [DONE]\n\n",
            ],
            Framing::Sse,
        )
        .await;
        assert_eq!(ok(items), vec![r#"{"a":1}"#, "two", "<end>"]);
    }

    #[tokio::test]
    async fn multibyte_characters_split_across_chunks() {
        let text = "data: héllo ✓\n\n".as_bytes();
        let (head, rest) = text.split_at(8);

        let items = collect(vec![head, rest], Framing::Sse).await;
        assert_eq!(ok(items), vec!["héllo ✓", "<end>"]);
    }

    #[tokio::test]
    async fn ndjson_with_unterminated_last_line() {
        let items = collect(vec![b"{\"n\":1}\n\n{\"n\"", b":2}"], Framing::Ndjson).await;
        assert_eq!(ok(items), vec![r#"{"n":1}"#, r#"{"n":2}"#, "<end>"]);
    }

    #[tokio::test]
    async fn stream_ends_after_first_error() {
        let items = collect(vec![b"one\nboom\ntwo\n"], Framing::Ndjson).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "one");
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn read_errors_become_transport_errors() {
        let bytes = tokio_stream::iter(vec![
            Ok(b"data: one\n\n".to_vec()),
            Err("connection reset"),
        ]);
        let items: Vec<_> = parse_frames(bytes, Framing::Sse, Echo).collect().await;
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[1], Err(AgentError::Transport(m)) if m.contains("connection reset")));
    }
}
