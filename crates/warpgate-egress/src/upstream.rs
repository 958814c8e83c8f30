//! Upstream chat connector
//!
//! Sends the flattened conversation to `POST {base}/api/chat` with the
//! identity's client and turns the event-stream body into [`UpstreamEvent`]s.
//! Status interpretation is left to the caller, which owns rotation and
//! eviction.

use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use tracing::{debug, instrument, warn};
use warpgate_core::upstream::{UpstreamChatRequest, UpstreamEvent, UpstreamLine, parse_line};

use crate::client::chat_headers;
use crate::identity::Identity;
use crate::Result;

/// Connector for the upstream chat endpoint
#[derive(Debug, Clone)]
pub struct UpstreamConnector {
    base_url: String,
}

impl UpstreamConnector {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    /// Issue the chat call. Any HTTP status is returned as a response;
    /// only transport failures are errors.
    #[instrument(skip(self, identity, request), fields(model = %request.selected_chat_model))]
    pub async fn send_chat(
        &self,
        identity: &Identity,
        request: &UpstreamChatRequest,
    ) -> Result<reqwest::Response> {
        let response = identity
            .client()
            .post(self.chat_url())
            .headers(chat_headers(&self.base_url)?)
            .json(request)
            .send()
            .await?;

        debug!(status = %response.status(), "Upstream chat response");
        Ok(response)
    }
}

/// Parse an upstream response body into text events
pub fn upstream_events(response: reqwest::Response) -> BoxStream<'static, UpstreamEvent> {
    parse_event_stream(response.bytes_stream())
}

/// Parse an event-stream byte stream into upstream events.
///
/// The body is split on `\n` and every `data:` line is parsed as soon as it
/// is complete; blank, comment and malformed lines are skipped. The stream
/// ends at `[DONE]`, at the end of the body (a final unterminated line still
/// counts), or at the first transport error.
pub fn parse_event_stream<S, E>(bytes: S) -> BoxStream<'static, UpstreamEvent>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = (bytes.boxed(), LineSplitter::default(), false);

    stream::unfold(state, |(mut bytes, mut splitter, finished)| async move {
        if finished {
            return None;
        }
        match bytes.next().await {
            Some(Ok(chunk)) => {
                let lines = splitter.push(&chunk);
                Some((lines, (bytes, splitter, false)))
            }
            Some(Err(e)) => {
                warn!(error = %e, "Upstream event stream interrupted");
                Some((Vec::new(), (bytes, splitter, true)))
            }
            None => {
                let rest = splitter.finish().into_iter().collect();
                Some((rest, (bytes, splitter, true)))
            }
        }
    })
    .flat_map(stream::iter)
    .filter_map(|line| futures::future::ready(parse_line(&line)))
    .take_while(|line| futures::future::ready(*line != UpstreamLine::Done))
    .filter_map(|line| {
        futures::future::ready(match line {
            UpstreamLine::Event(event) => Some(event),
            UpstreamLine::Done => None,
        })
    })
    .boxed()
}

/// Byte buffer that yields complete lines.
///
/// Lines are cut on raw bytes so a multi-byte character split across two
/// chunks is decoded whole.
#[derive(Debug, Default)]
struct LineSplitter {
    buf: Vec<u8>,
}

impl LineSplitter {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            lines.push(decode(&line[..pos]));
        }
        lines
    }

    /// Whatever is left after the last newline
    fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(decode(&rest))
    }
}

fn decode(line: &[u8]) -> String {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(chunks: &[&'static str]) -> BoxStream<'static, UpstreamEvent> {
        let items: Vec<std::result::Result<Bytes, std::io::Error>> =
            chunks.iter().map(|c| Ok(Bytes::from_static(c.as_bytes()))).collect();
        parse_event_stream(stream::iter(items))
    }

    fn texts(events: Vec<UpstreamEvent>) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| e.text_delta().map(str::to_string))
            .collect()
    }

    #[tokio::test]
    async fn test_parses_deltas_until_done() {
        let events: Vec<_> = body(&[
            "data: {\"type\":\"start\"}\n\n",
            "data: {\"type\":\"text-delta\",\"delta\":\"Hel\"}\n\n",
            "data: {\"type\":\"text-delta\",\"delta\":\"lo\"}\n\n",
            "data: [DONE]\n\n",
            "data: {\"type\":\"text-delta\",\"delta\":\"ignored\"}\n\n",
        ])
        .collect()
        .await;

        assert_eq!(events.len(), 3);
        assert_eq!(texts(events), vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn test_events_split_across_chunks() {
        let events: Vec<_> = body(&[
            "data: {\"type\":\"text-de",
            "lta\",\"delta\":\"a\"}\n",
            "\ndata: {\"type\":\"text-delta\",\"delta\":\"b\"}\n\n",
        ])
        .collect()
        .await;

        assert_eq!(texts(events), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let events: Vec<_> = body(&[
            "data: {broken\n\n",
            ": keepalive\n\n",
            "data: {\"type\":\"text-delta\",\"delta\":\"ok\"}\n\n",
        ])
        .collect()
        .await;

        assert_eq!(texts(events), vec!["ok"]);
    }

    #[tokio::test]
    async fn test_multi_line_data_parsed_per_line() {
        let events: Vec<_> = body(&[
            "data: {\"type\":\"text-delta\",\"delta\":\"x\"}\ndata: {\"type\":\"text-delta\",\"delta\":\"y\"}\n\n",
        ])
        .collect()
        .await;

        assert_eq!(texts(events), vec!["x", "y"]);
    }

    #[tokio::test]
    async fn test_single_newline_framing() {
        let events: Vec<_> = body(&[
            "data: {\"type\":\"text-delta\",\"delta\":\"Hel\"}\n",
            "data: {\"type\":\"text-delta\",\"delta\":\"lo\"}\n",
            "data: [DONE]\n",
        ])
        .collect()
        .await;

        assert_eq!(texts(events), vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn test_lines_emitted_before_body_ends() {
        let (tx, rx) = futures::channel::mpsc::unbounded::<std::result::Result<Bytes, std::io::Error>>();
        let mut events = parse_event_stream(rx);

        tx.unbounded_send(Ok(Bytes::from_static(
            b"data: {\"type\":\"text-delta\",\"delta\":\"first\"}\n",
        )))
        .unwrap();
        let first = events.next().await.unwrap();
        assert_eq!(first.text_delta(), Some("first"));

        drop(tx);
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn test_final_line_without_newline() {
        let events: Vec<_> = body(&[
            "data: {\"type\":\"text-delta\",\"delta\":\"a\"}\n",
            "data: {\"type\":\"text-delta\",\"delta\":\"b\"}",
        ])
        .collect()
        .await;

        assert_eq!(texts(events), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_crlf_and_split_multibyte_text() {
        let items: Vec<std::result::Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"data: {\"type\":\"text-delta\",\"delta\":\"\xe4\xbd")),
            Ok(Bytes::from_static(b"\xa0\"}\r\n")),
        ];
        let events: Vec<_> = parse_event_stream(stream::iter(items)).collect().await;
        assert_eq!(texts(events), vec!["你"]);
    }

    #[tokio::test]
    async fn test_transport_error_ends_stream() {
        let items: Vec<std::result::Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"data: {\"type\":\"text-delta\",\"delta\":\"a\"}\n\n")),
            Err(std::io::Error::other("reset")),
            Ok(Bytes::from_static(b"data: {\"type\":\"text-delta\",\"delta\":\"b\"}\n\n")),
        ];
        let events: Vec<_> = parse_event_stream(stream::iter(items)).collect().await;
        assert_eq!(texts(events), vec!["a"]);
    }

    #[test]
    fn test_chat_url() {
        let connector = UpstreamConnector::new("https://demo.chat-sdk.dev/");
        assert_eq!(connector.chat_url(), "https://demo.chat-sdk.dev/api/chat");
    }
}
