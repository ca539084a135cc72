//! Server-Sent Events transport and the event-stream decoder shared with the
//! HTTP transport.
//!
//! The legacy MCP SSE flow: `GET` the stream URL, wait for an `endpoint`
//! event naming where to `POST` requests, then read responses as `message`
//! events on the same stream.

use std::collections::BTreeMap;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Url;
use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{MAX_FRAME_BYTES, TransportError};
use crate::protocol::JsonRpcMessage;

/// One dispatched event from a `text/event-stream` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event type; `message` when the stream did not name one.
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

/// Incremental `text/event-stream` parser.
///
/// Feed it arbitrary byte chunks; it yields complete events as blank lines
/// terminate them. A line or an event larger than the frame limit is dropped.
#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// Inside the unterminated tail of an oversized line
    skipping_line: bool,
    event: Option<String>,
    data: Vec<String>,
    data_len: usize,
    oversized: bool,
    id: Option<String>,
    max_frame: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_max_frame(MAX_FRAME_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn with_max_frame(max_frame: usize) -> Self {
        Self {
            buffer: Vec::new(),
            skipping_line: false,
            event: None,
            data: Vec::new(),
            data_len: 0,
            oversized: false,
            id: None,
            max_frame,
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if std::mem::take(&mut self.skipping_line) {
                continue;
            }
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        if self.buffer.len() > self.max_frame {
            tracing::warn!(
                bytes = self.buffer.len(),
                limit = self.max_frame,
                "dropping oversized event-stream line"
            );
            self.buffer.clear();
            self.skipping_line = true;
        }
        events
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = line.split_once(':').map_or((line, ""), |(f, v)| {
            (f, v.strip_prefix(' ').unwrap_or(v))
        });
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" if !self.oversized => {
                self.data_len += value.len() + 1;
                if self.data_len > self.max_frame {
                    self.oversized = true;
                    self.data.clear();
                } else {
                    self.data.push(value.to_string());
                }
            }
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        let id = self.id.take();
        self.data_len = 0;
        if std::mem::take(&mut self.oversized) {
            tracing::warn!(limit = self.max_frame, "dropping oversized event-stream event");
            return None;
        }
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
            id,
        })
    }
}

pub(super) fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TransportError::InvalidConfig(format!("header {name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| TransportError::InvalidConfig(format!("header {name}: {e}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Decode the payload of a `message` event: one message or a batch.
pub(super) fn parse_payload(data: &str) -> Result<Vec<JsonRpcMessage>, TransportError> {
    let value: serde_json::Value = serde_json::from_str(data)?;
    if value.is_array() {
        Ok(serde_json::from_value(value)?)
    } else {
        Ok(vec![serde_json::from_value(value)?])
    }
}

type Inbox = mpsc::UnboundedReceiver<Result<JsonRpcMessage, TransportError>>;

#[derive(Debug)]
pub struct SseTransport {
    client: reqwest::Client,
    endpoint: Url,
    headers: HeaderMap,
    inbox: Mutex<Inbox>,
    closed: CancellationToken,
    reader: JoinHandle<()>,
}

impl SseTransport {
    /// Open the event stream and wait for the endpoint announcement.
    pub async fn connect(
        client: reqwest::Client,
        url: &str,
        headers: &BTreeMap<String, String>,
        connect_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let stream_url = Url::parse(url)
            .map_err(|e| TransportError::InvalidConfig(format!("invalid URL {url}: {e}")))?;
        let headers = header_map(headers)?;

        let response = tokio::time::timeout(
            connect_timeout,
            client
                .get(stream_url.clone())
                .headers(headers.clone())
                .header(ACCEPT, "text/event-stream")
                .send(),
        )
        .await
        .map_err(|_| TransportError::Connect {
            url: url.to_string(),
            reason: "timed out opening event stream".into(),
        })??;

        if !response.status().is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let (endpoint_tx, endpoint_rx) = tokio::sync::oneshot::channel();
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();
        let reader = tokio::spawn(read_stream(
            response,
            stream_url,
            endpoint_tx,
            inbox_tx,
            closed.clone(),
        ));

        let endpoint = match tokio::time::timeout(connect_timeout, endpoint_rx).await {
            Ok(Ok(Ok(endpoint))) => endpoint,
            Ok(Ok(Err(e))) => {
                reader.abort();
                return Err(e);
            }
            Ok(Err(_)) => {
                reader.abort();
                return Err(TransportError::Closed(
                    "event stream ended before the endpoint event".into(),
                ));
            }
            Err(_) => {
                reader.abort();
                return Err(TransportError::Connect {
                    url: url.to_string(),
                    reason: "no endpoint event received".into(),
                });
            }
        };

        tracing::debug!(url, endpoint = %endpoint, "SSE endpoint announced");

        Ok(Self {
            client,
            endpoint,
            headers,
            inbox: Mutex::new(inbox_rx),
            closed,
            reader,
        })
    }

    pub async fn send(&self, message: &JsonRpcMessage) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed("event stream closed".into()));
        }
        let response = self
            .client
            .post(self.endpoint.clone())
            .headers(self.headers.clone())
            .json(message)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: self.endpoint.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    pub async fn receive(&self) -> Result<JsonRpcMessage, TransportError> {
        let mut inbox = self.inbox.lock().await;
        tokio::select! {
            biased;
            next = inbox.recv() => next.unwrap_or_else(|| {
                Err(TransportError::Closed("event stream ended".into()))
            }),
            () = self.closed.cancelled() => Err(TransportError::Closed("transport closed".into())),
        }
    }

    pub fn close(&self) {
        self.closed.cancel();
        self.reader.abort();
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_stream(
    response: reqwest::Response,
    base: Url,
    endpoint_tx: tokio::sync::oneshot::Sender<Result<Url, TransportError>>,
    inbox: mpsc::UnboundedSender<Result<JsonRpcMessage, TransportError>>,
    closed: CancellationToken,
) {
    let mut endpoint_tx = Some(endpoint_tx);
    let mut decoder = SseDecoder::new();
    let mut body = response.bytes_stream();

    loop {
        let chunk = tokio::select! {
            () = closed.cancelled() => return,
            chunk = body.next() => chunk,
        };
        let chunk = match chunk {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                let _ = inbox.send(Err(TransportError::Stream(e.to_string())));
                break;
            }
            None => break,
        };

        for event in decoder.feed(&chunk) {
            match event.event.as_str() {
                "endpoint" => {
                    let resolved = base.join(event.data.trim()).map_err(|e| {
                        TransportError::InvalidConfig(format!("bad endpoint {}: {e}", event.data))
                    });
                    if let Some(tx) = endpoint_tx.take() {
                        let _ = tx.send(resolved);
                    }
                }
                "message" => match parse_payload(&event.data) {
                    Ok(messages) => {
                        for message in messages {
                            let _ = inbox.send(Ok(message));
                        }
                    }
                    Err(e) => tracing::debug!(error = %e, "skipping malformed SSE message"),
                },
                "error" => {
                    let _ = inbox.send(Err(TransportError::Stream(event.data)));
                }
                other => tracing::trace!(event = other, "ignoring SSE event"),
            }
        }
    }

    let _ = inbox.send(Err(TransportError::Closed("event stream ended".into())));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_events_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: endpoint\r\nda").is_empty());
        let events = decoder.feed(b"ta: /messages?session=1\r\n\r\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: "endpoint".into(),
                data: "/messages?session=1".into(),
                id: None,
            }]
        );
    }

    #[test]
    fn joins_multiline_data_and_defaults_event_type() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b": keepalive\nid: 7\ndata: {\"a\":\ndata: 1}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "{\"a\":\n1}");
        assert_eq!(events[0].id.as_deref(), Some("7"));
    }

    #[test]
    fn blank_line_without_data_dispatches_nothing() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: ping\n\n").is_empty());
        let events = decoder.feed(b"data: x\n\n");
        assert_eq!(events[0].event, "message");
    }

    #[test]
    fn oversized_line_is_skipped_across_chunks() {
        let mut decoder = SseDecoder::with_max_frame(16);
        assert!(decoder.feed(b"data: 0123456789abcdef").is_empty());
        assert!(decoder.feed(b"more bytes with no newline").is_empty());
        assert!(decoder.feed(b" end\n\ndata: ok\n").is_empty());
        let events = decoder.feed(b"\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "ok");
    }

    #[test]
    fn oversized_event_is_dropped() {
        let mut decoder = SseDecoder::with_max_frame(16);
        let events = decoder.feed(b"data: 0123456789\ndata: 0123456789\n\ndata: next\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "next");
    }

    #[test]
    fn batch_payloads_expand() {
        let messages = parse_payload(
            r#"[{"jsonrpc":"2.0","id":1,"result":{}},{"jsonrpc":"2.0","method":"n"}]"#,
        )
        .unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn invalid_header_is_config_error() {
        let mut headers = BTreeMap::new();
        headers.insert("bad header".to_string(), "v".to_string());
        assert!(matches!(
            header_map(&headers),
            Err(TransportError::InvalidConfig(_))
        ));
    }
}
