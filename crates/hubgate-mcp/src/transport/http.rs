//! Streamable HTTP transport.
//!
//! Every outbound message is a `POST`. The server answers with a JSON body,
//! an event-stream body, or `202 Accepted` for notifications. Responses are
//! queued for `receive` so the session reader handles them like any other
//! transport.

use std::collections::BTreeMap;

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap};
use reqwest::{StatusCode, Url};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use super::TransportError;
use super::sse::{SseDecoder, header_map, parse_payload};
use crate::protocol::JsonRpcMessage;

const SESSION_HEADER: &str = "mcp-session-id";

type Inbound = Result<JsonRpcMessage, TransportError>;

#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: Url,
    headers: HeaderMap,
    session_id: std::sync::Mutex<Option<String>>,
    inbox_tx: mpsc::UnboundedSender<Inbound>,
    inbox_rx: Mutex<mpsc::UnboundedReceiver<Inbound>>,
    closed: CancellationToken,
}

impl HttpTransport {
    pub fn new(
        client: reqwest::Client,
        url: &str,
        headers: &BTreeMap<String, String>,
    ) -> Result<Self, TransportError> {
        let url = Url::parse(url)
            .map_err(|e| TransportError::InvalidConfig(format!("invalid URL {url}: {e}")))?;
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Ok(Self {
            client,
            url,
            headers: header_map(headers)?,
            session_id: std::sync::Mutex::new(None),
            inbox_tx,
            inbox_rx: Mutex::new(inbox_rx),
            closed: CancellationToken::new(),
        })
    }

    fn session_id(&self) -> Option<String> {
        self.session_id.lock().ok().and_then(|guard| guard.clone())
    }

    pub async fn send(&self, message: &JsonRpcMessage) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed("transport closed".into()));
        }

        let mut request = self
            .client
            .post(self.url.clone())
            .headers(self.headers.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .json(message);
        if let Some(session_id) = self.session_id() {
            request = request.header(SESSION_HEADER, session_id);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: self.url.to_string(),
                status: status.as_u16(),
            });
        }

        if let Some(id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            if let Ok(mut guard) = self.session_id.lock() {
                *guard = Some(id.to_string());
            }
        }

        if status == StatusCode::ACCEPTED || status == StatusCode::NO_CONTENT {
            return Ok(());
        }

        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        if is_stream {
            tokio::spawn(drain_event_stream(
                response,
                self.inbox_tx.clone(),
                self.closed.clone(),
            ));
            return Ok(());
        }

        let body = response.bytes().await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }
        let text = String::from_utf8_lossy(&body);
        for message in parse_payload(&text)? {
            let _ = self.inbox_tx.send(Ok(message));
        }
        Ok(())
    }

    pub async fn receive(&self) -> Result<JsonRpcMessage, TransportError> {
        let mut inbox = self.inbox_rx.lock().await;
        tokio::select! {
            biased;
            next = inbox.recv() => next.unwrap_or_else(|| {
                Err(TransportError::Closed("transport closed".into()))
            }),
            () = self.closed.cancelled() => Err(TransportError::Closed("transport closed".into())),
        }
    }

    /// Stop receiving and end the server-side session if one was assigned.
    pub async fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();
        if let Some(session_id) = self.session_id() {
            let result = self
                .client
                .delete(self.url.clone())
                .headers(self.headers.clone())
                .header(SESSION_HEADER, session_id)
                .send()
                .await;
            if let Err(e) = result {
                tracing::debug!(url = %self.url, error = %e, "session DELETE failed");
            }
        }
    }
}

async fn drain_event_stream(
    response: reqwest::Response,
    inbox: mpsc::UnboundedSender<Inbound>,
    closed: CancellationToken,
) {
    let mut decoder = SseDecoder::new();
    let mut body = response.bytes_stream();
    loop {
        let chunk = tokio::select! {
            () = closed.cancelled() => return,
            chunk = body.next() => chunk,
        };
        match chunk {
            Some(Ok(chunk)) => {
                for event in decoder.feed(&chunk) {
                    if event.event != "message" {
                        continue;
                    }
                    match parse_payload(&event.data) {
                        Ok(messages) => {
                            for message in messages {
                                let _ = inbox.send(Ok(message));
                            }
                        }
                        Err(e) => tracing::debug!(error = %e, "skipping malformed SSE message"),
                    }
                }
            }
            Some(Err(e)) => {
                tracing::debug!(error = %e, "response stream failed");
                return;
            }
            None => return,
        }
    }
}
