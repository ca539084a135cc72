//! A small MCP server exposing fixed tools, resources and prompts.
//!
//! Backs the `hubgate-echo-server` binary and the in-memory test transport.
//! Requests are handled concurrently so delayed calls can complete out of
//! order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::protocol::{
    INTERNAL_ERROR, INVALID_PARAMS, JSONRPC_VERSION, METHOD_NOT_FOUND, PARSE_ERROR,
    PROTOCOL_VERSION,
};

/// Error code for an unknown resource URI.
pub const RESOURCE_NOT_FOUND: i64 = -32002;

/// Counters shared by every instance cloned from one server.
#[derive(Debug, Default)]
pub struct EchoStats {
    initializations: AtomicUsize,
    requests: AtomicUsize,
}

impl EchoStats {
    pub fn initializations(&self) -> usize {
        self.initializations.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct EchoServer {
    stats: Arc<EchoStats>,
    stalled: Arc<AtomicBool>,
    protocol_version: String,
    groups: Vec<&'static str>,
    page_size: Option<usize>,
    failing_list: Option<&'static str>,
}

impl Default for EchoServer {
    fn default() -> Self {
        Self::new()
    }
}

impl EchoServer {
    pub fn new() -> Self {
        Self {
            stats: Arc::default(),
            stalled: Arc::default(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            groups: vec!["tools", "resources", "prompts"],
            page_size: None,
            failing_list: None,
        }
    }

    /// Answer `initialize` with this version regardless of what was proposed.
    #[must_use]
    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = version.into();
        self
    }

    /// Declare only the named capability groups.
    #[must_use]
    pub fn with_groups(mut self, groups: &[&'static str]) -> Self {
        self.groups = groups.to_vec();
        self
    }

    /// Split list results into pages of `size` items.
    #[must_use]
    pub const fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    /// Answer `<group>/list` with an internal error while still declaring
    /// the group in `initialize`.
    #[must_use]
    pub const fn with_failing_list(mut self, group: &'static str) -> Self {
        self.failing_list = Some(group);
        self
    }

    /// A copy with its own stall switch that still shares the counters.
    #[must_use]
    pub fn instance(&self) -> Self {
        Self {
            stalled: Arc::default(),
            ..self.clone()
        }
    }

    pub fn stats(&self) -> Arc<EchoStats> {
        Arc::clone(&self.stats)
    }

    /// While stalled the server reads requests but never answers them.
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled.load(Ordering::SeqCst)
    }

    /// Serve newline-delimited JSON-RPC until `reader` reaches EOF and every
    /// accepted request has been answered.
    ///
    /// Dropping the future aborts requests still in progress.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let writer = Arc::new(Mutex::new(writer));
        let mut lines = BufReader::new(reader).lines();
        let mut tasks = JoinSet::new();

        while let Some(line) = lines.next_line().await? {
            while tasks.try_join_next().is_some() {}
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            let server = self.clone();
            let writer = Arc::clone(&writer);
            tasks.spawn(async move {
                let outbound = match serde_json::from_str::<Value>(&line) {
                    Ok(message) => server.handle(&message).await,
                    Err(_) => vec![error(&Value::Null, PARSE_ERROR, "Parse error")],
                };
                let mut writer = writer.lock().await;
                for message in outbound {
                    let mut bytes = message.to_string().into_bytes();
                    bytes.push(b'\n');
                    if writer.write_all(&bytes).await.is_err() {
                        return;
                    }
                }
                let _ = writer.flush().await;
            });
        }
        while tasks.join_next().await.is_some() {}
        Ok(())
    }

    /// Handle one inbound message, returning whatever should be written back.
    pub async fn handle(&self, message: &Value) -> Vec<Value> {
        let Some(method) = message.get("method").and_then(Value::as_str) else {
            // Responses to our own requests are ignored.
            return Vec::new();
        };
        let Some(id) = message.get("id").cloned() else {
            return Vec::new();
        };
        self.stats.requests.fetch_add(1, Ordering::SeqCst);

        if self.is_stalled() {
            std::future::pending::<()>().await;
        }

        let params = message.get("params").cloned().unwrap_or(Value::Null);
        tracing::trace!(method, "echo server request");

        match method {
            "initialize" => {
                self.stats.initializations.fetch_add(1, Ordering::SeqCst);
                let capabilities: serde_json::Map<String, Value> = self
                    .groups
                    .iter()
                    .map(|group| ((*group).to_string(), json!({})))
                    .collect();
                vec![success(
                    &id,
                    json!({
                        "protocolVersion": self.protocol_version,
                        "serverInfo": {"name": "hubgate-echo-server", "version": env!("CARGO_PKG_VERSION")},
                        "capabilities": capabilities,
                    }),
                )]
            }
            "ping" => vec![success(&id, json!({}))],
            "tools/list" => vec![self.page(&id, &params, "tools", tools())],
            "resources/list" => vec![self.page(&id, &params, "resources", resources())],
            "prompts/list" => vec![self.page(&id, &params, "prompts", prompts())],
            "tools/call" => self.call_tool(&id, &params).await,
            "resources/read" => vec![read_resource(&id, &params)],
            "prompts/get" => vec![get_prompt(&id, &params)],
            other => vec![error(
                &id,
                METHOD_NOT_FOUND,
                &format!("Method not found: {other}"),
            )],
        }
    }

    fn page(&self, id: &Value, params: &Value, key: &str, items: Vec<Value>) -> Value {
        if self.failing_list == Some(key) {
            return error(id, INTERNAL_ERROR, &format!("{key} listing unavailable"));
        }
        let Some(size) = self.page_size else {
            return success(id, json!({ key: items }));
        };
        let start = params
            .get("cursor")
            .and_then(Value::as_str)
            .and_then(|c| c.parse::<usize>().ok())
            .unwrap_or(0);
        let end = (start + size).min(items.len());
        let page: Vec<Value> = items.get(start..end).map(<[Value]>::to_vec).unwrap_or_default();
        let mut result = json!({ key: page });
        if end < items.len() {
            result["nextCursor"] = json!(end.to_string());
        }
        success(id, result)
    }

    async fn call_tool(&self, id: &Value, params: &Value) -> Vec<Value> {
        let name = params.get("name").and_then(Value::as_str).unwrap_or("");
        let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        match name {
            "echo" => match args.get("message").and_then(Value::as_str) {
                Some(message) => vec![success(id, text_content(&format!("Echo: {message}")))],
                None => vec![error(id, INVALID_PARAMS, "Missing argument: message")],
            },
            "add" => {
                let a = args.get("a").and_then(Value::as_f64);
                let b = args.get("b").and_then(Value::as_f64);
                match (a, b) {
                    (Some(a), Some(b)) => {
                        let mut result = text_content(&format!("{}", a + b));
                        result["structuredContent"] = json!({ "sum": a + b });
                        vec![success(id, result)]
                    }
                    _ => vec![error(id, INVALID_PARAMS, "Arguments a and b must be numbers")],
                }
            }
            "greet" => match args.get("name").and_then(Value::as_str) {
                Some(who) => vec![success(id, text_content(&format!("Hello, {who}!")))],
                None => vec![error(id, INVALID_PARAMS, "Missing argument: name")],
            },
            "delay" => {
                let ms = args.get("ms").and_then(Value::as_u64).unwrap_or(0);
                let message = args
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("done")
                    .to_string();
                tokio::time::sleep(Duration::from_millis(ms)).await;
                vec![success(id, text_content(&message))]
            }
            "notify" => {
                let message = args.get("message").and_then(Value::as_str).unwrap_or("");
                vec![
                    json!({
                        "jsonrpc": JSONRPC_VERSION,
                        "method": "notifications/message",
                        "params": {"level": "info", "data": message},
                    }),
                    success(id, text_content("notified")),
                ]
            }
            "fail" => {
                let mut result = text_content("tool failed on purpose");
                result["isError"] = json!(true);
                vec![success(id, result)]
            }
            other => vec![error(id, INVALID_PARAMS, &format!("Unknown tool: {other}"))],
        }
    }
}

fn success(id: &Value, result: Value) -> Value {
    json!({"jsonrpc": JSONRPC_VERSION, "id": id, "result": result})
}

fn error(id: &Value, code: i64, message: &str) -> Value {
    json!({"jsonrpc": JSONRPC_VERSION, "id": id, "error": {"code": code, "message": message}})
}

fn text_content(text: &str) -> Value {
    json!({"content": [{"type": "text", "text": text}]})
}

fn tools() -> Vec<Value> {
    let text_arg = |name: &str, description: &str| {
        json!({
            "type": "object",
            "properties": {name: {"type": "string", "description": description}},
            "required": [name],
        })
    };
    vec![
        json!({"name": "echo", "description": "Echo back the input message",
               "inputSchema": text_arg("message", "Message to echo")}),
        json!({"name": "add", "description": "Add two numbers together",
               "inputSchema": {
                   "type": "object",
                   "properties": {
                       "a": {"type": "number", "description": "First number"},
                       "b": {"type": "number", "description": "Second number"},
                   },
                   "required": ["a", "b"],
               }}),
        json!({"name": "greet", "description": "Generate a greeting message",
               "inputSchema": text_arg("name", "Name to greet")}),
        json!({"name": "delay", "description": "Reply after a delay",
               "inputSchema": {
                   "type": "object",
                   "properties": {
                       "ms": {"type": "integer"},
                       "message": {"type": "string"},
                   },
               }}),
        json!({"name": "notify", "description": "Send a log notification, then reply",
               "inputSchema": text_arg("message", "Notification payload")}),
        json!({"name": "fail", "description": "Always reports a tool error",
               "inputSchema": {"type": "object"}}),
    ]
}

fn resources() -> Vec<Value> {
    vec![
        json!({"uri": "file://config.json", "name": "Configuration",
               "description": "Server configuration file", "mimeType": "application/json"}),
        json!({"uri": "file://data/sample.txt", "name": "Sample Data",
               "description": "Sample text data", "mimeType": "text/plain"}),
    ]
}

fn prompts() -> Vec<Value> {
    vec![
        json!({"name": "summarize", "description": "Summarize a given text",
               "arguments": [{"name": "text", "description": "Text to summarize", "required": true}]}),
        json!({"name": "translate", "description": "Translate text to another language",
               "arguments": [
                   {"name": "text", "description": "Text to translate", "required": true},
                   {"name": "target_language", "description": "Target language code", "required": true},
               ]}),
    ]
}

fn read_resource(id: &Value, params: &Value) -> Value {
    let uri = params.get("uri").and_then(Value::as_str).unwrap_or("");
    let (mime, text) = match uri {
        "file://config.json" => ("application/json", r#"{"mode":"echo"}"#),
        "file://data/sample.txt" => ("text/plain", "sample data"),
        _ => {
            return error(id, RESOURCE_NOT_FOUND, &format!("Resource not found: {uri}"));
        }
    };
    success(
        id,
        json!({"contents": [{"uri": uri, "mimeType": mime, "text": text}]}),
    )
}

fn get_prompt(id: &Value, params: &Value) -> Value {
    let name = params.get("name").and_then(Value::as_str).unwrap_or("");
    let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
    let text = args.get("text").and_then(Value::as_str).unwrap_or("");
    let (description, instruction) = match name {
        "summarize" => ("Summarize a given text", format!("Summarize: {text}")),
        "translate" => {
            let target = args
                .get("target_language")
                .and_then(Value::as_str)
                .unwrap_or("en");
            (
                "Translate text to another language",
                format!("Translate to {target}: {text}"),
            )
        }
        other => return error(id, INVALID_PARAMS, &format!("Unknown prompt: {other}")),
    };
    success(
        id,
        json!({
            "description": description,
            "messages": [{"role": "user", "content": {"type": "text", "text": instruction}}],
        }),
    )
}
