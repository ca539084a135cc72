//! Reference capability server speaking line-delimited JSON-RPC on stdio.
//!
//! Set `HUBGATE_ECHO_PROTOCOL_VERSION` to answer `initialize` with another version.

use hubgate_mcp::echo::EchoServer;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let server = match std::env::var("HUBGATE_ECHO_PROTOCOL_VERSION") {
        Ok(version) => EchoServer::new().with_protocol_version(version),
        Err(_) => EchoServer::new(),
    };
    server.serve(tokio::io::stdin(), tokio::io::stdout()).await
}
