//! Minimal embedded XML-RPC server.
//!
//! Serves HTTP/1.1 POST on a tokio accept loop, one task per connection,
//! dispatching `<methodCall>` documents to registered async handlers. Built
//! for the node slave API: small payloads, one call per connection, no
//! keep-alive.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use roslink_types::RosError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::value::{RpcValue, decode_request, encode_fault, encode_response};

/// Async handler for one RPC method.
pub type Handler =
    Arc<dyn Fn(Vec<RpcValue>) -> BoxFuture<'static, Result<RpcValue, RosError>> + Send + Sync>;

/// Collects handlers, then binds and serves.
#[derive(Default)]
pub struct RpcServerBuilder {
    handlers: HashMap<String, Handler>,
}

impl RpcServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `method`.
    pub fn register<F>(mut self, method: &str, handler: F) -> Self
    where
        F: Fn(Vec<RpcValue>) -> BoxFuture<'static, Result<RpcValue, RosError>>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.insert(method.to_string(), Arc::new(handler));
        self
    }

    /// Bind to a free port on `host` and start serving. The accept loop
    /// runs until the returned [`RpcServer`] is dropped.
    pub async fn bind(self, host: &str) -> Result<RpcServer, RosError> {
        let listener = TcpListener::bind((host, 0)).await?;
        let addr = listener.local_addr()?;
        let handlers = Arc::new(self.handlers);

        let accept_handlers = handlers.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let handlers = accept_handlers.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, &handlers).await {
                                debug!(peer = %peer, error = %e, "rpc connection error");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "rpc accept error");
                    }
                }
            }
        });

        Ok(RpcServer { addr, accept_task })
    }
}

/// A bound, serving XML-RPC endpoint. Dropping it stops the accept loop and
/// refuses further connections.
#[derive(Debug)]
pub struct RpcServer {
    addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl RpcServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The `http://host:port/` form peers are given.
    pub fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    handlers: &HashMap<String, Handler>,
) -> Result<(), RosError> {
    let body = read_http_request(&mut stream).await?;
    let xml = match decode_request(&body) {
        Ok((method, params)) => match handlers.get(&method) {
            Some(handler) => match handler(params).await {
                Ok(value) => encode_response(&value),
                Err(e) => encode_fault(1, &e.to_string()),
            },
            None => encode_fault(-1, &format!("unknown method '{method}'")),
        },
        Err(e) => encode_fault(-2, &e.to_string()),
    };

    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        xml.len(),
        xml
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Read one HTTP request and return its body. Only POST with a
/// Content-Length is accepted, which is all XML-RPC clients send.
async fn read_http_request(stream: &mut TcpStream) -> Result<String, RosError> {
    let mut buf = Vec::with_capacity(1024);
    let header_end = loop {
        let mut chunk = [0u8; 1024];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(RosError::Rpc("connection closed mid-request".to_string()));
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
        if buf.len() > 64 * 1024 {
            return Err(RosError::Rpc("http header too large".to_string()));
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]);
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .ok_or_else(|| RosError::Rpc("missing content-length".to_string()))?;

    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < content_length {
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(RosError::Rpc("connection closed mid-body".to_string()));
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);
    String::from_utf8(body).map_err(|e| RosError::Rpc(format!("non-utf8 body: {e}")))
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}
