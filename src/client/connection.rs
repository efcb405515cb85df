//! Outbound connections.
//!
//! A [`ClientConnection`] owns one transport to one destination and can send
//! any number of sequential requests over it. Transports are produced by a
//! [`Connector`]; the plain TCP one lives here, encrypted ones plug in
//! through the same trait.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::{Buf, Bytes, BytesMut};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::client::request::ClientRequest;
use crate::client::response::ClientResponse;
use crate::error::{ClientError, Result};
use crate::http::request::{Header, Method};

/// Default buffer size for response reads
const BUFFER_SIZE: usize = 8192;

/// Upper bound on a response head.
const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Default upper bound on a response body, however it is delimited.
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Headers the connection manages itself; caller copies are not forwarded.
const MANAGED_HEADERS: [&str; 5] = [
    "Host",
    "Content-Length",
    "Transfer-Encoding",
    "Connection",
    "Proxy-Connection",
];

static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// A byte stream a client connection can run over.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + Sync {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send + Sync {}

/// Establishes transports for a scheme family.
pub trait Connector: Send + Sync + 'static {
    /// Whether this connector can reach URLs with `scheme`.
    fn supports(&self, scheme: &str) -> bool;

    fn connect(&self, key: &ConnectionKey, addr: SocketAddr)
    -> BoxFuture<'static, io::Result<Box<dyn Transport>>>;
}

/// Plain TCP, serving `http` URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn supports(&self, scheme: &str) -> bool {
        scheme == "http"
    }

    fn connect(&self, _key: &ConnectionKey, addr: SocketAddr)
    -> BoxFuture<'static, io::Result<Box<dyn Transport>>> {
        async move {
            let stream = TcpStream::connect(addr).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream) as Box<dyn Transport>)
        }
        .boxed()
    }
}

/// Destination a connection is bound to. Pooled connections are looked up
/// by this key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl ConnectionKey {
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// One outbound connection.
pub struct ClientConnection {
    id: u64,
    key: ConnectionKey,
    addr: SocketAddr,
    stream: Box<dyn Transport>,
    via_proxy: bool,
    reusable: bool,
    buffer: BytesMut,
    max_body_bytes: usize,
    idle_since: Instant,
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("addr", &self.addr)
            .field("via_proxy", &self.via_proxy)
            .field("reusable", &self.reusable)
            .finish()
    }
}

impl ClientConnection {
    pub fn new(key: ConnectionKey, addr: SocketAddr, stream: Box<dyn Transport>, via_proxy: bool) -> Self {
        Self {
            id: CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            key,
            addr,
            stream,
            via_proxy,
            reusable: true,
            buffer: BytesMut::with_capacity(BUFFER_SIZE),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            idle_since: Instant::now(),
        }
    }

    /// Caps the size of response bodies read on this connection.
    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// Process-unique identifier, stable for the connection's lifetime.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn via_proxy(&self) -> bool {
        self.via_proxy
    }

    /// Whether the last exchange left the connection in a state where another
    /// request may be sent on it.
    pub fn is_reusable(&self) -> bool {
        self.reusable
    }

    pub fn idle_for(&self) -> Duration {
        self.idle_since.elapsed()
    }

    /// Checks, without waiting, whether an idle connection can still carry a
    /// request. A peer that closed the socket or sent unsolicited bytes
    /// makes the connection stale.
    pub fn is_stale(&mut self) -> bool {
        if !self.buffer.is_empty() {
            return true;
        }
        match self.stream.read_buf(&mut self.buffer).now_or_never() {
            None => false,
            Some(Ok(0)) => true,
            Some(Ok(n)) => {
                tracing::debug!(conn = self.id, bytes = n, "unsolicited data on idle connection");
                true
            }
            Some(Err(e)) => {
                tracing::debug!(conn = self.id, error = %e, "idle connection failed");
                true
            }
        }
    }

    pub(crate) fn mark_idle(&mut self) {
        self.idle_since = Instant::now();
    }

    /// Sends `request` and reads the complete response.
    ///
    /// The connection only counts as reusable again once the whole response
    /// has been read, so an exchange that fails or is abandoned half way
    /// leaves it marked unusable.
    pub async fn send(&mut self, request: &ClientRequest) -> Result<ClientResponse> {
        self.reusable = false;

        let bytes = self.build_http_request(request)?;
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;

        tracing::trace!(conn = self.id, method = %request.method, url = %request.url, "request sent");

        let response = self.read_http_response(request.method).await?;
        tracing::debug!(
            conn = self.id,
            status = response.status,
            reusable = self.reusable,
            "response received"
        );
        Ok(response)
    }

    /// Serializes the request head and body.
    pub fn build_http_request(&self, request: &ClientRequest) -> Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(256 + request.body.len());

        let target = if self.via_proxy {
            request.absolute_form()
        } else {
            request.origin_form()
        };
        buffer.extend_from_slice(format!("{} {} HTTP/1.1\r\n", request.method, target).as_bytes());

        let host = match request.header("Host") {
            Some(host) => host.to_string(),
            None => request.authority()?,
        };
        buffer.extend_from_slice(format!("Host: {}\r\n", host).as_bytes());

        for header in &request.headers {
            if MANAGED_HEADERS.iter().any(|name| header.is(name)) {
                continue;
            }
            buffer.extend_from_slice(format!("{}: {}\r\n", header.name, header.value).as_bytes());
        }

        if !request.body.is_empty() || request.method.expects_body() {
            buffer.extend_from_slice(format!("Content-Length: {}\r\n", request.body.len()).as_bytes());
        }

        // End of headers
        buffer.extend_from_slice(b"\r\n");
        buffer.extend_from_slice(&request.body);

        Ok(buffer)
    }

    async fn read_http_response(&mut self, method: Method) -> Result<ClientResponse> {
        loop {
            let head = self.read_head().await?;
            let (status, reason, version, headers) = parse_response_head(&head)?;

            // Interim responses (100 Continue etc.) precede the real one.
            if (100..200).contains(&status) && status != 101 {
                continue;
            }

            let mut response = ClientResponse {
                status,
                reason,
                version,
                headers,
                body: Bytes::new(),
            };

            let delimited = self.read_response_body(method, &mut response).await?;
            let close_requested = response
                .header("Connection")
                .is_some_and(|v| v.eq_ignore_ascii_case("close"));

            self.reusable = delimited
                && !close_requested
                && response.version == "HTTP/1.1"
                && status != 101
                && self.buffer.is_empty();
            return Ok(response);
        }
    }

    async fn read_head(&mut self) -> Result<BytesMut> {
        let mut searched = 0;
        loop {
            if let Some(pos) = self.buffer[searched..]
                .windows(4)
                .position(|window| window == b"\r\n\r\n")
            {
                return Ok(self.buffer.split_to(searched + pos + 4));
            }
            searched = self.buffer.len().saturating_sub(3);

            // Prevent unbounded header growth
            if self.buffer.len() > MAX_HEAD_BYTES {
                return Err(ClientError::InvalidResponse("response head too large".into()));
            }

            self.fill().await?;
        }
    }

    /// Reads the body into `response`. Returns whether the body was
    /// delimited, i.e. whether the connection is positioned at the next
    /// response afterwards.
    async fn read_response_body(&mut self, method: Method, response: &mut ClientResponse) -> Result<bool> {
        if method == Method::HEAD || response.status == 204 || response.status == 304 {
            return Ok(true);
        }

        let chunked = response
            .header("Transfer-Encoding")
            .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"));
        if chunked {
            response.body = self.read_chunked_body().await?;
            return Ok(true);
        }

        if let Some(value) = response.header("Content-Length") {
            let length: usize = value
                .trim()
                .parse()
                .map_err(|_| ClientError::InvalidResponse(format!("bad Content-Length: {}", value)))?;
            self.check_body_size(length)?;
            response.body = self.read_exact_body(length).await?;
            return Ok(true);
        }

        // No Content-Length, read until connection closes
        loop {
            self.check_body_size(self.buffer.len())?;
            self.buffer.reserve(BUFFER_SIZE);
            match self.stream.read_buf(&mut self.buffer).await? {
                0 => break,
                _ => continue,
            }
        }
        self.check_body_size(self.buffer.len())?;
        response.body = self.buffer.split().freeze();
        Ok(false)
    }

    fn check_body_size(&self, length: usize) -> Result<()> {
        if length > self.max_body_bytes {
            return Err(ClientError::InvalidResponse(format!(
                "response body exceeds {} bytes",
                self.max_body_bytes
            )));
        }
        Ok(())
    }

    async fn read_exact_body(&mut self, length: usize) -> Result<Bytes> {
        while self.buffer.len() < length {
            self.fill().await?;
        }
        Ok(self.buffer.split_to(length).freeze())
    }

    async fn read_chunked_body(&mut self) -> Result<Bytes> {
        let mut body = BytesMut::new();
        loop {
            let line = self.read_line().await?;
            let size = std::str::from_utf8(&line)
                .ok()
                .and_then(|l| l.split(';').next())
                .and_then(|s| usize::from_str_radix(s.trim(), 16).ok())
                .ok_or_else(|| ClientError::InvalidResponse("bad chunk size".into()))?;

            if size == 0 {
                // Trailer section ends with an empty line.
                while !self.read_line().await?.is_empty() {}
                return Ok(body.freeze());
            }

            self.check_body_size(body.len().saturating_add(size))?;
            let chunk = self.read_exact_body(size).await?;
            body.extend_from_slice(&chunk);
            if !self.read_line().await?.is_empty() {
                return Err(ClientError::InvalidResponse("missing CRLF after chunk".into()));
            }
        }
    }

    /// Reads one CRLF-terminated line, without the terminator.
    async fn read_line(&mut self) -> Result<Bytes> {
        loop {
            if let Some(pos) = self.buffer.windows(2).position(|w| w == b"\r\n") {
                let line = self.buffer.split_to(pos).freeze();
                self.buffer.advance(2);
                return Ok(line);
            }
            self.fill().await?;
        }
    }

    async fn fill(&mut self) -> Result<()> {
        self.buffer.reserve(BUFFER_SIZE);
        match self.stream.read_buf(&mut self.buffer).await? {
            0 => Err(ClientError::ConnectionClosed),
            _ => Ok(()),
        }
    }

    /// Shuts the transport down. Errors are ignored; the connection is
    /// finished either way.
    pub async fn close(mut self) {
        let _ = self.stream.shutdown().await;
    }
}

fn parse_response_head(head: &[u8]) -> Result<(u16, String, String, Vec<Header>)> {
    let text = std::str::from_utf8(head)
        .map_err(|_| ClientError::InvalidResponse("response head is not UTF-8".into()))?;

    let mut lines = text.split("\r\n");

    // Parse status line
    let status_line = lines
        .next()
        .ok_or_else(|| ClientError::InvalidResponse("empty response".into()))?;
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(ClientError::InvalidResponse(format!("invalid status line: {}", status_line)));
    }
    let status = parts
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .filter(|s| (100..1000).contains(s))
        .ok_or_else(|| ClientError::InvalidResponse(format!("invalid status line: {}", status_line)))?;
    let reason = parts.next().unwrap_or_default().to_string();

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| ClientError::InvalidResponse(format!("malformed header: {}", line)))?;
        headers.push(Header::new(key.trim(), value.trim()));
    }

    Ok((status, reason, version.to_string(), headers))
}
