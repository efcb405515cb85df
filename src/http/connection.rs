use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::http::handler::Handler;
use crate::http::parser::{ParseResult, RequestParser};
use crate::http::request::{Method, Request};
use crate::http::response::{Response, StatusCode};
use crate::http::writer::ResponseWriter;

/// Lifecycle of a server connection. One request is served per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the first bytes of the request.
    Reading,
    /// Request head partially received; more reads are needed.
    ParsingHeaders,
    /// Head complete, reading the declared Content-Length.
    AwaitingBody,
    /// Request complete, handler about to run.
    Dispatching,
    /// Response is being written.
    Writing,
    /// Response sent, closing the socket.
    ShuttingDown,
    Closed,
}

/// One accepted socket and everything needed to serve its request.
///
/// The connection is driven by a single task (see [`ServerConnection::start`]),
/// which owns it outright. Reads, parsing, the handler call and the write
/// therefore run strictly one after another and no locking is needed.
/// The connection is dropped as soon as the task finishes.
pub struct ServerConnection<S, H> {
    stream: S,
    handler: Arc<H>,
    peer: Option<SocketAddr>,
    buffer: Box<[u8]>,
    filled: usize,
    parser: RequestParser,
    request: Request,
    response: Response,
    expected_body: usize,
    max_body_bytes: usize,
    state: ConnectionState,
}

impl<S, H> ServerConnection<S, H>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    H: Handler,
{
    pub fn new(stream: S, handler: Arc<H>, config: &ServerConfig) -> Self {
        Self {
            stream,
            handler,
            peer: None,
            buffer: vec![0u8; config.read_buffer_size.max(1)].into_boxed_slice(),
            filled: 0,
            parser: RequestParser::new(config.max_header_bytes),
            request: Request::default(),
            response: Response::default(),
            expected_body: 0,
            max_body_bytes: config.max_body_bytes,
            state: ConnectionState::Reading,
        }
    }

    /// Records the remote address for log output.
    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Spawns the connection onto the current runtime.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Drives the connection until it is closed.
    pub async fn run(mut self) {
        while self.state != ConnectionState::Closed {
            self.state = self.step().await;
            tracing::trace!(peer = ?self.peer, state = ?self.state, "connection state");
        }
    }

    async fn step(&mut self) -> ConnectionState {
        match self.state {
            ConnectionState::Reading | ConnectionState::ParsingHeaders => {
                match self.read_some().await {
                    Some(_) => self.parse_headers(),
                    None => ConnectionState::Closed,
                }
            }

            ConnectionState::AwaitingBody => match self.read_some().await {
                Some(n) => self.append_body(0, n),
                None => ConnectionState::Closed,
            },

            ConnectionState::Dispatching => {
                self.handler.handle(&self.request, &mut self.response);
                if self.request.method == Method::HEAD {
                    self.strip_body();
                }
                ConnectionState::Writing
            }

            ConnectionState::Writing => {
                let mut writer = ResponseWriter::new(&self.response);
                match writer.write_to_stream(&mut self.stream).await {
                    Ok(()) => ConnectionState::ShuttingDown,
                    Err(e) => {
                        self.report(&format!("write failed: {}", e));
                        ConnectionState::Closed
                    }
                }
            }

            ConnectionState::ShuttingDown => {
                // Best effort; the socket is dropped right after anyway.
                let _ = self.stream.shutdown().await;
                ConnectionState::Closed
            }

            ConnectionState::Closed => ConnectionState::Closed,
        }
    }

    /// Reads into the fixed buffer. `None` means the connection is finished,
    /// either because the peer closed it or because the read failed.
    async fn read_some(&mut self) -> Option<usize> {
        match self.stream.read(&mut self.buffer).await {
            Ok(0) => {
                if self.state != ConnectionState::Reading {
                    self.report("peer closed connection mid-request");
                }
                None
            }
            Ok(n) => {
                self.filled = n;
                Some(n)
            }
            Err(e) => {
                self.report(&format!("read failed: {}", e));
                None
            }
        }
    }

    fn parse_headers(&mut self) -> ConnectionState {
        let result = self
            .parser
            .parse_headers(&mut self.request, &self.buffer[..self.filled]);

        match result {
            ParseResult::Incomplete => ConnectionState::ParsingHeaders,
            ParseResult::Failed(e) => {
                tracing::debug!(peer = ?self.peer, error = %e, "rejecting malformed request");
                self.reject(StatusCode::BadRequest)
            }
            ParseResult::Complete { consumed } => self.resolve_content_length(consumed),
        }
    }

    fn resolve_content_length(&mut self, consumed: usize) -> ConnectionState {
        if !self.request.method.expects_body() {
            return ConnectionState::Dispatching;
        }

        let length = match self.request.content_length() {
            Some(Ok(length)) => length,
            Some(Err(e)) => {
                tracing::debug!(peer = ?self.peer, error = %e, "invalid Content-Length");
                return self.reject(StatusCode::BadRequest);
            }
            None => {
                tracing::debug!(peer = ?self.peer, method = %self.request.method, "missing Content-Length");
                return self.reject(StatusCode::BadRequest);
            }
        };

        if length == 0 {
            return ConnectionState::Dispatching;
        }
        if length > self.max_body_bytes {
            tracing::debug!(peer = ?self.peer, length, limit = self.max_body_bytes, "request body too large");
            return self.reject(StatusCode::PayloadTooLarge);
        }

        self.expected_body = length;
        // Grows with the data actually received, never on the declaration alone.
        self.request.body.reserve(length.min(self.buffer.len()));
        // Bytes after the header terminator in this read are the start of the body.
        self.append_body(consumed, self.filled)
    }

    /// Appends `buffer[from..to]` to the body, never past the declared length.
    fn append_body(&mut self, from: usize, to: usize) -> ConnectionState {
        let missing = self.expected_body - self.request.body.len();
        let take = (to - from).min(missing);
        self.request
            .body
            .extend_from_slice(&self.buffer[from..from + take]);

        if self.request.body.len() >= self.expected_body {
            ConnectionState::Dispatching
        } else {
            ConnectionState::AwaitingBody
        }
    }

    fn reject(&mut self, status: StatusCode) -> ConnectionState {
        self.response = Response::stock_reply(status);
        ConnectionState::Writing
    }

    /// HEAD responses carry the headers a GET would have, without the body.
    fn strip_body(&mut self) {
        if self.response.header("Content-Length").is_none() && !self.response.status.forbids_body() {
            let length = self.response.body_len();
            self.response.set_header("Content-Length", length.to_string());
        }
        self.response.body.clear();
    }

    fn report(&self, message: &str) {
        tracing::debug!(peer = ?self.peer, state = ?self.state, "{}", message);
        self.handler.log(message);
    }
}
