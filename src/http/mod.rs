//! HTTP server-side protocol handling.
//!
//! # Architecture
//!
//! - **`connection`**: per-connection state machine driving one request/response exchange
//! - **`parser`**: incremental request-head parser, resumable across reads
//! - **`request`**: HTTP request representation
//! - **`response`**: HTTP response representation with segmented body and builder
//! - **`writer`**: serializes responses into wire buffers and writes them out
//! - **`handler`**: the user callback invoked with each complete request
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← first read
//!        └──────┬──────┘
//!               ▼
//!        ┌────────────────┐  incomplete: read again
//!        │ ParsingHeaders │ ◄──────┐
//!        └──────┬─────────┴────────┘
//!               │ malformed / bad Content-Length → 400 ─────────┐
//!               │ Content-Length over the limit → 413 ──────────┤
//!               │ head complete                                 │
//!               ├─ POST/PUT/PATCH, length > 0 ─► AwaitingBody   │
//!               ▼                                   │           │
//!        ┌──────────────┐ ◄─────────────────────────┘           │
//!        │ Dispatching  │ ← handler fills the response          │
//!        └──────┬───────┘                                       │
//!               ▼                                               │
//!        ┌──────────────┐ ◄─────────────────────────────────────┘
//!        │   Writing    │ ── error ─► Closed
//!        └──────┬───────┘
//!               ▼
//!        ShuttingDown ─► Closed
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use harbor::config::ServerConfig;
//! use harbor::http::connection::ServerConnection;
//! use harbor::http::{Request, Response};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::default();
//!     let listener = TcpListener::bind(&config.listen_addr).await?;
//!     let handler = Arc::new(|_req: &Request, res: &mut Response| {
//!         res.append_body("hello\n");
//!     });
//!
//!     loop {
//!         let (socket, peer) = listener.accept().await?;
//!         ServerConnection::new(socket, handler.clone(), &config)
//!             .with_peer(peer)
//!             .start();
//!     }
//! }
//! ```

pub mod connection;
pub mod handler;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;

pub use connection::{ConnectionState, ServerConnection};
pub use handler::Handler;
pub use parser::{ParseError, ParseResult, RequestParser};
pub use request::{ContentLengthError, Header, Method, Request, RequestBuilder};
pub use response::{Response, ResponseBuilder, StatusCode};
