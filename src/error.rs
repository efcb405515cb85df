use std::io;

/// Errors produced by the HTTP client and its connection manager.
///
/// Every variant is terminal for the request that produced it; nothing in
/// the client retries on its own.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Address resolution for the target host failed.
    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    /// The TCP connection could not be established.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: std::net::SocketAddr,
        #[source]
        source: io::Error,
    },

    /// I/O error on an established connection.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The request did not finish within its timeout.
    #[error("request timed out")]
    Timeout,

    /// Invalid or incomplete request URL.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// No transport is registered for the URL scheme.
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// The server sent something that is not a valid HTTP/1.x response.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The server closed the connection before the response was complete.
    #[error("connection closed")]
    ConnectionClosed,

    /// The redirect limit was reached.
    #[error("too many redirects (limit {0})")]
    TooManyRedirects(usize),

    /// The request task was cancelled or panicked.
    #[error("request task failed: {0}")]
    Runtime(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
