//! Harbor - asynchronous HTTP/1.x engine
//!
//! Server-side connection handling and a pooling HTTP client over tokio.

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod server;
