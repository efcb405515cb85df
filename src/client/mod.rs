//! HTTP client with connection pooling.
//!
//! - **`client`**: verb operations returning [`ResponseFuture`]s
//! - **`manager`**: connection pooling, address caching and proxy override
//! - **`connection`**: a single outbound connection and its transports
//! - **`resolver`**: host name resolution
//! - **`options`**, **`request`**, **`response`**: value types

#[allow(clippy::module_inception)]
pub mod client;
pub mod connection;
pub mod manager;
pub mod options;
pub mod request;
pub mod resolver;
pub mod response;

pub use client::{Client, ResponseFuture};
pub use connection::{ClientConnection, ConnectionKey, Connector, TcpConnector, Transport};
pub use manager::{ConnectionManager, ManagerConfig, PlainConnectionManager, PooledConnection, PooledConnectionManager};
pub use options::{ClientOptions, RequestOptions};
pub use request::ClientRequest;
pub use response::ClientResponse;
pub use resolver::{DnsResolver, Resolver};
