//! TCP front end: accepts sockets and hands each to a server connection.

pub mod listener;

pub use listener::Server;
