//! Client connection management.
//!
//! A [`ConnectionManager`] hands out connections for requests. The pooled
//! implementation keeps idle connections per destination, caches resolved
//! addresses when asked to, and substitutes a proxy for the destination
//! when the request options enable it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::runtime::Handle;
use url::Url;

use crate::client::connection::{ClientConnection, ConnectionKey, Connector, TcpConnector};
use crate::client::options::ClientOptions;
use crate::client::request::ClientRequest;
use crate::client::resolver::{DnsResolver, Resolver};
use crate::client::response::ClientResponse;
use crate::error::{ClientError, Result};

/// Source of connections for the client.
///
/// Implementations must never hand the same connection to two callers at
/// once: a connection belongs to whoever holds the [`PooledConnection`]
/// until that handle is dropped.
pub trait ConnectionManager: Send + Sync {
    /// Returns a connection able to carry `request`. Any new socket is
    /// established on `runtime`.
    fn get_connection<'a>(
        &'a self,
        runtime: &'a Handle,
        request: &'a ClientRequest,
        options: &'a ClientOptions,
    ) -> BoxFuture<'a, Result<PooledConnection>>;

    /// Forgets every cached address. Pooled connections stay.
    fn clear_resolved_cache(&self);

    /// Closes all pooled connections and clears the address cache.
    /// Connections checked out at the time of the call are not pooled again.
    fn reset(&self);
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Where connections go when a request enables the proxy.
    pub proxy: Option<Url>,
    pub max_idle_per_host: usize,
    /// Idle connections older than this are closed instead of reused.
    pub idle_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            max_idle_per_host: 8,
            idle_timeout: Duration::from_secs(90),
        }
    }
}

#[derive(Default)]
struct PoolState {
    idle: HashMap<ConnectionKey, Vec<ClientConnection>>,
    resolved: HashMap<(String, u16), SocketAddr>,
    /// Bumped by reset; connections from an older generation never return.
    generation: u64,
}

/// Idle connections and resolved addresses, shared between a manager and
/// the handles it gave out.
struct Pool {
    state: Mutex<PoolState>,
    max_idle_per_host: usize,
    idle_timeout: Duration,
}

impl Pool {
    fn new(config: &ManagerConfig) -> Self {
        Self {
            state: Mutex::new(PoolState::default()),
            max_idle_per_host: config.max_idle_per_host,
            idle_timeout: config.idle_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Removes an idle connection for `key` that has not outlived the idle
    /// timeout. Liveness is checked by the caller, outside the lock.
    fn checkout(&self, key: &ConnectionKey) -> Option<(ClientConnection, u64)> {
        let mut state = self.lock();
        let generation = state.generation;
        let idle = state.idle.get_mut(key)?;

        while let Some(conn) = idle.pop() {
            if conn.idle_for() > self.idle_timeout {
                tracing::debug!(conn = conn.id(), key = %key, "dropping stale idle connection");
                continue;
            }
            return Some((conn, generation));
        }
        None
    }

    fn checkin(&self, mut conn: ClientConnection, generation: u64) {
        if !conn.is_reusable() {
            tracing::trace!(conn = conn.id(), "discarding non-reusable connection");
            return;
        }

        let mut state = self.lock();
        if state.generation != generation {
            tracing::trace!(conn = conn.id(), "discarding connection from before reset");
            return;
        }

        let idle = state.idle.entry(conn.key().clone()).or_default();
        if idle.len() >= self.max_idle_per_host {
            tracing::trace!(conn = conn.id(), "idle pool full, closing connection");
            return;
        }

        conn.mark_idle();
        idle.push(conn);
    }

    fn cached_addr(&self, host: &str, port: u16) -> Option<SocketAddr> {
        self.lock().resolved.get(&(host.to_string(), port)).copied()
    }

    fn cache_addr(&self, host: &str, port: u16, addr: SocketAddr) {
        self.lock().resolved.insert((host.to_string(), port), addr);
    }

    fn clear_resolved(&self) {
        self.lock().resolved.clear();
    }

    fn reset(&self) {
        let mut state = self.lock();
        state.generation += 1;
        state.idle.clear();
        state.resolved.clear();
    }

    fn idle_count(&self) -> usize {
        self.lock().idle.values().map(Vec::len).sum()
    }
}

/// Exclusive handle to a connection from a pool.
///
/// Dropping the handle returns the connection to its pool if the last
/// exchange completed cleanly, otherwise the connection is closed.
#[derive(Debug)]
pub struct PooledConnection {
    conn: Option<ClientConnection>,
    generation: u64,
    pool: Weak<Pool>,
    reused: bool,
}

impl PooledConnection {
    fn new(conn: ClientConnection, generation: u64, pool: &Arc<Pool>, reused: bool) -> Self {
        Self {
            conn: Some(conn),
            generation,
            pool: Arc::downgrade(pool),
            reused,
        }
    }

    pub fn connection(&self) -> Option<&ClientConnection> {
        self.conn.as_ref()
    }

    /// Whether the connection came out of the idle pool.
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    pub async fn send(&mut self, request: &ClientRequest) -> Result<ClientResponse> {
        match self.conn.as_mut() {
            Some(conn) => conn.send(request).await,
            None => Err(ClientError::ConnectionClosed),
        }
    }

    /// Closes the connection instead of returning it to the pool.
    pub async fn discard(mut self) {
        if let Some(conn) = self.conn.take() {
            conn.close().await;
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let (Some(conn), Some(pool)) = (self.conn.take(), self.pool.upgrade()) {
            pool.checkin(conn, self.generation);
        }
    }
}

/// Connection manager that pools connections per (scheme, host, port).
///
/// The transport is chosen by the [`Connector`]: [`TcpConnector`] gives
/// plain HTTP, an encrypting connector gives HTTPS through the same code.
pub struct PooledConnectionManager<C = TcpConnector, R = DnsResolver> {
    connector: C,
    resolver: R,
    proxy: Option<Url>,
    pool: Arc<Pool>,
}

/// Pooled manager over plain TCP and the system resolver.
pub type PlainConnectionManager = PooledConnectionManager<TcpConnector, DnsResolver>;

impl PlainConnectionManager {
    pub fn new(config: ManagerConfig) -> Self {
        Self::with_parts(TcpConnector, DnsResolver, config)
    }
}

impl<C, R> PooledConnectionManager<C, R>
where
    C: Connector,
    R: Resolver,
{
    pub fn with_parts(connector: C, resolver: R, config: ManagerConfig) -> Self {
        Self {
            connector,
            resolver,
            pool: Arc::new(Pool::new(&config)),
            proxy: config.proxy,
        }
    }

    /// Number of idle connections across all destinations.
    pub fn idle_count(&self) -> usize {
        self.pool.idle_count()
    }

    /// Where a connection for `request` has to go, and whether that is a proxy.
    ///
    /// Proxied requests are forwarded in absolute form over the proxy
    /// connection itself, which is only sound for plain `http` targets.
    /// Anything else needs a tunnelling connector.
    fn target(&self, request: &ClientRequest, options: &ClientOptions) -> Result<(ConnectionKey, bool)> {
        if options.uses_proxy() {
            match &self.proxy {
                Some(_) if request.url.scheme() != "http" => {
                    return Err(ClientError::UnsupportedScheme(request.url.scheme().to_string()));
                }
                Some(proxy) => {
                    let host = proxy
                        .host_str()
                        .ok_or_else(|| ClientError::InvalidUrl(format!("{}: proxy has no host", proxy)))?;
                    let port = proxy
                        .port_or_known_default()
                        .ok_or_else(|| ClientError::InvalidUrl(format!("{}: proxy has no port", proxy)))?;
                    return Ok((ConnectionKey::new(proxy.scheme(), host, port), true));
                }
                None => tracing::debug!("proxy requested but none configured, connecting directly"),
            }
        }

        let key = ConnectionKey::new(request.url.scheme(), request.host()?, request.port()?);
        Ok((key, false))
    }

    async fn resolve(&self, key: &ConnectionKey, options: &ClientOptions) -> Result<SocketAddr> {
        if options.caches_resolved() {
            if let Some(addr) = self.pool.cached_addr(&key.host, key.port) {
                tracing::trace!(host = %key.host, %addr, "resolved address from cache");
                return Ok(addr);
            }
        }

        let addr = self
            .resolver
            .resolve(&key.host, key.port)
            .await
            .map_err(|source| ClientError::Resolve {
                host: key.host.clone(),
                source,
            })?;

        if options.caches_resolved() {
            self.pool.cache_addr(&key.host, key.port, addr);
        }
        Ok(addr)
    }

    async fn establish(
        &self,
        runtime: &Handle,
        request: &ClientRequest,
        options: &ClientOptions,
    ) -> Result<PooledConnection> {
        if !self.connector.supports(request.url.scheme()) {
            return Err(ClientError::UnsupportedScheme(request.url.scheme().to_string()));
        }

        let (key, via_proxy) = self.target(request, options)?;
        if !self.connector.supports(&key.scheme) {
            return Err(ClientError::UnsupportedScheme(key.scheme));
        }

        while let Some((mut conn, generation)) = self.pool.checkout(&key) {
            if conn.is_stale() {
                tracing::debug!(conn = conn.id(), key = %key, "pooled connection closed by peer, dropping it");
                continue;
            }
            tracing::debug!(conn = conn.id(), key = %key, "reusing pooled connection");
            return Ok(PooledConnection::new(conn, generation, &self.pool, true));
        }

        let addr = self.resolve(&key, options).await?;
        let generation = self.pool.generation();

        let stream = runtime
            .spawn(self.connector.connect(&key, addr))
            .await
            .map_err(|e| ClientError::Runtime(e.to_string()))?
            .map_err(|source| ClientError::Connect { addr, source })?;

        let conn = ClientConnection::new(key, addr, stream, via_proxy);
        tracing::debug!(conn = conn.id(), key = %conn.key(), %addr, via_proxy, "established connection");
        Ok(PooledConnection::new(conn, generation, &self.pool, false))
    }
}

impl<C, R> ConnectionManager for PooledConnectionManager<C, R>
where
    C: Connector,
    R: Resolver,
{
    fn get_connection<'a>(
        &'a self,
        runtime: &'a Handle,
        request: &'a ClientRequest,
        options: &'a ClientOptions,
    ) -> BoxFuture<'a, Result<PooledConnection>> {
        self.establish(runtime, request, options).boxed()
    }

    fn clear_resolved_cache(&self) {
        self.pool.clear_resolved();
    }

    fn reset(&self) {
        self.pool.reset();
        tracing::debug!("connection pool reset");
    }
}
