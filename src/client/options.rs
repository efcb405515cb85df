//! Immutable client configuration values.
//!
//! Both types are plain values: builders consume and return `self`, and a
//! request captures its own copy when it starts.

use std::path::PathBuf;
use std::time::Duration;

use tokio::runtime::Handle;

/// Options shared by every request a [`Client`](crate::client::Client) makes.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    runtime: Option<Handle>,
    follow_redirects: bool,
    cache_resolved: bool,
    use_proxy: bool,
    timeout: Duration,
    certificate_paths: Vec<PathBuf>,
    verify_paths: Vec<PathBuf>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            runtime: None,
            follow_redirects: false,
            cache_resolved: false,
            use_proxy: false,
            timeout: Duration::from_millis(30_000),
            certificate_paths: Vec::new(),
            verify_paths: Vec::new(),
        }
    }
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs requests on the given runtime instead of the client's own.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn runtime_handle(&self) -> Option<&Handle> {
        self.runtime.as_ref()
    }

    /// Re-issue requests answered with a 3xx and a Location header.
    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    pub fn follows_redirects(&self) -> bool {
        self.follow_redirects
    }

    /// Reuse resolved host addresses across requests.
    pub fn cache_resolved(mut self, cache: bool) -> Self {
        self.cache_resolved = cache;
        self
    }

    pub fn caches_resolved(&self) -> bool {
        self.cache_resolved
    }

    /// Route connections through the connection manager's proxy.
    pub fn use_proxy(mut self, use_proxy: bool) -> Self {
        self.use_proxy = use_proxy;
        self
    }

    pub fn uses_proxy(&self) -> bool {
        self.use_proxy
    }

    /// Upper bound on a whole request, connection setup included.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout_duration(&self) -> Duration {
        self.timeout
    }

    /// Adds a TLS certificate path. Stored for transports that use TLS.
    pub fn certificate_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.certificate_paths.push(path.into());
        self
    }

    pub fn certificate_paths(&self) -> &[PathBuf] {
        &self.certificate_paths
    }

    /// Adds a TLS verify path. Stored for transports that use TLS.
    pub fn verify_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.verify_paths.push(path.into());
        self
    }

    pub fn verify_paths(&self) -> &[PathBuf] {
        &self.verify_paths
    }
}

/// Per-request overrides.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    max_redirects: usize,
    timeout: Option<Duration>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            max_redirects: 5,
            timeout: None,
        }
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Redirect hops allowed when the client follows redirects.
    pub fn max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = max;
        self
    }

    pub fn redirect_limit(&self) -> usize {
        self.max_redirects
    }

    /// Overrides [`ClientOptions::timeout`] for this request.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout_override(&self) -> Option<Duration> {
        self.timeout
    }
}
