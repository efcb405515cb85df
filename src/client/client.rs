use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;

use crate::client::manager::{ConnectionManager, ManagerConfig, PlainConnectionManager};
use crate::client::options::{ClientOptions, RequestOptions};
use crate::client::request::ClientRequest;
use crate::client::response::ClientResponse;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::http::request::Method;

/// HTTP client issuing requests through a [`ConnectionManager`].
///
/// Requests run on the runtime given in [`ClientOptions::runtime`], or on a
/// small runtime the client owns when none is given.
pub struct Client {
    manager: Arc<dyn ConnectionManager>,
    options: ClientOptions,
    runtime: Handle,
    _owned: Option<OwnedRuntime>,
}

/// Runtime created by the client itself. Shut down without blocking so
/// the client may be dropped from async code.
struct OwnedRuntime(Option<Runtime>);

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

impl Client {
    /// Creates a client with a plain pooled connection manager.
    pub fn new(options: ClientOptions) -> Result<Self> {
        let manager = Arc::new(PlainConnectionManager::new(ManagerConfig::default()));
        Self::with_manager(options, manager)
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let manager = Arc::new(PlainConnectionManager::new(config.manager_config()));
        Self::with_manager(config.client_options(), manager)
    }

    pub fn with_manager(options: ClientOptions, manager: Arc<dyn ConnectionManager>) -> Result<Self> {
        let (runtime, owned) = match options.runtime_handle() {
            Some(handle) => (handle.clone(), None),
            None => {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(2)
                    .thread_name("harbor-client")
                    .enable_all()
                    .build()
                    .map_err(|e| ClientError::Runtime(e.to_string()))?;
                (runtime.handle().clone(), Some(OwnedRuntime(Some(runtime))))
            }
        };

        Ok(Self {
            manager,
            options,
            runtime,
            _owned: owned,
        })
    }

    pub fn client_options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn manager(&self) -> &Arc<dyn ConnectionManager> {
        &self.manager
    }

    pub fn get(&self, request: ClientRequest, options: RequestOptions) -> ResponseFuture {
        self.execute(request.with_method(Method::GET), options)
    }

    pub fn post(&self, request: ClientRequest, options: RequestOptions) -> ResponseFuture {
        self.execute(request.with_method(Method::POST), options)
    }

    pub fn put(&self, request: ClientRequest, options: RequestOptions) -> ResponseFuture {
        self.execute(request.with_method(Method::PUT), options)
    }

    pub fn delete(&self, request: ClientRequest, options: RequestOptions) -> ResponseFuture {
        self.execute(request.with_method(Method::DELETE), options)
    }

    pub fn head(&self, request: ClientRequest, options: RequestOptions) -> ResponseFuture {
        self.execute(request.with_method(Method::HEAD), options)
    }

    pub fn options(&self, request: ClientRequest, options: RequestOptions) -> ResponseFuture {
        self.execute(request.with_method(Method::OPTIONS), options)
    }

    /// Starts the request immediately on the client's runtime.
    fn execute(&self, request: ClientRequest, options: RequestOptions) -> ResponseFuture {
        let manager = self.manager.clone();
        let client_options = self.options.clone();
        let runtime = self.runtime.clone();

        let handle = self.runtime.spawn(async move {
            let limit = options
                .timeout_override()
                .unwrap_or_else(|| client_options.timeout_duration());

            let method = request.method;
            let url = request.url.clone();
            let exchange = perform(manager.as_ref(), &runtime, request, &client_options, &options);

            match tokio::time::timeout(limit, exchange).await {
                Ok(result) => result,
                Err(_) => {
                    // The in-flight connection was dropped half way and is
                    // therefore not returned to the pool.
                    tracing::warn!(%method, %url, timeout = ?limit, "request timed out");
                    Err(ClientError::Timeout)
                }
            }
        });

        ResponseFuture { handle }
    }
}

async fn perform(
    manager: &dyn ConnectionManager,
    runtime: &Handle,
    mut request: ClientRequest,
    client_options: &ClientOptions,
    options: &RequestOptions,
) -> Result<ClientResponse> {
    let mut redirects = 0;

    loop {
        let mut conn = manager.get_connection(runtime, &request, client_options).await?;
        let response = conn.send(&request).await?;
        drop(conn);

        if !client_options.follows_redirects() || !response.is_redirect() {
            return Ok(response);
        }
        let Some(location) = response.location() else {
            return Ok(response);
        };

        if redirects >= options.redirect_limit() {
            return Err(ClientError::TooManyRedirects(options.redirect_limit()));
        }
        redirects += 1;

        let next = request
            .url
            .join(location)
            .map_err(|e| ClientError::InvalidUrl(format!("{}: {}", location, e)))?;
        tracing::debug!(status = response.status, from = %request.url, to = %next, "following redirect");

        let downgrade = response.status == 303
            || (matches!(response.status, 301 | 302) && request.method == Method::POST);
        if downgrade && request.method != Method::HEAD {
            request.method = Method::GET;
            request.body = Default::default();
            request.remove_header("Content-Type");
        }
        if next.host_str() != request.url.host_str() {
            request.remove_header("Authorization");
            request.remove_header("Host");
        }
        request.url = next;
    }
}

/// Pending response of a request started by [`Client`].
///
/// The request runs independently of this future: dropping it does not
/// stop the exchange, which completes and returns its connection to the
/// pool. Call [`ResponseFuture::abort`] to cancel, which closes the
/// connection in use.
pub struct ResponseFuture {
    handle: JoinHandle<Result<ClientResponse>>,
}

impl ResponseFuture {
    pub fn abort(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Future for ResponseFuture {
    type Output = Result<ClientResponse>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.handle).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(e)) => Poll::Ready(Err(ClientError::Runtime(e.to_string()))),
            Poll::Pending => Poll::Pending,
        }
    }
}
