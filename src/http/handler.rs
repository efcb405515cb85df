use crate::http::request::Request;
use crate::http::response::Response;

/// User code invoked once per fully received request.
///
/// The handler fills `response` in place. It runs on the connection's own
/// task, so it never overlaps with I/O for the same connection, but it does
/// run concurrently with handlers of other connections.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, request: &Request, response: &mut Response);

    /// Receives transport-level failures of connections using this handler.
    fn log(&self, message: &str) {
        tracing::warn!(error = message, "connection error");
    }
}

impl<F> Handler for F
where
    F: Fn(&Request, &mut Response) + Send + Sync + 'static,
{
    fn handle(&self, request: &Request, response: &mut Response) {
        self(request, response)
    }
}
