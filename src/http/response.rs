use bytes::Bytes;

use crate::http::request::Header;

/// HTTP status codes the server knows reason phrases for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// 200 OK
    Ok,
    /// 201 Created
    Created,
    /// 202 Accepted
    Accepted,
    /// 204 No Content
    NoContent,
    /// 301 Moved Permanently
    MovedPermanently,
    /// 302 Found
    Found,
    /// 303 See Other
    SeeOther,
    /// 304 Not Modified
    NotModified,
    /// 307 Temporary Redirect
    TemporaryRedirect,
    /// 308 Permanent Redirect
    PermanentRedirect,
    /// 400 Bad Request
    BadRequest,
    /// 401 Unauthorized
    Unauthorized,
    /// 403 Forbidden
    Forbidden,
    /// 404 Not Found
    NotFound,
    /// 405 Method Not Allowed
    MethodNotAllowed,
    /// 413 Payload Too Large
    PayloadTooLarge,
    /// 500 Internal Server Error
    InternalServerError,
    /// 501 Not Implemented
    NotImplemented,
    /// 502 Bad Gateway
    BadGateway,
    /// 503 Service Unavailable
    ServiceUnavailable,
    /// 504 Gateway Timeout
    GatewayTimeout,
}

impl StatusCode {
    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use harbor::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// assert_eq!(StatusCode::BadRequest.as_u16(), 400);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::Created => 201,
            StatusCode::Accepted => 202,
            StatusCode::NoContent => 204,
            StatusCode::MovedPermanently => 301,
            StatusCode::Found => 302,
            StatusCode::SeeOther => 303,
            StatusCode::NotModified => 304,
            StatusCode::TemporaryRedirect => 307,
            StatusCode::PermanentRedirect => 308,
            StatusCode::BadRequest => 400,
            StatusCode::Unauthorized => 401,
            StatusCode::Forbidden => 403,
            StatusCode::NotFound => 404,
            StatusCode::MethodNotAllowed => 405,
            StatusCode::PayloadTooLarge => 413,
            StatusCode::InternalServerError => 500,
            StatusCode::NotImplemented => 501,
            StatusCode::BadGateway => 502,
            StatusCode::ServiceUnavailable => 503,
            StatusCode::GatewayTimeout => 504,
        }
    }

    /// Returns the standard HTTP reason phrase for this status code.
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::Created => "Created",
            StatusCode::Accepted => "Accepted",
            StatusCode::NoContent => "No Content",
            StatusCode::MovedPermanently => "Moved Permanently",
            StatusCode::Found => "Found",
            StatusCode::SeeOther => "See Other",
            StatusCode::NotModified => "Not Modified",
            StatusCode::TemporaryRedirect => "Temporary Redirect",
            StatusCode::PermanentRedirect => "Permanent Redirect",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Unauthorized => "Unauthorized",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::NotFound => "Not Found",
            StatusCode::MethodNotAllowed => "Method Not Allowed",
            StatusCode::PayloadTooLarge => "Payload Too Large",
            StatusCode::InternalServerError => "Internal Server Error",
            StatusCode::NotImplemented => "Not Implemented",
            StatusCode::BadGateway => "Bad Gateway",
            StatusCode::ServiceUnavailable => "Service Unavailable",
            StatusCode::GatewayTimeout => "Gateway Timeout",
        }
    }

    /// Statuses that never carry a body on the wire.
    pub fn forbids_body(&self) -> bool {
        matches!(self, StatusCode::NoContent | StatusCode::NotModified)
    }
}

/// An HTTP response, filled in place by a handler.
///
/// The body is a list of byte segments so large payloads can be handed to
/// the writer without being concatenated first.
#[derive(Debug, Clone)]
pub struct Response {
    /// The HTTP status code
    pub status: StatusCode,
    /// Headers in the order they will be written
    pub headers: Vec<Header>,
    /// Body segments, written back to back
    pub body: Vec<Bytes>,
}

impl Default for Response {
    fn default() -> Self {
        Response::new(StatusCode::Ok)
    }
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Creates a simple 200 OK response with the given body.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        ResponseBuilder::new(StatusCode::Ok).body(body).build()
    }

    /// Canned response for a status: a small HTML page naming the status,
    /// with Content-Length and Content-Type set.
    pub fn stock_reply(status: StatusCode) -> Self {
        if status.forbids_body() {
            return ResponseBuilder::new(status).build();
        }
        let page = format!(
            "<html><head><title>{reason}</title></head><body><h1>{code} {reason}</h1></body></html>",
            code = status.as_u16(),
            reason = status.reason_phrase(),
        );
        ResponseBuilder::new(status)
            .header("Content-Type", "text/html")
            .body(page)
            .build()
    }

    /// Creates a 400 Bad Request response.
    pub fn bad_request() -> Self {
        Response::stock_reply(StatusCode::BadRequest)
    }

    /// First header value with the given name, compared case-insensitively.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.is(key))
            .map(|h| h.value.as_str())
    }

    /// Replaces every header with this name by a single new one.
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.headers.retain(|h| !h.is(&key));
        self.headers.push(Header::new(key, value));
    }

    /// Appends a header. Repeated names are kept.
    pub fn add_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.push(Header::new(key, value));
    }

    /// Appends a body segment.
    pub fn append_body(&mut self, chunk: impl Into<Bytes>) {
        let chunk = chunk.into();
        if !chunk.is_empty() {
            self.body.push(chunk);
        }
    }

    /// Total body length across all segments.
    pub fn body_len(&self) -> usize {
        self.body.iter().map(Bytes::len).sum()
    }

    /// Copies the body segments into one contiguous buffer.
    pub fn body_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body_len());
        for chunk in &self.body {
            out.extend_from_slice(chunk);
        }
        out
    }
}

/// Builder for constructing HTTP responses in a fluent style.
///
/// # Example
///
/// ```ignore
/// let response = ResponseBuilder::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body("{}")
///     .build();
/// ```
pub struct ResponseBuilder {
    response: Response,
}

impl ResponseBuilder {
    /// Creates a new response builder with the specified status code.
    pub fn new(status: StatusCode) -> Self {
        Self {
            response: Response::new(status),
        }
    }

    /// Adds or replaces a header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.response.set_header(key, value);
        self
    }

    /// Sets the response body to a single segment.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.response.body.clear();
        self.response.append_body(body);
        self
    }

    /// Appends another body segment.
    pub fn chunk(mut self, chunk: impl Into<Bytes>) -> Self {
        self.response.append_body(chunk);
        self
    }

    /// Builds the final Response.
    ///
    /// Adds the Content-Length header based on body size if not already present.
    pub fn build(mut self) -> Response {
        if self.response.header("Content-Length").is_none() && !self.response.status.forbids_body() {
            let len = self.response.body_len();
            self.response.add_header("Content-Length", len.to_string());
        }
        self.response
    }
}
