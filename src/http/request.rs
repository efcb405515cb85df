use bytes::BytesMut;

/// HTTP request methods.
///
/// The server accepts the standard HTTP/1.1 method set. Anything else is
/// rejected by the parser with 400 Bad Request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// PATCH - Partial modification of a resource
    PATCH,
    /// TRACE - Message loop-back test
    TRACE,
    /// CONNECT - Establish a tunnel
    CONNECT,
}

impl Method {
    /// Parses an HTTP method from a string.
    ///
    /// # Arguments
    ///
    /// * `s` - String representation of the method (case-sensitive, uppercase)
    ///
    /// # Returns
    ///
    /// `Some(Method)` if the string matches a known method, `None` otherwise.
    ///
    /// # Example
    ///
    /// ```
    /// # use harbor::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("get"), None);
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::GET),
            "HEAD" => Some(Method::HEAD),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "DELETE" => Some(Method::DELETE),
            "OPTIONS" => Some(Method::OPTIONS),
            "PATCH" => Some(Method::PATCH),
            "TRACE" => Some(Method::TRACE),
            "CONNECT" => Some(Method::CONNECT),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::HEAD => "HEAD",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
            Method::TRACE => "TRACE",
            Method::CONNECT => "CONNECT",
        }
    }

    /// Whether requests with this method conventionally carry a body and
    /// therefore must declare a Content-Length.
    pub fn expects_body(&self) -> bool {
        matches!(self, Method::POST | Method::PUT | Method::PATCH)
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single header line. Names keep the case the peer sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Case-insensitive name comparison.
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// Represents a parsed HTTP request from a client.
///
/// Headers are kept in arrival order and duplicates are preserved. The
/// body is filled by the connection after the header block has been parsed.
#[derive(Debug, Clone)]
pub struct Request {
    /// The HTTP method (GET, POST, etc.)
    pub method: Method,
    /// The request target as sent (e.g., "/index.html?x=1")
    pub target: String,
    /// HTTP version (typically "HTTP/1.1")
    pub version: String,
    /// Request headers in the order they were received
    pub headers: Vec<Header>,
    /// Request body for POST/PUT/PATCH requests
    pub body: BytesMut,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            method: Method::GET,
            target: String::new(),
            version: String::new(),
            headers: Vec::new(),
            body: BytesMut::new(),
        }
    }
}

/// Builder for constructing Request objects.
#[derive(Default)]
pub struct RequestBuilder {
    method: Option<Method>,
    target: Option<String>,
    version: Option<String>,
    headers: Vec<Header>,
    body: BytesMut,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Appends a header. Repeated names are kept.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header::new(key, value));
        self
    }

    pub fn body(mut self, body: impl AsRef<[u8]>) -> Self {
        self.body = BytesMut::from(body.as_ref());
        self
    }

    pub fn build(self) -> Result<Request, &'static str> {
        Ok(Request {
            method: self.method.ok_or("method missing")?,
            target: self.target.ok_or("target missing")?,
            version: self.version.unwrap_or_else(|| "HTTP/1.1".to_string()),
            headers: self.headers,
            body: self.body,
        })
    }
}

impl Request {
    /// Retrieves the first header value with the given name, compared
    /// case-insensitively.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.is(key))
            .map(|h| h.value.as_str())
    }

    /// All values for a header name, in arrival order.
    pub fn header_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |h| h.is(key))
            .map(|h| h.value.as_str())
    }

    /// Resolves the declared Content-Length.
    ///
    /// `None` when the header is absent, `Some(Err(_))` when it is present
    /// but not a plain run of decimal digits.
    pub fn content_length(&self) -> Option<Result<usize, ContentLengthError>> {
        self.header("Content-Length").map(parse_content_length)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContentLengthError {
    #[error("Content-Length is not a decimal number")]
    NotDigits,
    #[error("Content-Length does not fit in usize")]
    Overflow,
}

fn parse_content_length(value: &str) -> Result<usize, ContentLengthError> {
    let value = value.trim();
    // str::parse alone would let a leading '+' through
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ContentLengthError::NotDigits);
    }
    value.parse().map_err(|_| ContentLengthError::Overflow)
}
