use bytes::Bytes;
use url::Url;

use crate::error::{ClientError, Result};
use crate::http::request::{Header, Method};

/// An outbound request.
#[derive(Debug, Clone)]
pub struct ClientRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<Header>,
    pub body: Bytes,
}

impl ClientRequest {
    /// Creates a GET request for `url`. The verb methods of the client
    /// overwrite the method anyway.
    pub fn new(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn parse(url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| ClientError::InvalidUrl(format!("{}: {}", url, e)))?;
        Ok(Self::new(url))
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Appends a header. Repeated names are kept.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header::new(key, value));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.is(key))
            .map(|h| h.value.as_str())
    }

    pub fn remove_header(&mut self, key: &str) {
        self.headers.retain(|h| !h.is(key));
    }

    pub fn host(&self) -> Result<&str> {
        self.url
            .host_str()
            .ok_or_else(|| ClientError::InvalidUrl(format!("{}: missing host", self.url)))
    }

    pub fn port(&self) -> Result<u16> {
        self.url
            .port_or_known_default()
            .ok_or_else(|| ClientError::InvalidUrl(format!("{}: missing port", self.url)))
    }

    /// Value for the Host header: the host, plus the port when it is not
    /// the scheme default.
    pub fn authority(&self) -> Result<String> {
        let host = self.host()?;
        Ok(match self.url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        })
    }

    /// Path and query, as written on a request line sent to the origin.
    pub fn origin_form(&self) -> String {
        let path = if self.url.path().is_empty() {
            "/"
        } else {
            self.url.path()
        };
        match self.url.query() {
            Some(query) => format!("{}?{}", path, query),
            None => path.to_string(),
        }
    }

    /// Full URL without fragment, as written on a request line sent to a proxy.
    pub fn absolute_form(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        url.to_string()
    }
}
