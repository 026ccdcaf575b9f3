//! Request and response metadata handed to transports.
//!
//! # Design
//! Requests are plain data. A transport receives an `OperationRequest`,
//! resolves it into an `HttpRequest`, and owns all I/O from there. The
//! harness never looks inside headers or bodies; it only needs the status
//! line and the advertised length, which travel back as `ResponseMeta`.
//!
//! All fields use owned types so requests can be moved onto the worker
//! thread that executes them.

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// A fully specified HTTP request described as plain data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    /// A `GET` with no headers and no body.
    pub fn get(url: &str) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// What a scenario submits: either a bare locator or a complete request.
///
/// Immutable once handed to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationRequest {
    Url(String),
    Request(HttpRequest),
}

impl OperationRequest {
    pub fn url(&self) -> &str {
        match self {
            OperationRequest::Url(url) => url,
            OperationRequest::Request(req) => &req.url,
        }
    }

    /// Resolve into the request a transport executes. A bare locator is a `GET`.
    pub fn into_http(self) -> HttpRequest {
        match self {
            OperationRequest::Url(url) => HttpRequest::get(&url),
            OperationRequest::Request(req) => req,
        }
    }
}

impl From<&str> for OperationRequest {
    fn from(url: &str) -> Self {
        OperationRequest::Url(url.to_string())
    }
}

impl From<String> for OperationRequest {
    fn from(url: String) -> Self {
        OperationRequest::Url(url)
    }
}

impl From<HttpRequest> for OperationRequest {
    fn from(req: HttpRequest) -> Self {
        OperationRequest::Request(req)
    }
}

/// Status line and headers of a response, delivered before any body bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMeta {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

impl ResponseMeta {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The `Content-Length` the server advertised, if any. A length is only
    /// meaningful for identity-encoded bodies; a compressed body is decoded
    /// before it reaches a delegate.
    pub fn expected_length(&self) -> Option<u64> {
        if let Some(encoding) = self.header("content-encoding") {
            if !encoding.trim().eq_ignore_ascii_case("identity") {
                return None;
            }
        }
        self.header("content-length").and_then(|v| v.trim().parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_url_resolves_to_get() {
        let req = OperationRequest::Url("http://localhost:3000/LICENSE.txt".to_string()).into_http();
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.url, "http://localhost:3000/LICENSE.txt");
        assert!(req.headers.is_empty());
        assert!(req.body.is_none());
    }

    #[test]
    fn full_request_is_passed_through() {
        let req = HttpRequest::get("http://localhost:3000/x").with_header("accept", "application/json");
        let op = OperationRequest::from(req.clone());
        assert_eq!(op.url(), "http://localhost:3000/x");
        assert_eq!(op.into_http(), req);
    }

    #[test]
    fn header_lookup_ignores_case() {
        let meta = ResponseMeta {
            status: 200,
            headers: vec![("Content-Length".to_string(), " 1024".to_string())],
        };
        assert_eq!(meta.header("content-length"), Some(" 1024"));
        assert_eq!(meta.expected_length(), Some(1024));
    }

    #[test]
    fn missing_or_garbled_length_is_none() {
        let mut meta = ResponseMeta::new(404);
        assert_eq!(meta.expected_length(), None);
        meta.headers.push(("content-length".to_string(), "lots".to_string()));
        assert_eq!(meta.expected_length(), None);
    }

    #[test]
    fn compressed_body_has_no_expected_length() {
        let meta = ResponseMeta {
            status: 200,
            headers: vec![
                ("content-length".to_string(), "512".to_string()),
                ("content-encoding".to_string(), "gzip".to_string()),
            ],
        };
        assert_eq!(meta.expected_length(), None);
    }
}
