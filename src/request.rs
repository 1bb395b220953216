use crate::error::{Error, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use std::fmt;
use url::Url;
use uuid::Uuid;

/// Standard query parameter names understood by the APIs
pub mod params {
    pub const PRETTY_PRINT: &str = "prettyPrint";
    pub const FIELDS: &str = "fields";
    pub const PAGE_TOKEN: &str = "pageToken";
}

/// Identity of one logical operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationId(Uuid);

impl OperationId {
    pub fn new() -> Self {
        OperationId(Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of one HTTP exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        RequestId(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Request payload with its declared content type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Body {
    pub data: Vec<u8>,
    pub content_type: String,
}

impl Body {
    pub fn new(data: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Body {
            data: data.into(),
            content_type: content_type.into(),
        }
    }

    /// Serialize `value` as an `application/json` body
    pub fn json<T: serde::Serialize>(value: &T) -> Result<Self> {
        Ok(Body::new(serde_json::to_vec(value)?, "application/json"))
    }
}

/// A single HTTP exchange, owned by the operation that built it.
///
/// Requests are never mutated once handed to the dispatcher; redirects and
/// continuation pages are new requests derived with [`Request::redirected`]
/// and [`Request::continuation`].
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub owner: OperationId,
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Body>,
}

impl Request {
    pub fn new(owner: OperationId, method: Method, url: Url) -> Self {
        Request {
            id: RequestId::new(),
            owner,
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    /// Add a header, rejecting names or values that are not valid HTTP
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| Error::RequestBuild(format!("invalid header name: {}", name)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| Error::RequestBuild(format!("invalid header value for {}", name)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Append a query parameter unless the URL already carries it
    pub fn with_default_query(mut self, key: &str, value: &str) -> Self {
        if !self.url.query_pairs().any(|(k, _)| k == key) {
            self.url.query_pairs_mut().append_pair(key, value);
        }
        self
    }

    /// Same owner, method, headers and body, aimed at `location`
    pub fn redirected(&self, location: Url) -> Self {
        Request {
            id: RequestId::new(),
            url: location,
            ..self.clone()
        }
    }

    /// Next-page request: always a GET on the cursor URL with the same headers
    pub fn continuation(&self, next: Url) -> Self {
        Request {
            id: RequestId::new(),
            owner: self.owner,
            method: Method::GET,
            url: next,
            headers: self.headers.clone(),
            body: None,
        }
    }

    /// Copy stamped with the current bearer token, ready for the transport
    pub(crate) fn authorized(&self, access_token: Option<&str>) -> Self {
        let mut request = self.clone();
        if let Some(token) = access_token {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token)) {
                request.headers.insert(AUTHORIZATION, value);
            }
        }
        if let Some(ref body) = self.body {
            if let Ok(value) = HeaderValue::from_str(&body.content_type) {
                request.headers.insert(CONTENT_TYPE, value);
            }
        }
        request
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> Request {
        let url = Url::parse("https://api.example.com/tasks?maxResults=10").unwrap();
        Request::new(OperationId::new(), Method::POST, url)
            .with_body(Body::new(b"{}".to_vec(), "application/json"))
            .with_header("GData-Version", "3.0")
            .unwrap()
    }

    #[test]
    fn test_default_query_not_duplicated() {
        let req = request()
            .with_default_query(params::PRETTY_PRINT, "false")
            .with_default_query(params::PRETTY_PRINT, "true");
        assert_eq!(req.url.query(), Some("maxResults=10&prettyPrint=false"));
    }

    #[test]
    fn test_redirect_keeps_owner_and_body() {
        let req = request();
        let moved = req.redirected(Url::parse("https://mirror.example.com/tasks").unwrap());

        assert_ne!(moved.id, req.id);
        assert_eq!(moved.owner, req.owner);
        assert_eq!(moved.method, Method::POST);
        assert_eq!(moved.body, req.body);
        assert_eq!(moved.header("GData-Version"), Some("3.0"));
    }

    #[test]
    fn test_continuation_is_get() {
        let req = request();
        let next = req.continuation(Url::parse("https://api.example.com/tasks?pageToken=x").unwrap());
        assert_eq!(next.method, Method::GET);
        assert!(next.body.is_none());
        assert_eq!(next.header("GData-Version"), Some("3.0"));
    }

    #[test]
    fn test_authorized_sets_bearer_and_content_type() {
        let req = request().authorized(Some("abc"));
        assert_eq!(req.header("Authorization"), Some("Bearer abc"));
        assert_eq!(req.header("Content-Type"), Some("application/json"));
    }

    #[test]
    fn test_invalid_header_rejected() {
        let res = request().with_header("bad header", "x");
        assert!(matches!(res, Err(Error::RequestBuild(_))));
    }
}
