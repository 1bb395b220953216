//! Per-kind HTTP semantics of an operation.
//!
//! A [`Job`] declares which requests an operation needs (one per target)
//! and how each reply is decoded. The four stock kinds cover the usual
//! resource lifecycle; API-specific jobs implement the trait directly.

use crate::error::{DecodeError, Result};
use crate::request::{Body, OperationId, Request};
use crate::response::HttpResponse;
use crate::service::{FeedCursor, Service};
use reqwest::Method;
use url::Url;

/// The logical kind of an operation, which fixes its HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Fetch,
    Create,
    Modify,
    Delete,
}

impl OperationKind {
    pub fn method(&self) -> Method {
        match self {
            OperationKind::Fetch => Method::GET,
            OperationKind::Create => Method::POST,
            OperationKind::Modify => Method::PUT,
            OperationKind::Delete => Method::DELETE,
        }
    }

    /// Failure policy used when the operation does not override it.
    /// Deletes are attempted item by item; everything else stops at the
    /// first failure.
    pub fn default_batch_policy(&self) -> BatchPolicy {
        match self {
            OperationKind::Delete => BatchPolicy::BestEffort,
            _ => BatchPolicy::AllOrNothing,
        }
    }
}

/// How a multi-target operation reacts to one target failing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPolicy {
    /// The first failed target fails the operation; the rest of the backlog is dropped
    AllOrNothing,
    /// Every target is attempted; failures are collected and reported at the end
    BestEffort,
}

/// What one reply decoded to
#[derive(Debug)]
pub struct Decoded<T> {
    pub items: Vec<T>,
    /// Next page of a feed, if any
    pub next_page: Option<Url>,
    pub start_index: Option<u64>,
    pub total_results: Option<u64>,
}

impl<T> Decoded<T> {
    pub fn items(items: Vec<T>) -> Self {
        Decoded {
            items,
            next_page: None,
            start_index: None,
            total_results: None,
        }
    }

    pub fn empty() -> Self {
        Self::items(Vec::new())
    }

    fn from_cursor(items: Vec<T>, cursor: FeedCursor) -> Self {
        Decoded {
            items,
            next_page: cursor.next_page,
            start_index: cursor.start_index,
            total_results: cursor.total_results,
        }
    }
}

/// A successful reply together with the backlog target it answers
#[derive(Debug)]
pub struct Reply<'a> {
    /// Index of the target in the order returned by [`Job::targets`]
    pub target: usize,
    pub request: &'a Request,
    pub response: &'a HttpResponse,
}

/// Declared HTTP semantics and decode hook of one operation kind
pub trait Job: Send + 'static {
    type Item: Send + 'static;

    fn kind(&self) -> OperationKind;

    /// Protocol-version header value for every request of this job
    fn protocol_version(&self) -> Option<&str> {
        None
    }

    /// Build one request per target. Called once when the operation starts.
    fn targets(&mut self, owner: OperationId) -> Result<Vec<Request>>;

    /// Decode a 2xx reply. Fetch kinds may return a next page; mutate
    /// kinds return at most one item and no cursor.
    fn on_response(&mut self, reply: Reply<'_>) -> std::result::Result<Decoded<Self::Item>, DecodeError>;
}

fn conditional(request: Request, etag: Option<&str>) -> Result<Request> {
    request.with_header("If-Match", etag.unwrap_or("*"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchMode {
    Feed,
    Single,
}

/// GET a paginated feed, or a single resource
#[derive(Debug)]
pub struct FetchJob<S> {
    service: S,
    url: Url,
    mode: FetchMode,
}

impl<S: Service> FetchJob<S> {
    /// Fetch every page of the feed at `url`
    pub fn feed(service: S, url: Url) -> Self {
        FetchJob {
            service,
            url,
            mode: FetchMode::Feed,
        }
    }

    /// Fetch the single resource at `url`
    pub fn single(service: S, url: Url) -> Self {
        FetchJob {
            service,
            url,
            mode: FetchMode::Single,
        }
    }
}

impl<S: Service> Job for FetchJob<S> {
    type Item = S::Item;

    fn kind(&self) -> OperationKind {
        OperationKind::Fetch
    }

    fn protocol_version(&self) -> Option<&str> {
        self.service.protocol_version()
    }

    fn targets(&mut self, owner: OperationId) -> Result<Vec<Request>> {
        Ok(vec![Request::new(owner, Method::GET, self.url.clone())])
    }

    fn on_response(&mut self, reply: Reply<'_>) -> std::result::Result<Decoded<S::Item>, DecodeError> {
        let content_type = reply.response.content_type();
        match self.mode {
            FetchMode::Feed => {
                let mut cursor = FeedCursor::new(reply.request.url.clone());
                let items = self
                    .service
                    .decode_feed(&reply.response.body, content_type, &mut cursor)?;
                Ok(Decoded::from_cursor(items, cursor))
            }
            FetchMode::Single => {
                let item = self
                    .service
                    .decode_item(&reply.response.body, content_type)?
                    .ok_or_else(|| DecodeError::Malformed("empty reply body".to_string()))?;
                Ok(Decoded::items(vec![item]))
            }
        }
    }
}

/// POST each body to a collection URL
#[derive(Debug)]
pub struct CreateJob<S> {
    service: S,
    url: Url,
    bodies: Vec<Body>,
}

impl<S: Service> CreateJob<S> {
    pub fn new(service: S, url: Url, bodies: Vec<Body>) -> Self {
        CreateJob { service, url, bodies }
    }
}

impl<S: Service> Job for CreateJob<S> {
    type Item = S::Item;

    fn kind(&self) -> OperationKind {
        OperationKind::Create
    }

    fn protocol_version(&self) -> Option<&str> {
        self.service.protocol_version()
    }

    fn targets(&mut self, owner: OperationId) -> Result<Vec<Request>> {
        Ok(self
            .bodies
            .drain(..)
            .map(|body| Request::new(owner, Method::POST, self.url.clone()).with_body(body))
            .collect())
    }

    fn on_response(&mut self, reply: Reply<'_>) -> std::result::Result<Decoded<S::Item>, DecodeError> {
        let item = self
            .service
            .decode_item(&reply.response.body, reply.response.content_type())?;
        Ok(Decoded::items(item.into_iter().collect()))
    }
}

/// One resource to replace
#[derive(Debug, Clone)]
pub struct Modification {
    pub url: Url,
    pub body: Body,
    /// Expected entity tag; `None` sends `If-Match: *`
    pub etag: Option<String>,
}

/// PUT each modification to its resource URL
#[derive(Debug)]
pub struct ModifyJob<S> {
    service: S,
    modifications: Vec<Modification>,
}

impl<S: Service> ModifyJob<S> {
    pub fn new(service: S, modifications: Vec<Modification>) -> Self {
        ModifyJob {
            service,
            modifications,
        }
    }
}

impl<S: Service> Job for ModifyJob<S> {
    type Item = S::Item;

    fn kind(&self) -> OperationKind {
        OperationKind::Modify
    }

    fn protocol_version(&self) -> Option<&str> {
        self.service.protocol_version()
    }

    fn targets(&mut self, owner: OperationId) -> Result<Vec<Request>> {
        self.modifications
            .drain(..)
            .map(|m| {
                let request = Request::new(owner, Method::PUT, m.url).with_body(m.body);
                conditional(request, m.etag.as_deref())
            })
            .collect()
    }

    fn on_response(&mut self, reply: Reply<'_>) -> std::result::Result<Decoded<S::Item>, DecodeError> {
        let item = self
            .service
            .decode_item(&reply.response.body, reply.response.content_type())?;
        Ok(Decoded::items(item.into_iter().collect()))
    }
}

/// DELETE each resource URL. The items of a finished delete are the URLs
/// that were removed.
#[derive(Debug)]
pub struct DeleteJob {
    targets: Vec<Url>,
    etag: Option<String>,
}

impl DeleteJob {
    pub fn new(targets: Vec<Url>) -> Self {
        DeleteJob { targets, etag: None }
    }

    /// Require every target to match `etag` instead of `*`
    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }
}

impl Job for DeleteJob {
    type Item = Url;

    fn kind(&self) -> OperationKind {
        OperationKind::Delete
    }

    fn targets(&mut self, owner: OperationId) -> Result<Vec<Request>> {
        self.targets
            .iter()
            .map(|url| conditional(Request::new(owner, Method::DELETE, url.clone()), self.etag.as_deref()))
            .collect()
    }

    fn on_response(&mut self, reply: Reply<'_>) -> std::result::Result<Decoded<Url>, DecodeError> {
        let target = self
            .targets
            .get(reply.target)
            .cloned()
            .unwrap_or_else(|| reply.request.url.clone());
        Ok(Decoded::items(vec![target]))
    }
}
