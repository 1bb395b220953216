//! Response decoding for one API family.
//!
//! A [`Service`] turns reply bodies into typed items and, for paginated
//! feeds, fills in the [`FeedCursor`] that tells the operation where the
//! next page lives. [`JsonService`] covers the JSON envelope style
//! (`{"items": [...], "nextPageToken": "..."}`), [`AtomService`] the
//! Atom/XML style (`<entry>` elements and `<link rel="next">`).

use crate::error::DecodeError;
use crate::request::params;
use crate::response::{string_at, value_at, ContentType};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::marker::PhantomData;
use url::Url;

/// Pagination state of one decoded page. Created fresh for every page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedCursor {
    /// URL that produced the current page
    pub request_url: Url,
    /// URL of the next page, if the feed has one
    pub next_page: Option<Url>,
    /// Index of the first item of this page, when the feed reports it
    pub start_index: Option<u64>,
    /// Total number of items in the feed, when the feed reports it
    pub total_results: Option<u64>,
    /// Token for incremental sync, when the feed reports it
    pub sync_token: Option<String>,
}

impl FeedCursor {
    pub fn new(request_url: Url) -> Self {
        FeedCursor {
            request_url,
            next_page: None,
            start_index: None,
            total_results: None,
            sync_token: None,
        }
    }

    /// Set the next page from a "next link" field. Relative links are
    /// resolved against the current request URL.
    pub fn set_next_link(&mut self, link: &str) -> Result<(), DecodeError> {
        let next = self
            .request_url
            .join(link)
            .map_err(|e| DecodeError::Malformed(format!("invalid next link '{}': {}", link, e)))?;
        self.next_page = Some(next);
        Ok(())
    }

    /// Set the next page for APIs that only return a page token: the
    /// current request URL with `param` replaced by `token`. Every other
    /// query parameter is passed through unmodified.
    pub fn merge_page_token(&mut self, param: &str, token: &str) {
        let mut next = self.request_url.clone();
        let retained: Vec<(String, String)> = self
            .request_url
            .query_pairs()
            .filter(|(k, _)| k != param)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        {
            let mut query = next.query_pairs_mut();
            query.clear();
            for (k, v) in &retained {
                query.append_pair(k, v);
            }
            query.append_pair(param, token);
        }

        self.next_page = Some(next);
    }
}

/// Decoder capability of one API family
pub trait Service: Send + Sync + 'static {
    /// Type of the decoded resources
    type Item: Send + 'static;

    /// Value of the protocol-version header sent with every request
    fn protocol_version(&self) -> Option<&str> {
        None
    }

    /// Decode one page of a feed, filling `cursor` when more pages remain
    fn decode_feed(
        &self,
        body: &[u8],
        content_type: ContentType,
        cursor: &mut FeedCursor,
    ) -> Result<Vec<Self::Item>, DecodeError>;

    /// Decode a single resource. An empty body yields `None`.
    fn decode_item(&self, body: &[u8], content_type: ContentType) -> Result<Option<Self::Item>, DecodeError>;
}

fn unsupported(expected: &str, got: ContentType) -> DecodeError {
    DecodeError::UnsupportedContentType(format!("{:?} (expected {})", got, expected))
}

fn is_blank(body: &[u8]) -> bool {
    body.iter().all(|b| b.is_ascii_whitespace())
}

/// Service for JSON APIs. Field locations are slash-separated paths into
/// the feed envelope.
#[derive(Debug, Clone)]
pub struct JsonService<T> {
    items_path: String,
    next_link_path: Option<String>,
    page_token_path: Option<String>,
    page_token_param: String,
    total_path: Option<String>,
    start_index_path: Option<String>,
    sync_token_path: Option<String>,
    protocol_version: Option<String>,
    _item: PhantomData<fn() -> T>,
}

impl<T> Default for JsonService<T> {
    fn default() -> Self {
        JsonService {
            items_path: "items".to_string(),
            next_link_path: Some("nextLink".to_string()),
            page_token_path: Some("nextPageToken".to_string()),
            page_token_param: params::PAGE_TOKEN.to_string(),
            total_path: None,
            start_index_path: None,
            sync_token_path: Some("nextSyncToken".to_string()),
            protocol_version: None,
            _item: PhantomData,
        }
    }
}

impl<T> JsonService<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items_path(mut self, path: impl Into<String>) -> Self {
        self.items_path = path.into();
        self
    }

    pub fn with_next_link_path(mut self, path: Option<&str>) -> Self {
        self.next_link_path = path.map(str::to_string);
        self
    }

    /// Where the page token lives in the envelope, and which query
    /// parameter carries it on the next request
    pub fn with_page_token(mut self, path: Option<&str>, param: impl Into<String>) -> Self {
        self.page_token_path = path.map(str::to_string);
        self.page_token_param = param.into();
        self
    }

    pub fn with_totals(mut self, start_index_path: Option<&str>, total_path: Option<&str>) -> Self {
        self.start_index_path = start_index_path.map(str::to_string);
        self.total_path = total_path.map(str::to_string);
        self
    }

    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = Some(version.into());
        self
    }
}

impl<T> Service for JsonService<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Item = T;

    fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.as_deref()
    }

    fn decode_feed(
        &self,
        body: &[u8],
        content_type: ContentType,
        cursor: &mut FeedCursor,
    ) -> Result<Vec<T>, DecodeError> {
        if content_type != ContentType::Json {
            return Err(unsupported("JSON", content_type));
        }

        let envelope: Value = serde_json::from_slice(body)?;
        if !envelope.is_object() {
            return Err(DecodeError::Malformed("feed is not a JSON object".to_string()));
        }

        let items = match value_at(&envelope, &self.items_path) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .cloned()
                .map(serde_json::from_value)
                .collect::<Result<Vec<T>, _>>()?,
            Some(_) => {
                return Err(DecodeError::Malformed(format!(
                    "'{}' is not an array",
                    self.items_path
                )))
            }
        };

        let next_link = self
            .next_link_path
            .as_deref()
            .and_then(|path| string_at(&envelope, path));
        let page_token = self
            .page_token_path
            .as_deref()
            .and_then(|path| string_at(&envelope, path));

        if let Some(link) = next_link {
            cursor.set_next_link(&link)?;
        } else if let Some(token) = page_token {
            cursor.merge_page_token(&self.page_token_param, &token);
        }

        let number_at = |path: &Option<String>| {
            path.as_deref()
                .and_then(|p| value_at(&envelope, p))
                .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        };
        cursor.start_index = number_at(&self.start_index_path);
        cursor.total_results = number_at(&self.total_path);
        cursor.sync_token = self
            .sync_token_path
            .as_deref()
            .and_then(|path| string_at(&envelope, path));

        Ok(items)
    }

    fn decode_item(&self, body: &[u8], content_type: ContentType) -> Result<Option<T>, DecodeError> {
        if is_blank(body) {
            return Ok(None);
        }
        if content_type != ContentType::Json {
            return Err(unsupported("JSON", content_type));
        }
        Ok(Some(serde_json::from_slice(body)?))
    }
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@rel", default)]
    rel: String,
    #[serde(rename = "@href")]
    href: String,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
struct AtomFeed<T> {
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    #[serde(rename = "entry", default = "Vec::new")]
    entries: Vec<T>,
    #[serde(rename = "openSearch:totalResults", alias = "totalResults", default)]
    total_results: Option<u64>,
    #[serde(rename = "openSearch:startIndex", alias = "startIndex", default)]
    start_index: Option<u64>,
}

/// Service for Atom feeds: items are the `<entry>` elements and the next
/// page is the `<link rel="next">` of the feed.
#[derive(Debug, Clone)]
pub struct AtomService<T> {
    protocol_version: Option<String>,
    _item: PhantomData<fn() -> T>,
}

impl<T> Default for AtomService<T> {
    fn default() -> Self {
        AtomService {
            protocol_version: None,
            _item: PhantomData,
        }
    }
}

impl<T> AtomService<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = Some(version.into());
        self
    }
}

impl<T> Service for AtomService<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Item = T;

    fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.as_deref()
    }

    fn decode_feed(
        &self,
        body: &[u8],
        content_type: ContentType,
        cursor: &mut FeedCursor,
    ) -> Result<Vec<T>, DecodeError> {
        if content_type != ContentType::Xml {
            return Err(unsupported("XML", content_type));
        }

        let text = std::str::from_utf8(body).map_err(|e| DecodeError::Malformed(e.to_string()))?;
        let feed: AtomFeed<T> = quick_xml::de::from_str(text)?;

        if let Some(next) = feed.links.iter().find(|l| l.rel == "next") {
            cursor.set_next_link(&next.href)?;
        }
        cursor.start_index = feed.start_index;
        cursor.total_results = feed.total_results;

        Ok(feed.entries)
    }

    fn decode_item(&self, body: &[u8], content_type: ContentType) -> Result<Option<T>, DecodeError> {
        if is_blank(body) {
            return Ok(None);
        }
        if content_type != ContentType::Xml {
            return Err(unsupported("XML", content_type));
        }
        let text = std::str::from_utf8(body).map_err(|e| DecodeError::Malformed(e.to_string()))?;
        Ok(Some(quick_xml::de::from_str(text)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Task {
        id: String,
        title: String,
    }

    fn cursor(url: &str) -> FeedCursor {
        FeedCursor::new(Url::parse(url).unwrap())
    }

    #[test]
    fn test_merge_page_token_replaces_previous() {
        let mut c = cursor("https://api.example.com/lists/1/tasks?showDeleted=true&pageToken=old&maxResults=2");
        c.merge_page_token("pageToken", "abc");
        assert_eq!(
            c.next_page.unwrap().as_str(),
            "https://api.example.com/lists/1/tasks?showDeleted=true&maxResults=2&pageToken=abc"
        );
    }

    #[test]
    fn test_relative_next_link() {
        let mut c = cursor("https://api.example.com/feeds/a?start-index=1");
        c.set_next_link("/feeds/a?start-index=26").unwrap();
        assert_eq!(c.next_page.unwrap().as_str(), "https://api.example.com/feeds/a?start-index=26");
    }

    #[test]
    fn test_json_feed_with_page_token() {
        let service = JsonService::<Task>::new().with_totals(None, Some("totalItems"));
        let mut c = cursor("https://api.example.com/tasks");
        let body = br#"{
            "items": [{"id": "1", "title": "One"}, {"id": "2", "title": "Two"}],
            "nextPageToken": "abc",
            "totalItems": 3
        }"#;

        let items = service.decode_feed(body, ContentType::Json, &mut c).unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[1].title, "Two");
        assert_eq!(c.next_page.unwrap().as_str(), "https://api.example.com/tasks?pageToken=abc");
        assert_eq!(c.total_results, Some(3));
    }

    #[test]
    fn test_json_feed_last_page() {
        let service = JsonService::<Task>::new();
        let mut c = cursor("https://api.example.com/tasks?pageToken=abc");
        let body = br#"{"items": [{"id": "3", "title": "Three"}], "nextPageToken": null, "nextSyncToken": "s1"}"#;

        let items = service.decode_feed(body, ContentType::Json, &mut c).unwrap();

        assert_eq!(items, vec![Task { id: "3".into(), title: "Three".into() }]);
        assert!(c.next_page.is_none());
        assert_eq!(c.sync_token.as_deref(), Some("s1"));
    }

    #[test]
    fn test_json_feed_next_link_wins() {
        let service = JsonService::<Task>::new();
        let mut c = cursor("https://api.example.com/tasks");
        let body = br#"{"items": [], "nextLink": "https://api.example.com/tasks?page=2", "nextPageToken": "x"}"#;

        service.decode_feed(body, ContentType::Json, &mut c).unwrap();
        assert_eq!(c.next_page.unwrap().as_str(), "https://api.example.com/tasks?page=2");
    }

    #[test]
    fn test_json_feed_rejects_malformed() {
        let service = JsonService::<Task>::new();
        let mut c = cursor("https://api.example.com/tasks");

        assert!(matches!(
            service.decode_feed(b"{not json", ContentType::Json, &mut c),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            service.decode_feed(br#"{"items": {"id": "1"}}"#, ContentType::Json, &mut c),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            service.decode_feed(b"<feed/>", ContentType::Xml, &mut c),
            Err(DecodeError::UnsupportedContentType(_))
        ));
    }

    #[test]
    fn test_json_item() {
        let service = JsonService::<Task>::new();
        let task = service
            .decode_item(br#"{"id": "9", "title": "Nine"}"#, ContentType::Json)
            .unwrap();
        assert_eq!(task, Some(Task { id: "9".into(), title: "Nine".into() }));
        assert_eq!(service.decode_item(b"", ContentType::Unknown).unwrap(), None);
    }

    #[test]
    fn test_atom_feed() {
        let service = AtomService::<Task>::new().with_protocol_version("3.0");
        let mut c = cursor("https://api.example.com/feeds/contacts?max-results=2");
        let body = br#"<?xml version="1.0" encoding="UTF-8"?>
            <feed xmlns="http://www.w3.org/2005/Atom">
              <id>contacts</id>
              <link rel="self" href="https://api.example.com/feeds/contacts?max-results=2"/>
              <link rel="next" href="https://api.example.com/feeds/contacts?start-index=3&amp;max-results=2"/>
              <entry><id>1</id><title>One</title></entry>
              <entry><id>2</id><title>Two</title></entry>
            </feed>"#;

        let items = service.decode_feed(body, ContentType::Xml, &mut c).unwrap();

        assert_eq!(service.protocol_version(), Some("3.0"));
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "1");
        assert_eq!(
            c.next_page.unwrap().as_str(),
            "https://api.example.com/feeds/contacts?start-index=3&max-results=2"
        );
    }

    #[test]
    fn test_atom_feed_without_next() {
        let service = AtomService::<Task>::new();
        let mut c = cursor("https://api.example.com/feeds/contacts");
        let body = br#"<feed><entry><id>1</id><title>One</title></entry></feed>"#;

        let items = service.decode_feed(body, ContentType::Xml, &mut c).unwrap();
        assert_eq!(items.len(), 1);
        assert!(c.next_page.is_none());
    }
}
