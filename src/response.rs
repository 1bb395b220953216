use reqwest::header::{HeaderMap, CONTENT_TYPE, LOCATION};
use serde_json::Value;

/// Payload format of a reply, selected from its `Content-Type` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Json,
    Xml,
    Unknown,
}

impl ContentType {
    /// Classify a `Content-Type` header value. Parameters such as
    /// `charset` are ignored.
    pub fn from_header(value: &str) -> Self {
        let mime = value
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match mime.as_str() {
            "application/json" | "text/plain" => ContentType::Json,
            "application/atom+xml" | "application/xml" | "text/xml" => ContentType::Xml,
            m if m.ends_with("+json") => ContentType::Json,
            m if m.ends_with("+xml") => ContentType::Xml,
            _ => ContentType::Unknown,
        }
    }
}

/// Raw reply handed back by a transport
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, headers: HeaderMap, body: impl Into<Vec<u8>>) -> Self {
        HttpResponse {
            status,
            headers,
            body: body.into(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> ContentType {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ContentType::from_header)
            .unwrap_or(ContentType::Unknown)
    }

    pub fn location(&self) -> Option<&str> {
        self.headers.get(LOCATION).and_then(|v| v.to_str().ok())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Get a value by a slash-separated path.
/// For example, "user/name" would access the "name" field inside the "user" object,
/// and "items/0" the first element of the "items" array.
pub fn value_at<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;

    for part in path.split('/').filter(|s| !s.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(arr) => {
                let index: usize = part.parse().ok()?;
                arr.get(index)?
            }
            _ => return None,
        };
    }

    Some(current)
}

/// Get a string value by a slash-separated path; empty strings and nulls count as absent
pub fn string_at(value: &Value, path: &str) -> Option<String> {
    value_at(value, path)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_content_type_detection() {
        assert_eq!(ContentType::from_header("application/json; charset=UTF-8"), ContentType::Json);
        assert_eq!(ContentType::from_header("text/plain"), ContentType::Json);
        assert_eq!(ContentType::from_header("application/atom+xml"), ContentType::Xml);
        assert_eq!(ContentType::from_header("TEXT/XML"), ContentType::Xml);
        assert_eq!(ContentType::from_header("image/png"), ContentType::Unknown);
        assert_eq!(ContentType::from_header(""), ContentType::Unknown);
    }

    #[test]
    fn test_response_content_type_missing() {
        let response = HttpResponse::new(200, HeaderMap::new(), Vec::new());
        assert_eq!(response.content_type(), ContentType::Unknown);
    }

    #[test]
    fn test_response_location() {
        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, HeaderValue::from_static("https://elsewhere.example.com/x"));
        let response = HttpResponse::new(302, headers, Vec::new());
        assert_eq!(response.location(), Some("https://elsewhere.example.com/x"));
        assert!(!response.is_success());
    }

    #[test]
    fn test_value_at() {
        let value = serde_json::json!({"user": {"name": "test"}, "items": [1, 2]});
        assert_eq!(string_at(&value, "user/name"), Some("test".to_string()));
        assert_eq!(value_at(&value, "items/1"), Some(&serde_json::json!(2)));
        assert_eq!(value_at(&value, "items/9"), None);
        assert_eq!(value_at(&value, ""), Some(&value));
    }
}
