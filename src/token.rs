use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Credentials represents an OAuth2 token pair with its validity.
/// It is owned by a credential store; the dispatcher only reads the access
/// token and asks the store to refresh it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Access token sent as `Authorization: Bearer <token>`
    pub access_token: String,

    /// Refresh token for renewing expired access tokens
    pub refresh_token: String,

    /// Token type (usually "Bearer")
    pub token_type: String,

    /// Expiration instant of the access token, if known
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    /// Create new credentials valid for `expires_in` seconds from now
    pub fn new(access_token: String, refresh_token: String, expires_in: i64) -> Self {
        Credentials {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_at: Some(Utc::now() + Duration::seconds(expires_in)),
        }
    }

    /// Check if we have a refresh token available
    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }

    /// Whether the access token is past its expiry. Unknown expiry counts as valid.
    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|at| at <= Utc::now()).unwrap_or(false)
    }

    /// Merge a token endpoint reply into these credentials. The endpoint may
    /// omit the refresh token, in which case the old one is kept.
    pub fn apply(&mut self, renewed: TokenResponse) {
        self.access_token = renewed.access_token;
        if let Some(refresh_token) = renewed.refresh_token.filter(|t| !t.is_empty()) {
            self.refresh_token = refresh_token;
        }
        if let Some(token_type) = renewed.token_type {
            self.token_type = token_type;
        }
        self.expires_at = renewed
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(secs));
    }
}

/// Reply of an OAuth2 token endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    #[serde(rename = "access_token")]
    pub access_token: String,

    #[serde(rename = "refresh_token", default)]
    pub refresh_token: Option<String>,

    #[serde(rename = "token_type", default)]
    pub token_type: Option<String>,

    /// Token lifetime in seconds
    #[serde(rename = "expires_in", default)]
    pub expires_in: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_creation() {
        let creds = Credentials::new("access123".to_string(), "refresh456".to_string(), 3600);

        assert_eq!(creds.access_token, "access123");
        assert_eq!(creds.token_type, "Bearer");
        assert!(creds.has_refresh_token());
        assert!(!creds.is_expired());
    }

    #[test]
    fn test_credentials_expired() {
        let creds = Credentials::new("a".to_string(), String::new(), -10);
        assert!(creds.is_expired());
        assert!(!creds.has_refresh_token());
    }

    #[test]
    fn test_apply_keeps_refresh_token() {
        let mut creds = Credentials::new("old".to_string(), "refresh".to_string(), -10);
        let renewed: TokenResponse =
            serde_json::from_str(r#"{"access_token": "new", "expires_in": 3600}"#).unwrap();

        creds.apply(renewed);

        assert_eq!(creds.access_token, "new");
        assert_eq!(creds.refresh_token, "refresh");
        assert!(!creds.is_expired());
    }
}
