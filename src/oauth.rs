use crate::client::create_rest_client;
use crate::credentials::{CredentialStore, RefreshNotifier};
use crate::error::{parse_error_message, Error, Result};
use crate::token::{Credentials, TokenResponse};
use parking_lot::RwLock;
use reqwest::Client;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// Credential store that renews tokens with the OAuth2 refresh grant
/// (`grant_type=refresh_token`) against a token endpoint.
#[derive(Debug, Clone)]
pub struct OAuthStore {
    client: Client,
    token_url: Url,
    client_id: String,
    client_secret: Option<String>,
    credentials: Arc<RwLock<Credentials>>,
}

impl OAuthStore {
    pub fn new(token_url: Url, client_id: impl Into<String>, credentials: Credentials) -> Result<Self> {
        Ok(Self::with_client(create_rest_client()?, token_url, client_id, credentials))
    }

    pub fn with_client(
        client: Client,
        token_url: Url,
        client_id: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        OAuthStore {
            client,
            token_url,
            client_id: client_id.into(),
            client_secret: None,
            credentials: Arc::new(RwLock::new(credentials)),
        }
    }

    /// Set the client secret sent with refresh requests
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Snapshot of the current credentials
    pub fn credentials(&self) -> Credentials {
        self.credentials.read().clone()
    }

    /// Perform the refresh handshake and store the renewed credentials.
    /// Returns the new access token.
    pub async fn refresh(&self) -> Result<String> {
        let refresh_token = {
            let credentials = self.credentials.read();
            if !credentials.has_refresh_token() {
                return Err(Error::Refresh("no refresh token available".to_string()));
            }
            credentials.refresh_token.clone()
        };

        let mut form = vec![
            ("grant_type", "refresh_token".to_string()),
            ("client_id", self.client_id.clone()),
            ("refresh_token", refresh_token),
        ];
        if let Some(ref secret) = self.client_secret {
            form.push(("client_secret", secret.clone()));
        }

        debug!(url = %self.token_url, "requesting new access token");
        let response = self
            .client
            .post(self.token_url.clone())
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(Error::Refresh(format!(
                "token endpoint returned {}: {}",
                status.as_u16(),
                parse_error_message(&body)
            )));
        }

        let renewed: TokenResponse = serde_json::from_slice(&body)?;
        if renewed.access_token.is_empty() {
            return Err(Error::Other("token endpoint returned an empty access token".to_string()));
        }

        let access_token = renewed.access_token.clone();
        self.credentials.write().apply(renewed);
        Ok(access_token)
    }
}

impl CredentialStore for OAuthStore {
    fn access_token(&self) -> Option<String> {
        let credentials = self.credentials.read();
        Some(credentials.access_token.clone()).filter(|t| !t.is_empty())
    }

    fn request_refresh(&self, notifier: RefreshNotifier) {
        let store = self.clone();
        tokio::spawn(async move {
            match store.refresh().await {
                Ok(token) => notifier.succeeded(token),
                Err(e) => {
                    warn!(error = %e, "token refresh failed");
                    notifier.failed(e.to_string());
                }
            }
        });
    }
}
