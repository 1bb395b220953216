use crate::error::Result;
use reqwest::{redirect, Client, ClientBuilder};
use std::time::Duration;

/// Create the default HTTP client for API requests
/// with settings for connection pooling and timeouts.
/// Redirects are left to the dispatcher.
pub fn create_rest_client() -> Result<Client> {
    let client = ClientBuilder::new()
        .pool_max_idle_per_host(50)
        .timeout(Duration::from_secs(300)) // 5 minutes
        .connect_timeout(Duration::from_secs(10))
        .redirect(redirect::Policy::none())
        .build()?;
    Ok(client)
}

/// Configuration for the dispatcher and the operations it serves
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of 302 hops followed for one request
    pub max_redirects: u32,
    /// Maximum number of feed pages fetched by one operation
    pub max_pages: u32,
    /// How many times a request is replayed after a successful refresh
    /// before a further 401 is reported to its operation
    pub max_auth_retries: u32,
    /// A refresh that has not resolved after this long counts as failed
    pub refresh_timeout: Duration,
    /// Name of the protocol-version header
    pub version_header: String,
    /// Value of the `prettyPrint` query parameter
    pub pretty_print: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_redirects: 5,
            max_pages: 1000,
            max_auth_retries: 1,
            refresh_timeout: Duration::from_secs(60),
            version_header: "GData-Version".to_string(),
            pretty_print: false,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the redirect bound
    pub fn with_max_redirects(mut self, max_redirects: u32) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    /// Set the pagination bound
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn with_max_auth_retries(mut self, max_auth_retries: u32) -> Self {
        self.max_auth_retries = max_auth_retries;
        self
    }

    pub fn with_refresh_timeout(mut self, refresh_timeout: Duration) -> Self {
        self.refresh_timeout = refresh_timeout;
        self
    }

    pub fn with_version_header(mut self, version_header: impl Into<String>) -> Self {
        self.version_header = version_header.into();
        self
    }

    pub fn with_pretty_print(mut self, pretty_print: bool) -> Self {
        self.pretty_print = pretty_print;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.max_redirects, 5);
        assert_eq!(config.max_pages, 1000);
        assert_eq!(config.max_auth_retries, 1);
        assert_eq!(config.version_header, "GData-Version");
        assert!(!config.pretty_print);
    }

    #[test]
    fn test_config_builder() {
        let config = Config::new()
            .with_max_redirects(1)
            .with_max_pages(3)
            .with_refresh_timeout(Duration::from_millis(50))
            .with_pretty_print(true);
        assert_eq!(config.max_redirects, 1);
        assert_eq!(config.max_pages, 3);
        assert_eq!(config.refresh_timeout, Duration::from_millis(50));
        assert!(config.pretty_print);
    }
}
