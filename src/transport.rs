use crate::client::create_rest_client;
use crate::error::{Result, TransportError};
use crate::request::Request;
use crate::response::HttpResponse;
use futures::future::BoxFuture;
use reqwest::Client;

/// Performs network I/O for fully formed requests.
///
/// `send` is called synchronously from the dispatcher, in dispatch order,
/// and returns the in-flight exchange as a future. Dropping the future (the
/// dispatcher does so on cancellation) must abort the exchange.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, request: &Request) -> BoxFuture<'static, std::result::Result<HttpResponse, TransportError>>;
}

/// Transport backed by a reqwest client. Redirects are not followed by the
/// client; the dispatcher handles them.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Create a transport with the default client settings
    pub fn new() -> Result<Self> {
        Ok(ReqwestTransport {
            client: create_rest_client()?,
        })
    }

    /// Wrap an existing client. It should be built with
    /// `redirect::Policy::none()` so 302 replies reach the dispatcher.
    pub fn with_client(client: Client) -> Self {
        ReqwestTransport { client }
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: &Request) -> BoxFuture<'static, std::result::Result<HttpResponse, TransportError>> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(ref body) = request.body {
            builder = builder.body(body.data.clone());
        }

        Box::pin(async move {
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let body = response.bytes().await?;
            Ok(HttpResponse::new(status, headers, body.to_vec()))
        })
    }
}
