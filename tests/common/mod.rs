#![allow(dead_code)]

use futures::future::BoxFuture;
use jobwire::{CredentialStore, HttpResponse, RefreshNotifier, Request, Transport, TransportError};
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, LOCATION};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// What the scripted transport does with one request
pub enum Scripted {
    Ready(Result<HttpResponse, TransportError>),
    /// Completes after a delay
    Delayed(Duration, Result<HttpResponse, TransportError>),
    /// Never completes; only cancellation ends the exchange
    Hang,
}

pub fn json(status: u16, body: &str) -> Scripted {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json; charset=UTF-8"));
    Scripted::Ready(Ok(HttpResponse::new(status, headers, body.as_bytes().to_vec())))
}

pub fn status(code: u16) -> Scripted {
    Scripted::Ready(Ok(HttpResponse::new(code, HeaderMap::new(), Vec::new())))
}

pub fn redirect(location: &str) -> Scripted {
    let mut headers = HeaderMap::new();
    headers.insert(LOCATION, HeaderValue::from_str(location).unwrap());
    Scripted::Ready(Ok(HttpResponse::new(302, headers, Vec::new())))
}

pub fn delayed(delay: Duration, scripted: Scripted) -> Scripted {
    match scripted {
        Scripted::Ready(result) | Scripted::Delayed(_, result) => Scripted::Delayed(delay, result),
        Scripted::Hang => Scripted::Hang,
    }
}

pub fn network_down() -> Scripted {
    Scripted::Ready(Err(TransportError("connection refused".to_string())))
}

type Handler = Box<dyn Fn(&Request) -> Scripted + Send + Sync>;

/// In-memory transport that records every request it is asked to send
pub struct MockTransport {
    calls: Mutex<Vec<Request>>,
    handler: Handler,
}

impl MockTransport {
    pub fn new(handler: impl Fn(&Request) -> Scripted + Send + Sync + 'static) -> Self {
        MockTransport {
            calls: Mutex::new(Vec::new()),
            handler: Box::new(handler),
        }
    }

    pub fn calls(&self) -> Vec<Request> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Paths of the requests that carried `Bearer <token>`, in send order
    pub fn paths_with_token(&self, token: &str) -> Vec<String> {
        let expected = format!("Bearer {}", token);
        self.calls
            .lock()
            .iter()
            .filter(|r| r.header("Authorization") == Some(expected.as_str()))
            .map(|r| r.url.path().to_string())
            .collect()
    }
}

impl Transport for MockTransport {
    fn send(&self, request: &Request) -> BoxFuture<'static, Result<HttpResponse, TransportError>> {
        self.calls.lock().push(request.clone());
        match (self.handler)(request) {
            Scripted::Ready(result) => Box::pin(async move { result }),
            Scripted::Delayed(delay, result) => Box::pin(async move {
                tokio::time::sleep(delay).await;
                result
            }),
            Scripted::Hang => Box::pin(futures::future::pending()),
        }
    }
}

pub enum RefreshMode {
    /// Hold the notifier until the test calls `complete`
    Manual,
    Succeed(String),
    Fail(String),
}

/// Credential store whose refresh behavior is chosen by the test
pub struct MockStore {
    token: Mutex<Option<String>>,
    refreshes: AtomicUsize,
    held: Mutex<Vec<RefreshNotifier>>,
    mode: RefreshMode,
}

impl MockStore {
    pub fn new(token: &str, mode: RefreshMode) -> Self {
        MockStore {
            token: Mutex::new(Some(token.to_string())),
            refreshes: AtomicUsize::new(0),
            held: Mutex::new(Vec::new()),
            mode,
        }
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Resolve every held refresh with `token`
    pub fn complete(&self, token: &str) {
        *self.token.lock() = Some(token.to_string());
        for notifier in self.held.lock().drain(..) {
            notifier.succeeded(token);
        }
    }

    /// Fail every held refresh by dropping its notifier. Returns how many
    /// were held.
    pub fn abandon(&self) -> usize {
        let held: Vec<RefreshNotifier> = self.held.lock().drain(..).collect();
        held.len()
    }

    /// Wait until at least `count` refreshes were requested
    pub async fn wait_for_refreshes(&self, count: usize) {
        for _ in 0..400 {
            if self.refreshes() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} refresh requests, saw {}", count, self.refreshes());
    }
}

impl CredentialStore for MockStore {
    fn access_token(&self) -> Option<String> {
        self.token.lock().clone()
    }

    fn request_refresh(&self, notifier: RefreshNotifier) {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            RefreshMode::Manual => self.held.lock().push(notifier),
            RefreshMode::Succeed(ref token) => {
                *self.token.lock() = Some(token.clone());
                notifier.succeeded(token.clone());
            }
            RefreshMode::Fail(ref reason) => notifier.failed(reason.clone()),
        }
    }
}
