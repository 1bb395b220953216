//! # jobwire - authenticated job dispatch for REST APIs
//!
//! A Rust engine for running logical API operations (fetch, create,
//! modify, delete) against JSON/XML REST services. Each operation may span
//! many HTTP exchanges; the engine takes care of authentication, expired
//! credentials, redirects and paginated feeds, and reports exactly one
//! completion per operation.
//!
//! ## Features
//!
//! - Dispatcher actor shared by any number of concurrent operations
//! - Single-flight OAuth2 token refresh with FIFO replay of buffered requests
//! - Transparent `302` redirect following with a hop bound
//! - Feed pagination via next links or merged page tokens
//! - Per-kind batch failure policies for multi-target operations
//! - Cancellation through abort handles
//!
//! ## Basic Usage
//!
//! ```no_run
//! use jobwire::{Config, Credentials, Dispatcher, FetchJob, JsonService, OAuthStore, Operation, ReqwestTransport};
//! use serde::Deserialize;
//! use std::sync::Arc;
//! use url::Url;
//!
//! #[derive(Deserialize)]
//! struct Task {
//!     id: String,
//!     title: String,
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = OAuthStore::new(
//!     Url::parse("https://oauth2.example.com/token")?,
//!     "client_id",
//!     Credentials::new("access".to_string(), "refresh".to_string(), 3600),
//! )?;
//! let dispatcher = Dispatcher::spawn(Config::default(), Arc::new(ReqwestTransport::new()?), Arc::new(store));
//!
//! let job = FetchJob::feed(
//!     JsonService::<Task>::new(),
//!     Url::parse("https://api.example.com/tasks/v1/lists/@default/tasks")?,
//! );
//! let tasks = Operation::new(job).run(&dispatcher).await.into_result()?;
//!
//! for task in tasks {
//!     println!("{}: {}", task.id, task.title);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod credentials;
pub mod dispatcher;
pub mod error;
pub mod job;
pub mod oauth;
pub mod operation;
pub mod request;
pub mod response;
pub mod service;
pub mod token;
pub mod transport;

// Re-export main types for convenience
pub use client::{create_rest_client, Config};
pub use credentials::{CredentialStore, RefreshNotifier, RefreshOutcome};
pub use dispatcher::{Delivery, Dispatcher, DispatcherHandle};
pub use error::{DecodeError, Error, ErrorCode, JobError, Result, TransportError};
pub use job::{
    BatchPolicy, CreateJob, Decoded, DeleteJob, FetchJob, Job, Modification, ModifyJob, OperationKind, Reply,
};
pub use oauth::OAuthStore;
pub use operation::{
    AbortHandle, Completion, Effect, Event, ItemFailure, Operation, Progress, ProgressFn, State,
};
pub use request::{Body, OperationId, Request, RequestId};
pub use response::{ContentType, HttpResponse};
pub use service::{AtomService, FeedCursor, JsonService, Service};
pub use token::{Credentials, TokenResponse};
pub use transport::{ReqwestTransport, Transport};
