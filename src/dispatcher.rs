//! Dispatch coordinator shared by every operation of one account.
//!
//! The dispatcher is an actor: a single tokio task owns the refresh lock,
//! the buffer of requests waiting for new credentials, and the table of
//! in-flight exchanges. Operations talk to it through a
//! [`DispatcherHandle`]; transport completions and credential-store
//! notifications arrive on the same mailbox, so every mutation of shared
//! state happens on that one task.
//!
//! Reply handling by status:
//!
//! - `200`, `201`, `204`: delivered to the owning operation.
//! - `302`: resent to `Location` right away, up to `max_redirects` hops.
//! - `401`: buffered, and a refresh is requested unless one is already
//!   running. When the refresh resolves the buffer is replayed in FIFO
//!   order, or failed as `Unauthorized`.
//! - anything else: delivered as a terminal error.

use crate::client::Config;
use crate::credentials::{CredentialStore, RefreshNotifier, RefreshOutcome};
use crate::error::{Error, ErrorCode, JobError, Result, TransportError};
use crate::request::{Request, RequestId};
use crate::response::HttpResponse;
use crate::transport::Transport;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// What the dispatcher hands back to the operation that submitted a request
#[derive(Debug)]
pub enum Delivery {
    /// A 2xx reply, ready for decoding
    Response(HttpResponse),
    /// The request failed terminally
    Failed(JobError),
}

#[derive(Debug)]
pub(crate) enum Command {
    Submit {
        request: Request,
        reply: oneshot::Sender<Delivery>,
    },
    Cancel {
        request: RequestId,
    },
    Completed {
        request: RequestId,
        result: std::result::Result<HttpResponse, TransportError>,
    },
    RefreshFinished {
        generation: u64,
        outcome: RefreshOutcome,
    },
    RefreshTimedOut {
        generation: u64,
    },
}

/// A submitted request and everything needed to route its reply.
/// `origin` is the id the operation knows; redirects keep it.
#[derive(Debug)]
struct Ticket {
    origin: RequestId,
    request: Request,
    reply: oneshot::Sender<Delivery>,
    redirects: u32,
    auth_retries: u32,
}

impl Ticket {
    fn deliver(self, delivery: Delivery) {
        if self.reply.send(delivery).is_err() {
            debug!(request = %self.origin, "operation no longer waiting for reply");
        }
    }
}

#[derive(Debug)]
struct InFlight {
    ticket: Ticket,
    token: Option<String>,
    task: JoinHandle<()>,
}

/// Cloneable entry point to a running dispatcher
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    tx: mpsc::UnboundedSender<Command>,
    config: Arc<Config>,
}

impl DispatcherHandle {
    /// Enqueue a request. The reply (or terminal failure) arrives on the
    /// returned receiver; nothing is reported synchronously.
    pub fn submit(&self, request: Request) -> Result<oneshot::Receiver<Delivery>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Submit { request, reply })
            .map_err(|_| Error::DispatcherClosed)?;
        Ok(rx)
    }

    /// Drop a request: abort it if in flight, unbuffer it if waiting for a
    /// refresh. Unknown ids are ignored.
    pub fn cancel(&self, request: RequestId) {
        let _ = self.tx.send(Command::Cancel { request });
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// The dispatch coordinator actor
pub struct Dispatcher {
    config: Arc<Config>,
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    mailbox: mpsc::WeakUnboundedSender<Command>,
    refreshing: bool,
    generation: u64,
    refresh_timer: Option<JoinHandle<()>>,
    pending: VecDeque<Ticket>,
    in_flight: HashMap<RequestId, InFlight>,
}

impl Dispatcher {
    /// Start a dispatcher on the current tokio runtime. It runs until every
    /// handle is dropped and no exchange is outstanding.
    pub fn spawn(
        config: Config,
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
    ) -> DispatcherHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = Arc::new(config);

        let dispatcher = Dispatcher {
            config: Arc::clone(&config),
            transport,
            store,
            mailbox: tx.downgrade(),
            refreshing: false,
            generation: 0,
            refresh_timer: None,
            pending: VecDeque::new(),
            in_flight: HashMap::new(),
        };
        tokio::spawn(dispatcher.run(rx));

        DispatcherHandle { tx, config }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            self.handle(command);
        }
        debug!("dispatcher shutting down");
        if let Some(timer) = self.refresh_timer.take() {
            timer.abort();
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Submit { request, reply } => {
                if reply.is_closed() {
                    return;
                }
                let ticket = Ticket {
                    origin: request.id,
                    request,
                    reply,
                    redirects: 0,
                    auth_retries: 0,
                };
                if self.refreshing {
                    debug!(request = %ticket.origin, url = %ticket.request.url, "refresh in progress, buffering request");
                    self.pending.push_back(ticket);
                } else {
                    self.dispatch(ticket, None);
                }
            }
            Command::Cancel { request } => self.cancel(request),
            Command::Completed { request, result } => self.completed(request, result),
            Command::RefreshFinished { generation, outcome } => {
                if self.refreshing && generation == self.generation {
                    self.finish_refresh(outcome);
                } else {
                    debug!(generation, "ignoring stale refresh notification");
                }
            }
            Command::RefreshTimedOut { generation } => {
                if self.refreshing && generation == self.generation {
                    warn!(timeout = ?self.config.refresh_timeout, "credential refresh timed out");
                    self.finish_refresh(RefreshOutcome::Failed("credential refresh timed out".to_string()));
                }
            }
        }
    }

    /// Hand a ticket to the transport. `token` overrides the store's
    /// current access token.
    fn dispatch(&mut self, ticket: Ticket, token: Option<String>) {
        let Some(mailbox) = self.mailbox.upgrade() else {
            ticket.deliver(Delivery::Failed(JobError::new(
                ErrorCode::TransportError,
                "dispatcher is shutting down",
            )));
            return;
        };

        let token = token.or_else(|| self.store.access_token());
        let request = ticket.request.authorized(token.as_deref());

        debug!(
            request = %ticket.origin,
            operation = %request.owner,
            method = %request.method,
            url = %request.url,
            "dispatching request"
        );
        if let Some(ref body) = request.body {
            trace!(request = %ticket.origin, body = %String::from_utf8_lossy(&body.data), "request body");
        }

        let exchange = self.transport.send(&request);
        let origin = ticket.origin;
        let task = tokio::spawn(async move {
            let result = exchange.await;
            let _ = mailbox.send(Command::Completed {
                request: origin,
                result,
            });
        });

        self.in_flight.insert(origin, InFlight { ticket, token, task });
    }

    fn cancel(&mut self, request: RequestId) {
        if let Some(in_flight) = self.in_flight.remove(&request) {
            debug!(request = %request, "cancelling in-flight request");
            in_flight.task.abort();
            return;
        }

        let before = self.pending.len();
        self.pending.retain(|t| t.origin != request);
        if self.pending.len() != before {
            debug!(request = %request, "dropped buffered request");
        }
    }

    fn completed(&mut self, request: RequestId, result: std::result::Result<HttpResponse, TransportError>) {
        let Some(InFlight { mut ticket, token, .. }) = self.in_flight.remove(&request) else {
            // Cancelled while the exchange was finishing.
            return;
        };

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!(request = %request, url = %ticket.request.url, error = %e, "transport failure");
                ticket.deliver(Delivery::Failed(e.into()));
                return;
            }
        };

        debug!(request = %request, status = response.status, "received reply");
        trace!(request = %request, body = %String::from_utf8_lossy(&response.body), "reply body");

        match ErrorCode::from_status(response.status) {
            ErrorCode::Ok | ErrorCode::Created | ErrorCode::NoContent => {
                ticket.deliver(Delivery::Response(response));
            }
            ErrorCode::TemporarilyMoved => self.redirect(ticket, &response),
            ErrorCode::Unauthorized => {
                if ticket.auth_retries >= self.config.max_auth_retries {
                    warn!(request = %request, "still unauthorized after refreshing credentials");
                    ticket.deliver(Delivery::Failed(JobError::from_status(response.status, &response.body)));
                    return;
                }

                // A refresh finished while this request was in flight with
                // the old token: just resend it.
                let current = self.store.access_token();
                if !self.refreshing && token.is_some() && current.is_some() && token != current {
                    debug!(request = %request, "token changed since dispatch, resending");
                    ticket.auth_retries += 1;
                    self.dispatch(ticket, current);
                    return;
                }

                ticket.auth_retries += 1;
                self.pending.push_back(ticket);
                if self.refreshing {
                    debug!(request = %request, "refresh already in progress, buffering request");
                } else {
                    self.begin_refresh();
                }
            }
            code => {
                let error = JobError::from_status(response.status, &response.body);
                warn!(request = %request, url = %ticket.request.url, status = response.status, ?code, "request failed");
                ticket.deliver(Delivery::Failed(error));
            }
        }
    }

    fn redirect(&mut self, mut ticket: Ticket, response: &HttpResponse) {
        let location = response
            .location()
            .and_then(|l| ticket.request.url.join(l).ok());
        let Some(location) = location else {
            ticket.deliver(Delivery::Failed(JobError::invalid_response(
                "redirect reply without a valid Location header",
            )));
            return;
        };

        if ticket.redirects >= self.config.max_redirects {
            let hops = ticket.redirects;
            ticket.deliver(Delivery::Failed(JobError::new(
                ErrorCode::TemporarilyMoved,
                format!("gave up after {} redirects, last to {}", hops, location),
            )));
            return;
        }

        debug!(request = %ticket.origin, location = %location, "temporarily moved");
        ticket.request = ticket.request.redirected(location);
        ticket.redirects += 1;
        self.dispatch(ticket, None);
    }

    fn begin_refresh(&mut self) {
        let Some(mailbox) = self.mailbox.upgrade() else {
            self.finish_refresh(RefreshOutcome::Failed("dispatcher is shutting down".to_string()));
            return;
        };

        self.refreshing = true;
        self.generation += 1;
        let generation = self.generation;
        info!(generation, "access token rejected, refreshing credentials");

        let timeout = self.config.refresh_timeout;
        let timer_mailbox = mailbox.clone();
        self.refresh_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = timer_mailbox.send(Command::RefreshTimedOut { generation });
        }));

        self.store.request_refresh(RefreshNotifier::new(generation, mailbox));
    }

    fn finish_refresh(&mut self, outcome: RefreshOutcome) {
        self.refreshing = false;
        if let Some(timer) = self.refresh_timer.take() {
            timer.abort();
        }

        let pending = std::mem::take(&mut self.pending);
        match outcome {
            RefreshOutcome::Succeeded(token) => {
                info!(replayed = pending.len(), "credentials refreshed");
                for ticket in pending {
                    self.dispatch(ticket, Some(token.clone()));
                }
            }
            RefreshOutcome::Failed(reason) => {
                warn!(failed = pending.len(), reason = %reason, "credential refresh failed");
                for ticket in pending {
                    ticket.deliver(Delivery::Failed(JobError::new(
                        ErrorCode::Unauthorized,
                        format!("failed to refresh credentials: {}", reason),
                    )));
                }
            }
        }
    }
}
