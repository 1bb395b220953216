//! Lifecycle of one logical operation.
//!
//! [`Operation`] is a plain state machine: [`Operation::handle`] maps an
//! [`Event`] to the [`Effect`]s the driver must carry out, without doing
//! any I/O itself. [`Operation::run`] is the driver that feeds it replies
//! from a [`DispatcherHandle`].
//!
//! ```text
//! Created --Start--> Running --(last reply)--> Finished
//!                    Running --(error/abort)--> Failed
//!                    Running --(next page)----> Running
//! ```

use crate::client::Config;
use crate::dispatcher::{Delivery, DispatcherHandle};
use crate::error::{ErrorCode, JobError};
use crate::job::{BatchPolicy, Job, OperationKind, Reply};
use crate::request::{params, OperationId, Request, RequestId};
use crate::response::HttpResponse;
use std::collections::{HashSet, VecDeque};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};
use url::Url;

/// State of an operation. `Finished` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Created,
    Running,
    Finished,
    Failed,
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Finished | State::Failed)
    }
}

/// Inputs of the state machine
#[derive(Debug)]
pub enum Event {
    Start,
    /// A 2xx reply for `request`
    Response {
        request: RequestId,
        response: HttpResponse,
    },
    /// The dispatcher gave up on `request`
    Failure { request: RequestId, error: JobError },
    Abort,
}

/// Work the driver performs on behalf of the state machine
#[derive(Debug)]
pub enum Effect {
    Dispatch(Request),
    Cancel(RequestId),
    Progress(Progress),
    /// The operation reached a terminal state
    Complete,
}

/// Progress report; carries no state-machine meaning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub processed: u64,
    pub total: u64,
}

/// Progress callback function type
pub type ProgressFn = Box<dyn Fn(Progress) + Send + Sync>;

/// One target of a best-effort batch that failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    /// Index of the target in the job's target list
    pub target: usize,
    pub url: Url,
    pub error: JobError,
}

/// The single terminal report of an operation
#[derive(Debug)]
pub struct Completion<T> {
    pub operation: OperationId,
    pub state: State,
    /// Every item accumulated before termination
    pub items: Vec<T>,
    /// Set exactly when `state` is `Failed`
    pub error: Option<JobError>,
    /// Per-target failures of a best-effort batch
    pub failures: Vec<ItemFailure>,
}

impl<T> Completion<T> {
    pub fn is_finished(&self) -> bool {
        self.state == State::Finished
    }

    /// The items of a finished operation, or its error
    pub fn into_result(self) -> Result<Vec<T>, JobError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.items),
        }
    }
}

/// Cancels a running operation from outside its driver
#[derive(Debug, Clone)]
pub struct AbortHandle(CancellationToken);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.0.is_cancelled()
    }
}

/// One logical operation and its accumulated results
pub struct Operation<J: Job> {
    id: OperationId,
    job: J,
    state: State,
    policy: BatchPolicy,
    config: Config,
    fields: Vec<String>,
    items: Vec<J::Item>,
    error: Option<JobError>,
    failures: Vec<ItemFailure>,
    backlog: VecDeque<(usize, Request)>,
    current: Option<(usize, Request)>,
    targets: u64,
    processed: u64,
    pages: u32,
    fetched: HashSet<Url>,
    cancel: CancellationToken,
    progress: Option<ProgressFn>,
}

impl<J: Job> Operation<J> {
    pub fn new(job: J) -> Self {
        let policy = job.kind().default_batch_policy();
        Operation {
            id: OperationId::new(),
            job,
            state: State::Created,
            policy,
            config: Config::default(),
            fields: Vec::new(),
            items: Vec::new(),
            error: None,
            failures: Vec::new(),
            backlog: VecDeque::new(),
            current: None,
            targets: 0,
            processed: 0,
            pages: 0,
            fetched: HashSet::new(),
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    /// Override the kind's default failure policy
    pub fn with_batch_policy(mut self, policy: BatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Limit the reply to `fields` via the `fields` query parameter
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Use `config` for page bounds and standard parameters. [`run`](Self::run)
    /// applies the dispatcher's config instead.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn on_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn kind(&self) -> OperationKind {
        self.job.kind()
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle(self.cancel.clone())
    }

    /// Advance the state machine by one event
    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        match event {
            Event::Start => self.start(),
            Event::Response { request, response } => {
                if !self.is_current(request) {
                    debug!(operation = %self.id, request = %request, "discarding stale reply");
                    return Vec::new();
                }
                self.on_response(response)
            }
            Event::Failure { request, error } => {
                if !self.is_current(request) {
                    debug!(operation = %self.id, request = %request, "discarding stale failure");
                    return Vec::new();
                }
                self.on_failure(error)
            }
            Event::Abort => self.abort(),
        }
    }

    /// Consume the operation into its terminal report
    pub fn into_completion(self) -> Completion<J::Item> {
        let (state, error) = match (self.state, self.error) {
            (State::Finished, _) => (State::Finished, None),
            (State::Failed, Some(error)) => (State::Failed, Some(error)),
            (_, error) => (
                State::Failed,
                Some(error.unwrap_or_else(|| {
                    JobError::new(ErrorCode::InternalError, "operation ended before completing")
                })),
            ),
        };

        Completion {
            operation: self.id,
            state,
            items: self.items,
            error,
            failures: self.failures,
        }
    }

    fn is_current(&self, request: RequestId) -> bool {
        self.state == State::Running && matches!(self.current, Some((_, ref r)) if r.id == request)
    }

    fn start(&mut self) -> Vec<Effect> {
        if self.state != State::Created {
            warn!(operation = %self.id, state = ?self.state, "operation already started");
            return Vec::new();
        }
        self.state = State::Running;

        let targets = match self.job.targets(self.id) {
            Ok(targets) => targets,
            Err(e) => return self.fail(JobError::new(ErrorCode::BadRequest, e.to_string())),
        };

        let mut backlog = VecDeque::with_capacity(targets.len());
        for (index, request) in targets.into_iter().enumerate() {
            match self.decorate(request) {
                Ok(request) => backlog.push_back((index, request)),
                Err(e) => return self.fail(e),
            }
        }
        self.targets = backlog.len() as u64;
        self.backlog = backlog;

        self.advance(Vec::new())
    }

    /// Add the standard query parameters and the protocol-version header
    fn decorate(&self, request: Request) -> Result<Request, JobError> {
        let mut request = request.with_default_query(
            params::PRETTY_PRINT,
            if self.config.pretty_print { "true" } else { "false" },
        );
        if !self.fields.is_empty() {
            request = request.with_default_query(params::FIELDS, &self.fields.join(","));
        }
        if let Some(version) = self.job.protocol_version() {
            request = request
                .with_header(&self.config.version_header, version)
                .map_err(|e| JobError::new(ErrorCode::BadRequest, e.to_string()))?;
        }
        Ok(request)
    }

    fn on_response(&mut self, response: HttpResponse) -> Vec<Effect> {
        let Some((target, request)) = self.current.take() else {
            return Vec::new();
        };

        let decoded = match self.job.on_response(Reply {
            target,
            request: &request,
            response: &response,
        }) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(operation = %self.id, url = %request.url, error = %e, "failed to decode reply");
                return self.fail(e.into());
            }
        };

        let page_len = decoded.items.len() as u64;
        self.items.extend(decoded.items);
        self.fetched.insert(request.url.clone());
        self.pages += 1;

        let mut effects = Vec::new();

        match decoded.next_page {
            Some(next) => {
                let next = match self.decorate(request.continuation(next)) {
                    Ok(next) => next,
                    Err(e) => return self.fail(e),
                };
                if self.fetched.contains(&next.url) {
                    return self.fail(JobError::invalid_response(format!(
                        "feed cursor points back to {}",
                        next.url
                    )));
                }
                if self.pages >= self.config.max_pages {
                    return self.fail(JobError::invalid_response(format!(
                        "feed exceeded {} pages",
                        self.config.max_pages
                    )));
                }

                if let Some(total) = decoded.total_results {
                    let seen = decoded
                        .start_index
                        .map(|start| start.saturating_sub(1).saturating_add(page_len))
                        .unwrap_or(self.items.len() as u64);
                    effects.push(Effect::Progress(Progress {
                        processed: seen.min(total),
                        total,
                    }));
                }

                debug!(operation = %self.id, page = self.pages, next = %next.url, "requesting next page");
                self.current = Some((target, next.clone()));
                effects.push(Effect::Dispatch(next));
                effects
            }
            None => {
                self.processed += 1;
                effects.push(Effect::Progress(Progress {
                    processed: self.processed,
                    total: self.targets,
                }));
                self.advance(effects)
            }
        }
    }

    fn on_failure(&mut self, error: JobError) -> Vec<Effect> {
        let Some((target, request)) = self.current.take() else {
            return Vec::new();
        };

        match self.policy {
            BatchPolicy::AllOrNothing => self.fail(error),
            BatchPolicy::BestEffort => {
                warn!(operation = %self.id, target, url = %request.url, error = %error, "target failed, continuing");
                self.failures.push(ItemFailure {
                    target,
                    url: request.url,
                    error,
                });
                self.processed += 1;
                let effects = vec![Effect::Progress(Progress {
                    processed: self.processed,
                    total: self.targets,
                })];
                self.advance(effects)
            }
        }
    }

    /// Dispatch the next backlog item, or terminate when the backlog is drained
    fn advance(&mut self, mut effects: Vec<Effect>) -> Vec<Effect> {
        if let Some((target, request)) = self.backlog.pop_front() {
            self.current = Some((target, request.clone()));
            effects.push(Effect::Dispatch(request));
            return effects;
        }

        match self.failures.first() {
            None => {
                self.terminate(State::Finished, None);
            }
            Some(first) => {
                let error = JobError::new(
                    first.error.code,
                    format!(
                        "{} of {} requests failed; first: {}",
                        self.failures.len(),
                        self.targets,
                        first.error.message
                    ),
                );
                self.terminate(State::Failed, Some(error));
            }
        }
        effects.push(Effect::Complete);
        effects
    }

    fn fail(&mut self, error: JobError) -> Vec<Effect> {
        self.backlog.clear();
        self.current = None;
        self.terminate(State::Failed, Some(error));
        vec![Effect::Complete]
    }

    fn abort(&mut self) -> Vec<Effect> {
        if self.state.is_terminal() {
            return Vec::new();
        }

        let mut effects = Vec::new();
        if let Some((_, request)) = self.current.take() {
            effects.push(Effect::Cancel(request.id));
        }
        self.backlog.clear();
        self.terminate(State::Failed, Some(JobError::cancelled()));
        effects.push(Effect::Complete);
        effects
    }

    fn terminate(&mut self, state: State, error: Option<JobError>) {
        debug_assert!(!self.state.is_terminal(), "operation completed twice");
        self.state = state;
        self.error = error;
    }

    fn report(&self, progress: Progress) {
        if let Some(ref callback) = self.progress {
            callback(progress);
        }
    }

    /// Drive the operation to completion through `dispatcher`
    pub async fn run(mut self, dispatcher: &DispatcherHandle) -> Completion<J::Item> {
        self.config = dispatcher.config().clone();
        let span = info_span!("operation", id = %self.id, kind = ?self.job.kind());

        async move {
            let cancel = self.cancel.clone();
            let mut effects = if cancel.is_cancelled() {
                self.handle(Event::Abort)
            } else {
                self.handle(Event::Start)
            };

            loop {
                let mut waiting: Option<(RequestId, oneshot::Receiver<Delivery>)> = None;
                let mut rejected: Option<Event> = None;

                for effect in effects.drain(..) {
                    match effect {
                        Effect::Dispatch(request) => {
                            let id = request.id;
                            match dispatcher.submit(request) {
                                Ok(rx) => waiting = Some((id, rx)),
                                Err(e) => {
                                    rejected = Some(Event::Failure {
                                        request: id,
                                        error: JobError::new(ErrorCode::TransportError, e.to_string()),
                                    })
                                }
                            }
                        }
                        Effect::Cancel(request) => dispatcher.cancel(request),
                        Effect::Progress(progress) => self.report(progress),
                        Effect::Complete => return self.into_completion(),
                    }
                }

                let event = match (rejected, waiting) {
                    (Some(event), _) => event,
                    (None, Some((request, rx))) => {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => Event::Abort,
                            delivery = rx => match delivery {
                                Ok(Delivery::Response(response)) => Event::Response { request, response },
                                Ok(Delivery::Failed(error)) => Event::Failure { request, error },
                                Err(_) => Event::Failure {
                                    request,
                                    error: JobError::new(ErrorCode::TransportError, "dispatcher dropped the request"),
                                },
                            },
                        }
                    }
                    (None, None) => {
                        // Nothing in flight and not terminal: the machine is stuck.
                        let error = JobError::new(ErrorCode::InternalError, "operation stalled");
                        self.fail(error);
                        return self.into_completion();
                    }
                };

                effects = self.handle(event);
            }
        }
        .instrument(span)
        .await
    }

    /// Run the operation on a new task
    pub fn spawn(self, dispatcher: DispatcherHandle) -> JoinHandle<Completion<J::Item>> {
        tokio::spawn(async move { self.run(&dispatcher).await })
    }
}
