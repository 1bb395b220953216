use crate::dispatcher::Command;
use tokio::sync::mpsc;

/// Result of one refresh cycle as reported by a credential store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The store obtained a new access token
    Succeeded(String),
    /// The refresh handshake failed; buffered requests will fail as `Unauthorized`
    Failed(String),
}

/// Holder of the current access token and owner of the refresh handshake.
///
/// The dispatcher calls [`request_refresh`](CredentialStore::request_refresh)
/// at most once per refresh cycle and waits for the notifier to fire. The
/// call must not block; perform the handshake on a task and report through
/// the notifier.
///
/// Buffered requests are replayed with the token passed to
/// `succeeded`, but every later request is stamped from
/// [`access_token`](CredentialStore::access_token). Store the refreshed
/// token before firing the notifier, or the next request goes out with the
/// old one and starts another refresh cycle.
pub trait CredentialStore: Send + Sync + 'static {
    /// Current access token, or `None` when the store holds no token at all.
    /// Must already return the refreshed token when `succeeded` is called.
    fn access_token(&self) -> Option<String>;

    /// Start a refresh. Exactly one of `notifier.succeeded` / `notifier.failed`
    /// should eventually be called; dropping the notifier counts as a failure.
    fn request_refresh(&self, notifier: RefreshNotifier);
}

/// One-shot channel a credential store uses to report the end of a refresh
/// cycle back to the dispatcher that requested it.
#[derive(Debug)]
pub struct RefreshNotifier {
    generation: u64,
    tx: Option<mpsc::UnboundedSender<Command>>,
}

impl RefreshNotifier {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<Command>) -> Self {
        RefreshNotifier {
            generation,
            tx: Some(tx),
        }
    }

    pub fn succeeded(mut self, new_token: impl Into<String>) {
        self.notify(RefreshOutcome::Succeeded(new_token.into()));
    }

    pub fn failed(mut self, reason: impl Into<String>) {
        self.notify(RefreshOutcome::Failed(reason.into()));
    }

    fn notify(&mut self, outcome: RefreshOutcome) {
        if let Some(tx) = self.tx.take() {
            // The dispatcher may already be gone; nothing is waiting then.
            let _ = tx.send(Command::RefreshFinished {
                generation: self.generation,
                outcome,
            });
        }
    }
}

impl Drop for RefreshNotifier {
    fn drop(&mut self) {
        self.notify(RefreshOutcome::Failed(
            "credential store dropped the refresh without reporting".to_string(),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notifier_reports_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let notifier = RefreshNotifier::new(7, tx);
        notifier.succeeded("token");

        match rx.try_recv() {
            Ok(Command::RefreshFinished { generation, outcome }) => {
                assert_eq!(generation, 7);
                assert_eq!(outcome, RefreshOutcome::Succeeded("token".to_string()));
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_notifier_fails_refresh() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        drop(RefreshNotifier::new(1, tx));

        match rx.try_recv() {
            Ok(Command::RefreshFinished { outcome, .. }) => {
                assert!(matches!(outcome, RefreshOutcome::Failed(_)));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
