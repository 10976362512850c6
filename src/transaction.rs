//! Transactional task execution.
//!
//! A [`Transaction`] orders a sequence of named steps. Each step may
//! register a rollback action at any point before or during its forward
//! action; the action is recorded only once the forward action returns
//! normally. When a step fails, every recorded rollback runs in exact
//! reverse order, each on a best-effort basis (a rollback failure is
//! logged, never propagated), and the original error is re-raised
//! unchanged.
//!
//! Steps are strictly sequential: one step's forward action, including
//! all of its host fan-out, completes before the next starts. The
//! rollback list is owned by one transaction invocation and never
//! accessed concurrently.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::Result;

type BoxFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
type RollbackAction = Box<dyn FnOnce() -> BoxFuture + Send>;

/// Transaction lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// No forward action has run
    Pending,
    /// Executing steps
    Running,
    /// All steps completed; the rollback list was discarded
    Committed,
    /// Unwinding recorded rollbacks
    RollingBack,
    /// Unwind finished; the original error was re-raised
    RolledBack,
}

/// Handed to each step's forward action so it can register its rollback.
pub struct StepScope {
    name: String,
    rollback: Mutex<Option<RollbackAction>>,
}

impl StepScope {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rollback: Mutex::new(None),
        }
    }

    /// The step's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers the rollback action for this step. Registering again
    /// replaces the previous action; the action only ever executes if the
    /// step's forward action returns normally.
    pub fn on_rollback<F, Fut>(&self, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        *self.rollback.lock() = Some(Box::new(move || Box::pin(action())));
    }
}

/// An ordered sequence of steps with coordinated rollback on failure.
pub struct Transaction {
    state: TxState,
    rollbacks: Vec<(String, RollbackAction)>,
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Transaction {
    /// Creates a pending transaction.
    pub fn new() -> Self {
        Self {
            state: TxState::Pending,
            rollbacks: Vec::new(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TxState {
        self.state
    }

    /// Runs one step's forward action.
    ///
    /// On success, any rollback the step registered through its
    /// [`StepScope`] is appended to the rollback list. On failure, the
    /// step's own rollback is discarded, all previously recorded
    /// rollbacks run in reverse order, and the step's error is returned
    /// unchanged.
    pub async fn step<F, Fut>(&mut self, name: &str, body: F) -> Result<()>
    where
        F: FnOnce(Arc<StepScope>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        self.state = TxState::Running;
        info!(step = %name, "executing step");

        let scope = Arc::new(StepScope::new(name));
        match body(Arc::clone(&scope)).await {
            Ok(()) => {
                if let Some(action) = scope.rollback.lock().take() {
                    self.rollbacks.push((name.to_string(), action));
                }
                Ok(())
            }
            Err(err) => {
                warn!(step = %name, error = %err, "step failed, rolling back");
                self.unwind().await;
                Err(err)
            }
        }
    }

    /// Marks the transaction complete and discards the rollback list.
    pub fn commit(&mut self) {
        self.state = TxState::Committed;
        self.rollbacks.clear();
    }

    /// Runs every recorded rollback in reverse order, best-effort.
    async fn unwind(&mut self) {
        self.state = TxState::RollingBack;
        for (name, action) in self.rollbacks.drain(..).rev() {
            info!(step = %name, "rolling back step");
            if let Err(err) = action().await {
                // Suppressed so later rollback entries still run.
                warn!(step = %name, error = %err, "rollback action failed");
            }
        }
        self.state = TxState::RolledBack;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[tokio::test]
    async fn commit_discards_rollbacks() {
        let mut tx = Transaction::new();
        assert_eq!(tx.state(), TxState::Pending);

        tx.step("one", |scope| async move {
            scope.on_rollback(|| async { panic!("must not run") });
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(tx.state(), TxState::Running);
        tx.commit();
        assert_eq!(tx.state(), TxState::Committed);
    }

    #[tokio::test]
    async fn late_registration_replaces_earlier_action() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut tx = Transaction::new();

        let log_one = Arc::clone(&log);
        tx.step("one", |scope| async move {
            let first = Arc::clone(&log_one);
            scope.on_rollback(move || async move {
                first.lock().push("first");
                Ok(())
            });
            let second = Arc::clone(&log_one);
            scope.on_rollback(move || async move {
                second.lock().push("second");
                Ok(())
            });
            Ok(())
        })
        .await
        .unwrap();

        let result = tx
            .step("two", |_| async { Err::<(), _>(Error::NoPriorRelease) })
            .await;
        assert!(result.is_err());
        assert_eq!(*log.lock(), vec!["second"]);
    }
}
