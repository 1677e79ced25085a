//! Operation context threaded through every orchestrator call.
//!
//! A context carries the probe flag, the deadline, and the application locks
//! held by the logical operation it belongs to. Subcontexts share the lock
//! registry of their root, so a nested operation that needs a lock the batch
//! already holds reuses it instead of waiting on itself.
//!
//! Locks are only registered on the context when it was created with large
//! locks (multi-application batches). Single operations keep the lock guard on
//! the stack and release it when the call returns.

use crate::config::TimeoutConfig;
use crate::error::{OrchestratorError, Result};
use crate::types::ApplicationReference;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// Releases a held application lock when invoked.
pub type LockRelease = Box<dyn FnOnce() + Send>;

type LockRegistry = Arc<Mutex<Vec<(ApplicationReference, LockRelease)>>>;

/// Per-operation state: probe mode, deadline and held locks.
pub struct OperationContext {
    id: Uuid,
    probe: bool,
    large_locks: bool,
    deadline: Instant,
    timeouts: TimeoutConfig,
    locks: LockRegistry,
    root: bool,
}

impl OperationContext {
    /// Context for a single top-level operation.
    pub fn root(timeouts: &TimeoutConfig) -> Self {
        Self::new_root(timeouts, timeouts.single_op, false)
    }

    /// Context for an operation spanning `expected_groups` applications.
    ///
    /// The deadline scales with the batch size up to `max_batch`, and every
    /// application lock taken through this context stays held until the
    /// context is closed.
    pub fn for_multi_app_op(timeouts: &TimeoutConfig, expected_groups: usize) -> Self {
        Self::new_root(timeouts, timeouts.batch_timeout(expected_groups), true)
    }

    fn new_root(timeouts: &TimeoutConfig, budget: Duration, large_locks: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            probe: false,
            large_locks,
            deadline: Instant::now() + budget,
            timeouts: *timeouts,
            locks: Arc::new(Mutex::new(Vec::new())),
            root: true,
        }
    }

    /// Child context with its own probe flag, sharing deadline and locks.
    pub fn subcontext_for_single_app_op(&self, probe: bool) -> Self {
        Self {
            id: self.id,
            probe,
            large_locks: self.large_locks,
            deadline: self.deadline,
            timeouts: self.timeouts,
            locks: Arc::clone(&self.locks),
            root: false,
        }
    }

    /// Child context for undoing committed work, with a fresh rollback budget.
    pub fn subcontext_for_rollback(&self) -> Self {
        Self {
            id: self.id,
            probe: false,
            large_locks: self.large_locks,
            deadline: Instant::now() + self.timeouts.rollback,
            timeouts: self.timeouts,
            locks: Arc::clone(&self.locks),
            root: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn large_locks(&self) -> bool {
        self.large_locks
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline, or a timeout error once it has passed.
    pub fn remaining(&self) -> Result<Duration> {
        let now = Instant::now();
        if now >= self.deadline {
            return Err(OrchestratorError::Timeout(format!(
                "operation {} exceeded its deadline",
                self.id
            )));
        }
        Ok(self.deadline - now)
    }

    pub fn has_lock(&self, application: &ApplicationReference) -> bool {
        self.locks.lock().iter().any(|(app, _)| app == application)
    }

    /// Record that the lock of `application` is held by this context tree.
    ///
    /// Hands the release back when the context does not keep locks or when
    /// the lock is already registered; the caller then owns the release.
    pub fn register_lock_acquisition(
        &self,
        application: &ApplicationReference,
        release: LockRelease,
    ) -> std::result::Result<(), LockRelease> {
        if !self.large_locks {
            return Err(release);
        }

        let mut locks = self.locks.lock();
        if locks.iter().any(|(app, _)| app == application) {
            return Err(release);
        }
        locks.push((application.clone(), release));
        Ok(())
    }

    /// Release every registered lock, most recent first.
    ///
    /// Only the root context releases. Calling this more than once is a no-op.
    pub fn close(&self) {
        if !self.root {
            return;
        }

        let held: Vec<(ApplicationReference, LockRelease)> =
            std::mem::take(&mut *self.locks.lock());
        for (application, release) in held.into_iter().rev() {
            debug!(operation_id = %self.id, application = %application, "Releasing application lock");
            release();
        }
    }
}

impl Drop for OperationContext {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationContext")
            .field("id", &self.id)
            .field("probe", &self.probe)
            .field("large_locks", &self.large_locks)
            .field("deadline", &self.deadline)
            .field("held_locks", &self.locks.lock().len())
            .field("root", &self.root)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn app(name: &str) -> ApplicationReference {
        ApplicationReference::new("t", name, "prod", "r", "default")
    }

    fn recording_release(log: &Arc<Mutex<Vec<String>>>, name: &str) -> LockRelease {
        let log = Arc::clone(log);
        let name = name.to_string();
        Box::new(move || log.lock().push(name))
    }

    #[test]
    fn test_single_op_context_does_not_keep_locks() {
        let ctx = OperationContext::root(&TimeoutConfig::default());
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);

        let rejected = ctx.register_lock_acquisition(&app("a"), Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(rejected.is_err());
        assert!(!ctx.has_lock(&app("a")));

        // The caller still owns the release.
        if let Err(release) = rejected {
            release();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_locks_released_in_reverse_order_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let ctx = OperationContext::for_multi_app_op(&TimeoutConfig::default(), 2);

        assert!(ctx.register_lock_acquisition(&app("a"), recording_release(&log, "a")).is_ok());
        assert!(ctx.register_lock_acquisition(&app("b"), recording_release(&log, "b")).is_ok());
        assert!(ctx.has_lock(&app("a")));

        ctx.close();
        ctx.close();
        drop(ctx);

        assert_eq!(*log.lock(), vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_duplicate_registration_is_refused() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let ctx = OperationContext::for_multi_app_op(&TimeoutConfig::default(), 1);
        let sub = ctx.subcontext_for_single_app_op(true);

        assert!(sub.register_lock_acquisition(&app("a"), recording_release(&log, "first")).is_ok());
        assert!(ctx.register_lock_acquisition(&app("a"), recording_release(&log, "second")).is_err());
        assert!(ctx.has_lock(&app("a")));
        assert!(sub.is_probe());
        assert!(!ctx.is_probe());
    }

    #[test]
    fn test_subcontext_drop_keeps_locks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let ctx = OperationContext::for_multi_app_op(&TimeoutConfig::default(), 1);
        {
            let sub = ctx.subcontext_for_single_app_op(false);
            assert!(sub.register_lock_acquisition(&app("a"), recording_release(&log, "a")).is_ok());
        }
        assert!(log.lock().is_empty());
        assert!(ctx.has_lock(&app("a")));

        drop(ctx);
        assert_eq!(log.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_and_rollback_budget() {
        let timeouts = TimeoutConfig {
            single_op: Duration::from_secs(1),
            max_batch: Duration::from_secs(5),
            rollback: Duration::from_secs(2),
        };
        let ctx = OperationContext::for_multi_app_op(&timeouts, 3);
        assert_eq!(ctx.remaining().unwrap(), Duration::from_secs(3));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(matches!(ctx.remaining(), Err(OrchestratorError::Timeout(_))));

        let rollback = ctx.subcontext_for_rollback();
        assert_eq!(rollback.remaining().unwrap(), Duration::from_secs(2));
        assert_eq!(rollback.id(), ctx.id());
    }
}
