use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::traits::QueryCancelHandle;

/// The operation kinds the async runner dispatches to a driver. One
/// worker thread handles exactly one of these per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Connect,
    ListTables,
    GetSchema,
    QueryPage,
    QueryPageWhere,
    CountRows,
    CountRowsWhere,
    Query,
    Exec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Idle,
    Running,
    Completed,
    Error,
    Cancelled,
}

struct Shared<T> {
    state: Mutex<OperationState>,
    condvar: Condvar,
    result: Mutex<Option<T>>,
    error_message: Mutex<Option<String>>,
    cancel_requested: Mutex<bool>,
    cancel_handle: Mutex<Option<Arc<dyn QueryCancelHandle>>>,
}

/// One operation owns one worker thread. `T` is the operation's result
/// payload type (a `QueryResult`, a `TableSchema`, a `Vec<String>`, …
/// depending on `kind`); the runner is generic over it so every call site
/// gets a typed result instead of an enum of payload variants.
pub struct AsyncOperation<T> {
    pub kind: OperationKind,
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> AsyncOperation<T> {
    /// Allocate synchronisation primitives in `Idle` state. The worker is
    /// spawned separately by `start`, once the caller has its closure
    /// ready — this mirrors the two-phase allocate-then-dispatch lifecycle
    /// in §4.9 rather than doing both in one call.
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            shared: Arc::new(Shared {
                state: Mutex::new(OperationState::Idle),
                condvar: Condvar::new(),
                result: Mutex::new(None),
                error_message: Mutex::new(None),
                cancel_requested: Mutex::new(false),
                cancel_handle: Mutex::new(None),
            }),
        }
    }

    /// Spawn the worker, transitioning to `Running`. `work` is called on
    /// the worker thread; it should register a cancel handle via the
    /// passed-in `register_cancel_handle` callback before making the
    /// blocking driver call, so a concurrent `cancel()` has something to
    /// invoke. The worker thread is detached: it self-cleans via the
    /// shared `Arc` and never needs to be joined.
    pub fn start<F>(&self, work: F)
    where
        F: FnOnce(&dyn Fn(Arc<dyn QueryCancelHandle>)) -> Result<T, String> + Send + 'static,
    {
        {
            let mut state = self.shared.state.lock().unwrap();
            *state = OperationState::Running;
        }

        let shared = Arc::clone(&self.shared);
        std::thread::Builder::new()
            .stack_size(256 * 1024)
            .spawn(move || {
                let register = {
                    let shared = Arc::clone(&shared);
                    move |handle: Arc<dyn QueryCancelHandle>| {
                        *shared.cancel_handle.lock().unwrap() = Some(handle);
                    }
                };

                let outcome = work(&register);

                let cancelled = *shared.cancel_requested.lock().unwrap();
                let mut state = shared.state.lock().unwrap();

                if cancelled {
                    *shared.result.lock().unwrap() = None;
                    *state = OperationState::Cancelled;
                } else {
                    match outcome {
                        Ok(value) => {
                            *shared.result.lock().unwrap() = Some(value);
                            *state = OperationState::Completed;
                        }
                        Err(message) => {
                            *shared.error_message.lock().unwrap() = Some(message);
                            *state = OperationState::Error;
                        }
                    }
                }

                shared.condvar.notify_all();
            })
            .expect("failed to spawn async operation worker");
    }

    /// Request cancellation. If the operation is `Running` and a cancel
    /// handle has been registered, invoke the driver's cancel. Idempotent:
    /// cancelling twice is harmless.
    pub fn cancel(&self) {
        *self.shared.cancel_requested.lock().unwrap() = true;

        let state = *self.shared.state.lock().unwrap();
        if state == OperationState::Running
            && let Some(handle) = self.shared.cancel_handle.lock().unwrap().as_ref()
        {
            let _ = handle.cancel();
        }
    }

    pub fn cancel_requested(&self) -> bool {
        *self.shared.cancel_requested.lock().unwrap()
    }

    /// Returns the current state without blocking.
    pub fn poll(&self) -> OperationState {
        *self.shared.state.lock().unwrap()
    }

    /// Block until the operation leaves `Running`, or until `timeout`
    /// elapses. `timeout = Duration::ZERO` is a non-blocking status check.
    /// A caller that observes a terminal state here has a happens-before
    /// relationship with every write the worker made to the result
    /// payload, since both sides serialize through the same mutex.
    pub fn wait(&self, timeout: Duration) -> OperationState {
        let mut state = self.shared.state.lock().unwrap();

        if timeout.is_zero() {
            return *state;
        }

        while *state == OperationState::Running {
            let (guard, result) = self.shared.condvar.wait_timeout(state, timeout).unwrap();
            state = guard;
            if result.timed_out() {
                break;
            }
        }

        *state
    }

    /// Take the result payload. Returns `None` unless `state == Completed`.
    pub fn take_result(&self) -> Option<T> {
        if self.poll() != OperationState::Completed {
            return None;
        }
        self.shared.result.lock().unwrap().take()
    }

    pub fn error_message(&self) -> Option<String> {
        self.shared.error_message.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn runs_to_completion() {
        let op: AsyncOperation<i32> = AsyncOperation::new(OperationKind::Query);
        op.start(|_register| Ok(42));

        let state = op.wait(Duration::from_secs(5));
        assert_eq!(state, OperationState::Completed);
        assert_eq!(op.take_result(), Some(42));
    }

    #[test]
    fn propagates_error() {
        let op: AsyncOperation<i32> = AsyncOperation::new(OperationKind::Query);
        op.start(|_register| Err("boom".to_string()));

        assert_eq!(op.wait(Duration::from_secs(5)), OperationState::Error);
        assert_eq!(op.error_message(), Some("boom".to_string()));
        assert_eq!(op.take_result(), None);
    }

    #[test]
    fn non_blocking_poll_returns_running_immediately() {
        let op: AsyncOperation<i32> = AsyncOperation::new(OperationKind::Query);
        let started = Arc::new(AtomicBool::new(false));
        let started_worker = Arc::clone(&started);

        op.start(move |_register| {
            started_worker.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(200));
            Ok(1)
        });

        let state = op.wait(Duration::ZERO);
        assert!(state == OperationState::Running || state == OperationState::Completed);
        op.wait(Duration::from_secs(5));
    }

    #[test]
    fn cancel_marks_cancelled_and_drops_payload() {
        let op: AsyncOperation<i32> = AsyncOperation::new(OperationKind::Query);

        op.start(|register| {
            struct Dummy;
            impl QueryCancelHandle for Dummy {
                fn cancel(&self) -> Result<(), crate::DbError> {
                    Ok(())
                }
                fn is_cancelled(&self) -> bool {
                    true
                }
            }
            register(Arc::new(Dummy));
            thread::sleep(Duration::from_millis(100));
            Ok(99)
        });

        thread::sleep(Duration::from_millis(10));
        op.cancel();
        let state = op.wait(Duration::from_secs(5));
        assert_eq!(state, OperationState::Cancelled);
        assert_eq!(op.take_result(), None);
    }

    #[test]
    fn double_cancel_is_harmless() {
        let op: AsyncOperation<i32> = AsyncOperation::new(OperationKind::Query);
        op.start(|_register| Ok(1));
        op.cancel();
        op.cancel();
        op.wait(Duration::from_secs(5));
    }
}
