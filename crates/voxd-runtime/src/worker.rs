//! Uniform start/stop/join abstraction for every background worker (§4.1).
//! Everything else in the pipeline builds on this: the thermal poller, the
//! session sweep, the per-connection ingress/egress/turn-timer tasks, and
//! the pipeline orchestrator itself.
//!
//! Workers run as dedicated tokio tasks rather than OS threads — this is a
//! pure async server, so a task is the "dedicated execution context" the
//! contract asks for. Each handle is a command-channel-backed wrapper with
//! an explicit shutdown signal and a join on stop, generalized to wrap an
//! arbitrary async `fn` rather than one fixed command loop.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Default join timeout per §5's timeout table.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// The predicate a worker body polls to learn it should wind down. Cloning
/// shares the same underlying flag.
#[derive(Debug, Clone, Default)]
pub struct ShouldStop(Arc<AtomicBool>);

impl ShouldStop {
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of a `join`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The worker body returned before the timeout elapsed.
    Clean,
    /// The worker body panicked; the message is the panic payload,
    /// sanitized to a string.
    Failed(String),
    /// The join timeout elapsed before the worker body returned. The
    /// worker is not force-killed; it keeps running and the process
    /// continues degraded (§4.1 failure semantics).
    TimedOut,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("worker '{0}' already started")]
    AlreadyStarted(String),
}

/// One background worker, identified by name for logging.
pub struct WorkerHandle {
    name: String,
    stop_flag: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    joined: AtomicBool,
    started_at: Mutex<Option<DateTime<Utc>>>,
}

impl WorkerHandle {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stop_flag: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
            started: AtomicBool::new(false),
            joined: AtomicBool::new(false),
            started_at: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// §6.4 observable-state field: true once `start` has succeeded and the
    /// worker has not yet been joined.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.joined.load(Ordering::SeqCst)
    }

    /// §6.4 observable-state field: `None` until `start` succeeds at least
    /// once.
    #[must_use]
    pub fn last_started_at(&self) -> Option<DateTime<Utc>> {
        *self
            .started_at
            .try_lock()
            .expect("worker handle started_at lock contended")
    }

    /// Convenience for the common "do something every period" worker body:
    /// ticks on a `tokio::time::interval` and calls `tick` until stopped,
    /// checking the stop signal between ticks so shutdown latency stays
    /// bounded by `period`, not by how long `tick` takes to fire again.
    pub fn start_periodic<F>(&self, period: Duration, mut tick: F) -> Result<(), WorkerError>
    where
        F: FnMut() + Send + 'static,
    {
        self.start(move |should_stop| async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            while !should_stop.is_set() {
                ticker.tick().await;
                if should_stop.is_set() {
                    break;
                }
                tick();
            }
        })
    }

    /// Begin `body` in a dedicated tokio task. `body` receives a
    /// `ShouldStop` predicate and should poll it with a short period (≤100
    /// ms recommended) so cancellation latency stays bounded. Re-starting
    /// an already-started handle is forbidden.
    pub fn start<F, Fut>(&self, body: F) -> Result<(), WorkerError>
    where
        F: FnOnce(ShouldStop) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(WorkerError::AlreadyStarted(self.name.clone()));
        }

        let should_stop = ShouldStop(self.stop_flag.clone());
        let name = self.name.clone();
        let task = tokio::spawn(async move {
            body(should_stop).await;
        });

        // `Mutex::blocking_lock` would deadlock inside an async context;
        // `start` is synchronous by contract so a `try_lock` is safe here —
        // nothing else can be holding this lock before the first start.
        *self
            .handle
            .try_lock()
            .expect("worker handle lock contended during start") = Some(task);
        *self
            .started_at
            .try_lock()
            .expect("worker handle started_at lock contended during start") = Some(Utc::now());

        tracing::debug!(worker = name, "worker started");
        Ok(())
    }

    /// Idempotent, non-blocking. Does not force-kill.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.stop_flag.load(Ordering::SeqCst)
    }

    /// Waits up to `timeout` for the worker body to return. Logs a warning
    /// with the worker name on timeout rather than raising.
    pub async fn join(&self, timeout: Duration) -> JoinOutcome {
        let task = self.handle.lock().await.take();
        let Some(task) = task else {
            self.joined.store(true, Ordering::SeqCst);
            return JoinOutcome::Clean;
        };

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(())) => {
                self.joined.store(true, Ordering::SeqCst);
                JoinOutcome::Clean
            }
            Ok(Err(join_err)) => {
                self.joined.store(true, Ordering::SeqCst);
                let message = if join_err.is_panic() {
                    "worker panicked".to_string()
                } else {
                    join_err.to_string()
                };
                tracing::warn!(worker = %self.name, %message, "worker ended abnormally");
                JoinOutcome::Failed(message)
            }
            Err(_elapsed) => {
                tracing::warn!(worker = %self.name, timeout_s = timeout.as_secs_f64(), "worker join timed out");
                JoinOutcome::TimedOut
            }
        }
    }

    /// `stop()` then `join(timeout)` — the scoped-acquisition pattern every
    /// exit path should use.
    pub async fn stop_and_join(&self, timeout: Duration) -> JoinOutcome {
        self.stop();
        self.join(timeout).await
    }

    #[must_use]
    pub fn was_joined(&self) -> bool {
        self.joined.load(Ordering::SeqCst)
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop();
        if self.started.load(Ordering::SeqCst) && !self.joined.load(Ordering::SeqCst) {
            tracing::warn!(
                worker = %self.name,
                "worker handle dropped without being joined; every started worker must be explicitly stopped and joined in its owning exit path"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn clean_join_on_cooperative_exit() {
        let worker = WorkerHandle::new("test-clean");
        worker
            .start(|should_stop| async move {
                while !should_stop.is_set() {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .unwrap();

        let outcome = worker.stop_and_join(DEFAULT_JOIN_TIMEOUT).await;
        assert_eq!(outcome, JoinOutcome::Clean);
        assert!(worker.was_joined());
    }

    #[tokio::test]
    async fn restart_is_forbidden() {
        let worker = WorkerHandle::new("test-restart");
        worker.start(|_| async {}).unwrap();
        let err = worker.start(|_| async {}).unwrap_err();
        assert!(matches!(err, WorkerError::AlreadyStarted(_)));
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let worker = WorkerHandle::new("test-idempotent");
        worker
            .start(|should_stop| async move {
                while !should_stop.is_set() {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .unwrap();

        worker.stop();
        worker.stop();
        let outcome = worker.join(DEFAULT_JOIN_TIMEOUT).await;
        assert_eq!(outcome, JoinOutcome::Clean);
    }

    #[tokio::test]
    async fn join_times_out_on_a_worker_that_ignores_should_stop() {
        let worker = WorkerHandle::new("test-timeout");
        worker
            .start(|_should_stop| async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
            })
            .unwrap();

        let outcome = worker.stop_and_join(Duration::from_millis(20)).await;
        assert_eq!(outcome, JoinOutcome::TimedOut);
    }

    #[tokio::test]
    async fn panic_is_surfaced_on_join_not_raised_immediately() {
        let worker = WorkerHandle::new("test-panic");
        worker
            .start(|_| async move {
                panic!("boom");
            })
            .unwrap();

        let outcome = worker.join(DEFAULT_JOIN_TIMEOUT).await;
        assert!(matches!(outcome, JoinOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn should_stop_poll_count_bounded_by_stop_latency() {
        let polls = Arc::new(AtomicUsize::new(0));
        let polls_clone = polls.clone();
        let worker = WorkerHandle::new("test-poll");
        worker
            .start(move |should_stop| async move {
                while !should_stop.is_set() {
                    polls_clone.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                }
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let outcome = worker.stop_and_join(DEFAULT_JOIN_TIMEOUT).await;
        assert_eq!(outcome, JoinOutcome::Clean);
        assert!(polls.load(Ordering::SeqCst) > 0);
    }
}
