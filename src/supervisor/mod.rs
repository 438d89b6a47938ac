//! Single-slot task supervisor shared by the CLI and the control plane.
//!
//! # Architecture
//!
//! - [`TaskSupervisor`] - owns the base config, the job slot and its
//!   cancellation token
//! - [`TaskStatus`] - snapshot handed to status readers
//! - [`job::execute`] - default job body (store, proxies, fetch client,
//!   runner)
//!
//! At most one job runs at a time. `run` holds the slot lock while it merges
//! and validates the request, so two concurrent callers cannot both start.

pub mod job;
mod status;
mod validate;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{Config, Overrides};
use crate::crawler::{CrawlResult, CrawlerError, RunOutcome};
use crate::platform::Registry;

pub use status::{TaskState, TaskStatus};

/// Body of a run request: overrides merged onto the base config.
pub type RunRequest = Overrides;

/// Job body invoked with the job's token and merged config.
pub type Executor = Arc<dyn Fn(CancellationToken, Config) -> BoxFuture<'static, RunOutcome> + Send + Sync>;

/// Wraps an async closure as an [`Executor`].
pub fn job_fn<F, Fut>(f: F) -> Executor
where
    F: Fn(CancellationToken, Config) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RunOutcome> + Send + 'static,
{
    Arc::new(move |cancel: CancellationToken, config: Config| f(cancel, config).boxed())
}

/// Errors returned by [`TaskSupervisor::run`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SupervisorError {
    #[error("task is running")]
    TaskRunning,

    #[error("{msg}")]
    Validation { msg: String },
}

#[derive(Debug, Default)]
struct Slot {
    status: TaskStatus,
    cancel: Option<CancellationToken>,
}

struct Inner {
    base: Config,
    registry: Arc<Registry>,
    executor: Executor,
    slot: Mutex<Slot>,
    idle: Notify,
}

impl Inner {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn complete(&self, outcome: &RunOutcome) {
        {
            let mut slot = self.slot();
            slot.cancel = None;
            slot.status.complete(&outcome.result, outcome.error.as_ref());
        }
        self.idle.notify_waiters();
    }
}

/// Runs crawl jobs one at a time.
///
/// Cloning is cheap; clones share the same slot.
#[derive(Clone)]
pub struct TaskSupervisor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TaskSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSupervisor")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl TaskSupervisor {
    /// Creates a supervisor running jobs through [`job::execute`].
    #[must_use]
    pub fn new(base: Config, registry: Arc<Registry>) -> Self {
        let jobs = Arc::clone(&registry);
        let executor = job_fn(move |cancel, config| job::execute(cancel, config, Arc::clone(&jobs)));
        Self::with_executor(base, registry, executor)
    }

    /// Creates a supervisor with a custom job body.
    #[must_use]
    pub fn with_executor(base: Config, registry: Arc<Registry>, executor: Executor) -> Self {
        Self {
            inner: Arc::new(Inner {
                base,
                registry,
                executor,
                slot: Mutex::new(Slot::default()),
                idle: Notify::new(),
            }),
        }
    }

    /// Config every job starts from.
    #[must_use]
    pub fn base_config(&self) -> &Config {
        &self.inner.base
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Merges, validates and starts a job in the background.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::TaskRunning`] while a job holds the slot
    /// (including while it is stopping) and [`SupervisorError::Validation`]
    /// when the merged config is rejected.
    pub fn run(&self, request: &RunRequest) -> Result<TaskStatus, SupervisorError> {
        let mut slot = self.inner.slot();
        if slot.cancel.is_some() {
            return Err(SupervisorError::TaskRunning);
        }

        let mut config = self.inner.base.clone();
        config.apply_overrides(request);
        config.normalize();
        validate::validate_run_config(&config, &self.inner.registry)
            .map_err(|msg| SupervisorError::Validation { msg })?;

        let token = CancellationToken::new();
        slot.cancel = Some(token.clone());
        let mode = config.mode();
        slot.status.begin(&config.platform, mode);
        let snapshot = slot.status.clone();
        drop(slot);

        info!(platform = %config.platform, %mode, "task started");
        let inner = Arc::clone(&self.inner);
        let fallback = CrawlResult::start(&config.request());
        tokio::spawn(async move {
            let job = tokio::spawn((inner.executor)(token, config));
            let outcome = match job.await {
                Ok(outcome) => outcome,
                Err(err) => {
                    let mut result = fallback;
                    result.finish();
                    RunOutcome::failed(result, CrawlerError::setup(format!("job aborted: {err}")))
                }
            };
            match &outcome.error {
                Some(err) => warn!(
                    error = %err,
                    kind = %err.kind(),
                    processed = outcome.result.processed,
                    failed = outcome.result.failed,
                    "task finished with error"
                ),
                None => info!(
                    processed = outcome.result.processed,
                    succeeded = outcome.result.succeeded,
                    failed = outcome.result.failed,
                    "task finished"
                ),
            }
            inner.complete(&outcome);
        });
        Ok(snapshot)
    }

    /// Cancels the running job.
    ///
    /// Returns `false` when nothing is running or a stop is already pending.
    pub fn stop(&self) -> bool {
        let mut slot = self.inner.slot();
        if slot.status.state != TaskState::Running {
            return false;
        }
        let Some(token) = slot.cancel.as_ref() else {
            return false;
        };
        token.cancel();
        slot.status.state = TaskState::Stopping;
        info!("task stopping");
        true
    }

    /// Current status snapshot.
    #[must_use]
    pub fn status(&self) -> TaskStatus {
        self.inner.slot().status.clone()
    }

    /// Whether a job holds the slot.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.inner.slot().cancel.is_some()
    }

    /// Waits until no job holds the slot and returns the final status.
    pub async fn wait_idle(&self) -> TaskStatus {
        loop {
            let notified = self.inner.idle.notified();
            {
                let slot = self.inner.slot();
                if slot.cancel.is_none() {
                    return slot.status.clone();
                }
            }
            notified.await;
        }
    }
}
