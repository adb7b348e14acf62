//! Background jobs.
//!
//! [`Jobs`] runs fire-and-forget futures next to the staged work. Each job
//! receives its scope explicitly, like any spawned unit, and may be limited
//! by a shared [`Semaphore`]. Failures are logged, never propagated.
//!
//! The [`jobs`] plugin registers a `Jobs` component and queues a teardown
//! action that cancels outstanding jobs and waits for them. It is
//! registered in the plugin catalog as `trellis.jobs`.
//!
//! ```
//! use std::sync::Arc;
//! use trellis_core_plugins::{Jobs, jobs};
//! use trellis_staging::prelude::*;
//!
//! async fn plugin(loader: Arc<Loader>, scope: Components) -> Result<(), PluginError> {
//!     loader.include(PluginRef::of(jobs)).await?;
//!     let jobs = scope.get::<Jobs>().map_err(|err| PluginError::Failed {
//!         plugin: String::from("example"),
//!         source: err.into(),
//!     })?;
//!     jobs.add(&scope, "warm cache", |_| async { Ok::<_, BoxError>(()) });
//!     Ok(())
//! }
//! ```

use core::panic::AssertUnwindSafe;
use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use trellis_staging::spawn::Spawner;
use trellis_staging::teardown::Teardown;
use trellis_staging::work::{TaskFailure, WorkOutput, WorkValue, panic_message};
use trellis_system::component::{Component, Components};

/// The outcome of a background job.
pub type JobOutcome = Result<WorkValue, TaskFailure>;

/// A set of running background jobs.
#[derive(Debug)]
pub struct Jobs {
    spawner: Spawner,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl Component for Jobs {}

impl Jobs {
    /// Creates an empty job set spawning through `spawner`.
    #[must_use]
    pub fn new(spawner: Spawner) -> Self {
        Self {
            spawner,
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Starts a job with the scope inherited from `scope`.
    pub fn add<F, Fut, O>(
        &self,
        scope: &Components,
        name: impl Into<Cow<'static, str>>,
        job: F,
    ) -> JoinHandle<JobOutcome>
    where
        F: FnOnce(Components) -> Fut,
        Fut: Future<Output = O> + Send + 'static,
        O: WorkOutput,
    {
        self.add_limited(scope, name, None, job)
    }

    /// Starts a job that holds a permit of `limit` while it runs.
    pub fn add_limited<F, Fut, O>(
        &self,
        scope: &Components,
        name: impl Into<Cow<'static, str>>,
        limit: Option<Arc<Semaphore>>,
        job: F,
    ) -> JoinHandle<JobOutcome>
    where
        F: FnOnce(Components) -> Fut,
        Fut: Future<Output = O> + Send + 'static,
        O: WorkOutput,
    {
        let name = name.into();
        let shutdown = self.shutdown.clone();
        let tracker = self.tracker.clone();
        tracing::info!(job = %name, running = self.len() + 1, "background job added");

        self.spawner.spawn(scope, move |scope| {
            let job = job(scope);
            let run = async move {
                let _permit = match limit {
                    Some(semaphore) => Some(
                        semaphore
                            .acquire_owned()
                            .await
                            .map_err(|_| TaskFailure::Cancelled)?,
                    ),
                    None => None,
                };
                match AssertUnwindSafe(job).catch_unwind().await {
                    Ok(output) => output.into_outcome().map_err(TaskFailure::Failed),
                    Err(payload) => Err(TaskFailure::Panicked(panic_message(&*payload))),
                }
            };

            tracker.track_future(async move {
                let outcome = tokio::select! {
                    () = shutdown.cancelled() => Err(TaskFailure::Cancelled),
                    outcome = run => outcome,
                };
                match &outcome {
                    Ok(_) => tracing::debug!(job = %name, "background job finished"),
                    Err(TaskFailure::Cancelled) => {
                        tracing::debug!(job = %name, "background job cancelled");
                    }
                    Err(error) => tracing::error!(job = %name, %error, "background job failed"),
                }
                outcome
            })
        })
    }

    /// Number of running jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    /// Returns `true` if no job is running.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    /// Cancels every running job without waiting.
    pub fn cancel(&self) {
        self.shutdown.cancel();
    }

    /// Cancels every running job and waits until all of them have stopped.
    pub async fn shutdown(&self) {
        let running = self.len();
        self.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::debug!(running, "background jobs stopped");
    }
}

/// Registers [`Jobs`] and shuts them down during teardown.
///
/// Jobs get their own spawner, in the stage's stacking mode, so they are
/// not stopped with the running phase.
pub async fn jobs(scope: Components, spawner: Arc<Spawner>, teardown: Arc<Teardown>) {
    let jobs = scope.add(Jobs::new(Spawner::new(spawner.is_stacking())));
    teardown.add("jobs", async move { jobs.shutdown().await });
}

trellis_staging::submit_plugin!("trellis.jobs", jobs);
