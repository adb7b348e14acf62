//! The staging engine.
//!
//! A staging run has three phases:
//!
//! 1. **Loading**: each requested plugin (and everything it includes) runs
//!    once against the shared loading scope and hands back work items.
//! 2. **Running**: every collected work item runs concurrently until all of
//!    them finish or the run is cancelled (explicitly, by timeout, or by a
//!    termination signal). Unfinished items and any units spawned through
//!    the [`Spawner`] are then aborted and awaited.
//! 3. **Teardown**: queued teardown actions run, newest first, and staging
//!    waits for all of them.
//!
//! ```text
//! Idle ─► Loading ─► Running ─► Cancelling ─► TornDown
//!            │                      ▲
//!            └── plugin failure ────┘
//! ```
//!
//! A plugin failure during loading discards the collected work, still runs
//! teardown, and is returned to the caller. A failing work item only fails
//! itself: its error is captured in the [`StageReport`] and sibling items
//! keep running.

use core::fmt;
use core::panic::AssertUnwindSafe;
use core::time::Duration;
use std::borrow::Cow;
use std::sync::Arc;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use trellis_system::adapter::Adapters;
use trellis_system::component::Components;

use crate::cancel::{Cancel, CancelReason};
use crate::catalog::{PluginCatalog, PluginRef};
use crate::error::StageError;
use crate::loader::Loader;
use crate::os_signals::wait_for_shutdown_signal;
use crate::spawn::Spawner;
use crate::teardown::Teardown;
use crate::work::{TaskFailure, WorkResult, WorkValue, panic_message};

// ─────────────────────────────────────────────────────────────────────────────
// State & Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// The phase a [`Staging`] engine is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    /// Nothing has happened yet.
    Idle,
    /// Plugins are being loaded.
    Loading,
    /// Work items are running.
    Running,
    /// Work has stopped (or loading failed); teardown is pending.
    Cancelling,
    /// Teardown has completed. Terminal.
    TornDown,
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Running => "running",
            Self::Cancelling => "cancelling",
            Self::TornDown => "torn down",
        })
    }
}

/// Staging configuration.
///
/// # Example
///
/// ```
/// use core::time::Duration;
/// use trellis_staging::stage::StagingConfig;
///
/// let config = StagingConfig::new()
///     .with_timeout(Duration::from_secs(30))
///     .with_grace(Duration::from_millis(250))
///     .with_signals(true);
///
/// assert!(config.stacking());
/// assert_eq!(config.timeout(), Some(Duration::from_secs(30)));
/// ```
#[derive(Debug, Clone)]
pub struct StagingConfig {
    stacking: bool,
    timeout: Option<Duration>,
    handle_signals: bool,
    grace: Duration,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            stacking: true,
            timeout: None,
            handle_signals: false,
            grace: Duration::ZERO,
        }
    }
}

impl StagingConfig {
    /// Default configuration: stacking on, no timeout, no signal handling,
    /// no grace period.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether each work item gets its own child scope.
    #[must_use]
    pub fn with_stacking(mut self, stacking: bool) -> Self {
        self.stacking = stacking;
        self
    }

    /// Cancels the running phase after `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Cancels the running phase on a termination signal.
    #[must_use]
    pub fn with_signals(mut self, handle_signals: bool) -> Self {
        self.handle_signals = handle_signals;
        self
    }

    /// Lets cancelled work finish cooperatively for up to `grace` before it
    /// is aborted.
    #[must_use]
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Whether stacking is enabled.
    #[must_use]
    pub fn stacking(&self) -> bool {
        self.stacking
    }

    /// The run-level timeout.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Whether termination signals cancel the run.
    #[must_use]
    pub fn handle_signals(&self) -> bool {
        self.handle_signals
    }

    /// The grace period for cancelled work.
    #[must_use]
    pub fn grace(&self) -> Duration {
        self.grace
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Report
// ─────────────────────────────────────────────────────────────────────────────

/// The outcome of the running phase.
#[derive(Debug)]
pub struct StageReport {
    results: Vec<WorkResult>,
    cancelled: Option<CancelReason>,
}

impl StageReport {
    /// One result per work item, in load order.
    #[must_use]
    pub fn results(&self) -> &[WorkResult] {
        &self.results
    }

    /// Consumes the report, returning the results.
    #[must_use]
    pub fn into_results(self) -> Vec<WorkResult> {
        self.results
    }

    /// The result of the first work item called `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&WorkResult> {
        self.results.iter().find(|result| result.name() == name)
    }

    /// Why the run was cancelled, if it was.
    #[must_use]
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.cancelled
    }

    /// Results that did not produce a value.
    pub fn failures(&self) -> impl Iterator<Item = &WorkResult> {
        self.results.iter().filter(|result| !result.is_ok())
    }

    /// Returns `true` if every work item produced a value.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Staging
// ─────────────────────────────────────────────────────────────────────────────

type Running = (Cow<'static, str>, JoinHandle<Result<WorkValue, TaskFailure>>);

/// Builder for a [`Staging`] engine with non-default collaborators.
#[derive(Default)]
pub struct StagingBuilder {
    config: StagingConfig,
    components: Option<Components>,
    adapters: Option<Arc<Adapters>>,
    catalog: Option<Arc<PluginCatalog>>,
}

impl StagingBuilder {
    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: StagingConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the root scope the loading scope is pushed onto.
    #[must_use]
    pub fn components(mut self, components: Components) -> Self {
        self.components = Some(components);
        self
    }

    /// Sets the factory index (defaults to [`Adapters::shared`]).
    #[must_use]
    pub fn adapters(mut self, adapters: Arc<Adapters>) -> Self {
        self.adapters = Some(adapters);
        self
    }

    /// Sets the plugin catalog (defaults to [`PluginCatalog::discover`]).
    #[must_use]
    pub fn catalog(mut self, catalog: Arc<PluginCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Builds the engine.
    #[must_use]
    pub fn build(self) -> Staging {
        let root = self.components.unwrap_or_default();
        let adapters = self.adapters.unwrap_or_else(Adapters::shared);
        let catalog = self
            .catalog
            .unwrap_or_else(|| Arc::new(PluginCatalog::discover()));

        let scope = root.push();
        let cancel = scope.add(Cancel::new());
        let teardown = scope.add(Teardown::new());
        let spawner = scope.add(Spawner::new(self.config.stacking));
        scope.add_shared(Arc::clone(&adapters), None);
        let loader = scope.add(Loader::new(scope.clone(), Arc::clone(&adapters), catalog));

        Staging {
            config: self.config,
            state: StageState::Idle,
            scope,
            adapters,
            loader,
            teardown,
            cancel,
            spawner,
        }
    }
}

/// Orchestrates the load, run and teardown phases of an application.
///
/// The loading scope is a child of the root scope and holds the
/// [`Cancel`] signal, the [`Teardown`] list, the [`Spawner`], the
/// [`Loader`] and the [`Adapters`], so plugins can request any of them as
/// parameters.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use trellis_staging::prelude::*;
///
/// async fn plugin(cancel: Arc<Cancel>) -> Vec<Work> {
///     vec![
///         Work::from_future("quick", async move {
///             cancel.cancel();
///             Ok::<_, BoxError>(1_u32)
///         }),
///         Work::from_future("forever", futures::future::pending::<()>()),
///     ]
/// }
///
/// let report = Staging::builder()
///     .catalog(Arc::new(PluginCatalog::new()))
///     .build()
///     .run_blocking([PluginRef::of(plugin)])
///     .unwrap();
///
/// assert_eq!(report.get("quick").unwrap().value::<u32>(), Some(&1));
/// assert!(report.get("forever").unwrap().is_cancelled());
/// ```
pub struct Staging {
    config: StagingConfig,
    state: StageState,
    scope: Components,
    adapters: Arc<Adapters>,
    loader: Arc<Loader>,
    teardown: Arc<Teardown>,
    cancel: Arc<Cancel>,
    spawner: Arc<Spawner>,
}

impl Staging {
    /// Creates an engine on a fresh root scope, the shared factory index,
    /// and the discovered plugin catalog.
    #[must_use]
    pub fn new(config: StagingConfig) -> Self {
        Self::builder().config(config).build()
    }

    /// Starts building an engine.
    #[must_use]
    pub fn builder() -> StagingBuilder {
        StagingBuilder::default()
    }

    /// The current phase.
    #[must_use]
    pub fn state(&self) -> StageState {
        self.state
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &StagingConfig {
        &self.config
    }

    /// The shared loading scope.
    ///
    /// The scope is cleared when the engine is dropped.
    #[must_use]
    pub fn scope(&self) -> &Components {
        &self.scope
    }

    /// The factory index.
    #[must_use]
    pub fn adapters(&self) -> &Arc<Adapters> {
        &self.adapters
    }

    /// The loader.
    #[must_use]
    pub fn loader(&self) -> &Arc<Loader> {
        &self.loader
    }

    /// The teardown list.
    #[must_use]
    pub fn teardown(&self) -> &Arc<Teardown> {
        &self.teardown
    }

    /// The cancellation signal.
    #[must_use]
    pub fn cancel_signal(&self) -> &Arc<Cancel> {
        &self.cancel
    }

    /// The spawner work items are scheduled with.
    #[must_use]
    pub fn spawner(&self) -> &Arc<Spawner> {
        &self.spawner
    }

    /// Requests cancellation of the running phase.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    fn enter(&mut self, next: StageState) {
        tracing::debug!(from = %self.state, to = %next, "stage transition");
        self.state = next;
    }

    fn ensure(&self, allowed: &[StageState], action: &'static str) -> Result<(), StageError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(StageError::InvalidState {
                from: self.state,
                action,
            })
        }
    }

    /// Loads plugins. May be called repeatedly before [`run`](Self::run).
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Plugin`] if a plugin fails to load. Collected
    /// work is discarded and only teardown remains possible. Returns
    /// [`StageError::InvalidState`] after the running phase has started.
    pub async fn load<I>(&mut self, plugins: I) -> Result<(), StageError>
    where
        I: IntoIterator,
        I::Item: Into<PluginRef>,
    {
        self.ensure(&[StageState::Idle, StageState::Loading], "load plugins")?;
        if self.state == StageState::Idle {
            self.enter(StageState::Loading);
        }

        for plugin in plugins {
            let loaded = self.loader.include(plugin).await;
            if let Err(error) = loaded {
                let discarded = self.loader.discard_work();
                tracing::error!(%error, discarded, "plugin loading failed");
                self.enter(StageState::Cancelling);
                return Err(error.into());
            }
        }
        Ok(())
    }

    /// Runs every collected work item and waits until they all finish or the
    /// run is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::InvalidState`] unless called after loading.
    pub async fn run(&mut self) -> Result<StageReport, StageError> {
        self.ensure(&[StageState::Idle, StageState::Loading], "run work")?;
        let works = self.loader.take_work();
        self.enter(StageState::Running);
        tracing::info!(works = works.len(), "running work");

        let tracker = TaskTracker::new();
        let handles: Vec<Running> = works
            .into_iter()
            .map(|work| {
                let (name, run) = work.into_parts();
                let scope = self.spawner.scope_for(&self.scope);
                let label = name.clone();
                let handle = tracker.spawn(async move {
                    match AssertUnwindSafe(run(scope)).catch_unwind().await {
                        Ok(Ok(value)) => Ok(value),
                        Ok(Err(error)) => {
                            tracing::warn!(work = %label, %error, "work failed");
                            Err(TaskFailure::Failed(error))
                        }
                        Err(payload) => {
                            let message = panic_message(&*payload);
                            tracing::error!(work = %label, %message, "work panicked");
                            Err(TaskFailure::Panicked(message))
                        }
                    }
                });
                (name, handle)
            })
            .collect();
        tracker.close();

        let cancelled = self.wait_running(&tracker).await;
        self.enter(StageState::Cancelling);

        if let Some(reason) = cancelled {
            tracing::info!(%reason, outstanding = tracker.len(), "stopping work");
            let settled = async {
                futures::join!(tracker.wait(), self.spawner.wait());
            };
            if !self.config.grace.is_zero()
                && tokio::time::timeout(self.config.grace, settled)
                    .await
                    .is_err()
            {
                tracing::debug!("grace period expired");
            }
            for (_, handle) in &handles {
                if !handle.is_finished() {
                    handle.abort();
                }
            }
        }

        let mut results = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(error) if error.is_cancelled() => Err(TaskFailure::Cancelled),
                Err(error) => Err(TaskFailure::Panicked(error.to_string())),
            };
            results.push(WorkResult::new(name, outcome));
        }

        let aborted = self.spawner.shutdown().await;
        if aborted > 0 {
            tracing::debug!(aborted, "stopped spawned units");
        }

        let report = StageReport {
            results,
            cancelled: self.cancel.reason(),
        };
        tracing::info!(
            works = report.results.len(),
            failed = report.failures().count(),
            cancelled = ?report.cancelled,
            "work finished"
        );
        Ok(report)
    }

    /// Waits for the running phase to end; returns the cancellation reason
    /// if it did not end naturally.
    async fn wait_running(&self, tracker: &TaskTracker) -> Option<CancelReason> {
        let deadline = async {
            match self.config.timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => core::future::pending().await,
            }
        };
        let signal = async {
            if self.config.handle_signals {
                match wait_for_shutdown_signal().await {
                    Ok(()) => return,
                    Err(error) => tracing::warn!(%error, "cannot install signal handlers"),
                }
            }
            core::future::pending::<()>().await;
        };

        tokio::select! {
            biased;
            () = tracker.wait() => None,
            () = self.cancel.cancelled() => self.cancel.reason(),
            () = deadline => {
                self.cancel.cancel_with(CancelReason::Timeout);
                self.cancel.reason()
            }
            () = signal => {
                self.cancel.cancel_with(CancelReason::Signal);
                self.cancel.reason()
            }
        }
    }

    /// Runs the teardown list. Returns the number of failed actions.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::InvalidState`] if teardown already ran.
    pub async fn run_teardown(&mut self) -> Result<usize, StageError> {
        self.ensure(
            &[StageState::Idle, StageState::Loading, StageState::Cancelling],
            "tear down",
        )?;
        let discarded = self.loader.discard_work();
        if discarded > 0 {
            tracing::debug!(discarded, "discarding work that never ran");
        }
        self.enter(StageState::Cancelling);

        let failures = self.teardown.run().await;
        self.enter(StageState::TornDown);
        Ok(failures)
    }

    /// Loads `plugins`, runs their work, and tears down.
    ///
    /// Teardown runs whether loading succeeded or not.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Plugin`] if loading failed.
    pub async fn stage<I>(mut self, plugins: I) -> Result<StageReport, StageError>
    where
        I: IntoIterator,
        I::Item: Into<PluginRef>,
    {
        let report = match self.load(plugins).await {
            Ok(()) => self.run().await,
            Err(error) => Err(error),
        };
        self.run_teardown().await?;
        report
    }

    /// Drives [`stage`](Self::stage) to completion on a new current-thread
    /// runtime.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Runtime`] if the runtime cannot start, otherwise
    /// as [`stage`](Self::stage).
    pub fn run_blocking<I>(self, plugins: I) -> Result<StageReport, StageError>
    where
        I: IntoIterator,
        I::Item: Into<PluginRef>,
    {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(StageError::Runtime)?;
        runtime.block_on(self.stage(plugins))
    }
}

impl Drop for Staging {
    fn drop(&mut self) {
        // The loader lives in the scope it holds.
        self.scope.clear();
    }
}

impl fmt::Debug for Staging {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Staging")
            .field("state", &self.state)
            .field("config", &self.config)
            .field("loader", &self.loader)
            .finish_non_exhaustive()
    }
}

/// Stages `plugins` with the default configuration on a new runtime.
///
/// # Errors
///
/// See [`Staging::run_blocking`].
pub fn run<I>(plugins: I) -> Result<StageReport, StageError>
where
    I: IntoIterator,
    I::Item: Into<PluginRef>,
{
    Staging::new(StagingConfig::default()).run_blocking(plugins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::work::Work;
    use core::convert::Infallible;

    fn staging() -> Staging {
        Staging::builder()
            .adapters(Arc::new(Adapters::new()))
            .catalog(Arc::new(PluginCatalog::new()))
            .build()
    }

    async fn nothing() {}

    async fn counting(scope: Components) -> Vec<Work> {
        (0..2_u32)
            .map(|n| {
                Work::new(format!("count{n}"), move |inner: Components| async move {
                    inner.add(n);
                    Ok::<_, Infallible>(inner.depth())
                })
            })
            .chain([Work::from_future("outer", async move {
                Ok::<_, Infallible>(scope.get::<u32>().is_err())
            })])
            .collect()
    }

    #[tokio::test]
    async fn states_advance_through_the_lifecycle() {
        let mut staging = staging();
        assert_eq!(staging.state(), StageState::Idle);

        staging.load([PluginRef::of(nothing)]).await.unwrap();
        assert_eq!(staging.state(), StageState::Loading);

        staging.run().await.unwrap();
        assert_eq!(staging.state(), StageState::Cancelling);

        staging.run_teardown().await.unwrap();
        assert_eq!(staging.state(), StageState::TornDown);
    }

    #[tokio::test]
    async fn out_of_order_calls_are_rejected() {
        let mut staging = staging();
        staging.run().await.unwrap();

        let err = staging.load([PluginRef::of(nothing)]).await.unwrap_err();
        assert!(matches!(
            err,
            StageError::InvalidState {
                from: StageState::Cancelling,
                ..
            }
        ));

        staging.run_teardown().await.unwrap();
        assert!(staging.run_teardown().await.is_err());
    }

    #[tokio::test]
    async fn stacked_work_gets_private_scopes() {
        let staging = staging();
        let depth = staging.scope().depth();
        let report = staging.stage([PluginRef::of(counting)]).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.get("count0").unwrap().value::<usize>(), Some(&(depth + 1)));
        assert_eq!(report.get("outer").unwrap().value::<bool>(), Some(&true));
        assert!(report.cancel_reason().is_none());
    }

    #[tokio::test]
    async fn shared_mode_runs_work_in_the_loading_scope() {
        let staging = Staging::builder()
            .config(StagingConfig::new().with_stacking(false))
            .adapters(Arc::new(Adapters::new()))
            .catalog(Arc::new(PluginCatalog::new()))
            .build();
        let depth = staging.scope().depth();
        let report = staging.stage([PluginRef::of(counting)]).await.unwrap();

        assert_eq!(report.get("count1").unwrap().value::<usize>(), Some(&depth));
    }

    #[test]
    fn blocking_entry_point_runs_to_completion() {
        let report = staging().run_blocking([PluginRef::of(nothing)]).unwrap();
        assert!(report.results().is_empty());
    }
}
