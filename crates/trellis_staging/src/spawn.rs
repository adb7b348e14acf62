//! Spawning concurrent units with an explicit scope.
//!
//! A spawned unit never reads an ambient scope. It receives the scope it
//! was spawned from as an argument: the same handle, or with stacking
//! enabled, a fresh child of it. Stacked units can still see everything
//! registered further out, but what they add or memoize stays their own.

use core::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::task::TaskTracker;
use trellis_system::component::{Component, Components};

/// Spawns tasks that inherit a scope.
///
/// Available to plugins and work items as `Arc<Spawner>`. The staging
/// engine shuts its spawner down when the running phase ends, so units
/// spawned here never outlive the run. Clones share their units.
///
/// # Example
///
/// ```
/// use trellis_staging::spawn::Spawner;
/// use trellis_system::component::Components;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let spawner = Spawner::new(true);
/// let scope = Components::new();
/// scope.add(1_u32);
///
/// let seen = spawner
///     .spawn(&scope, |scope| async move {
///         scope.add(String::from("private"));
///         *scope.get::<u32>().unwrap()
///     })
///     .await
///     .unwrap();
///
/// assert_eq!(seen, 1);
/// assert!(scope.get::<String>().is_err());
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Spawner {
    tracker: TaskTracker,
    running: Arc<Mutex<Vec<AbortHandle>>>,
    stacking: bool,
}

impl Component for Spawner {}

impl Spawner {
    /// Creates a spawner; `stacking` gives every unit its own child scope.
    #[must_use]
    pub fn new(stacking: bool) -> Self {
        Self {
            tracker: TaskTracker::new(),
            running: Arc::default(),
            stacking,
        }
    }

    /// Returns `true` if spawned units get a child scope.
    #[must_use]
    pub fn is_stacking(&self) -> bool {
        self.stacking
    }

    /// The scope a unit spawned from `scope` starts with.
    #[must_use]
    pub fn scope_for(&self, scope: &Components) -> Components {
        if self.stacking {
            scope.push()
        } else {
            scope.clone()
        }
    }

    /// Spawns `body` on the current runtime with the scope inherited from
    /// `scope`.
    pub fn spawn<F, Fut>(&self, scope: &Components, body: F) -> JoinHandle<Fut::Output>
    where
        F: FnOnce(Components) -> Fut,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let handle = self.tracker.spawn(body(self.scope_for(scope)));
        let mut running = self.running.lock();
        running.retain(|unit| !unit.is_finished());
        running.push(handle.abort_handle());
        handle
    }

    /// Number of spawned units still running.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    /// Returns `true` if no spawned unit is running.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    /// Waits until every unit spawned so far has finished.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Aborts every unit still running and waits until all of them have
    /// stopped. Returns the number of aborted units.
    pub async fn shutdown(&self) -> usize {
        let running = core::mem::take(&mut *self.running.lock());
        let mut aborted = 0;
        for unit in running.iter().filter(|unit| !unit.is_finished()) {
            unit.abort();
            aborted += 1;
        }
        self.wait().await;
        aborted
    }
}
