//! Cleanup actions run when a staging run ends.

use core::fmt;
use core::future::Future;
use std::borrow::Cow;

use futures::future::join_all;
use parking_lot::Mutex;
use trellis_system::component::Component;
use trellis_system::{BoxError, BoxFuture};

struct Action {
    name: Cow<'static, str>,
    future: BoxFuture<'static, Result<(), BoxError>>,
}

/// The teardown list.
///
/// Plugins request `Arc<Teardown>` and queue cleanup futures on it. When the
/// run ends (successfully, after a failure, or after cancellation) every
/// queued action is driven concurrently, started in reverse order of
/// registration, and all of them finish before staging returns.
///
/// # Example
///
/// ```
/// use trellis_staging::teardown::Teardown;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let teardown = Teardown::new();
/// teardown.add("close pool", async { /* ... */ });
/// teardown.add_fallible("flush", async { Ok::<_, std::io::Error>(()) });
///
/// assert_eq!(teardown.len(), 2);
/// assert_eq!(teardown.run().await, 0);
/// assert!(teardown.is_empty());
/// # }
/// ```
#[derive(Default)]
pub struct Teardown {
    actions: Mutex<Vec<Action>>,
}

impl Component for Teardown {}

impl Teardown {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an infallible action.
    pub fn add<Fut>(&self, name: impl Into<Cow<'static, str>>, action: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.add_fallible(name, async move {
            action.await;
            Ok::<_, BoxError>(())
        });
    }

    /// Queues an action whose failure is logged.
    pub fn add_fallible<Fut, E>(&self, name: impl Into<Cow<'static, str>>, action: Fut)
    where
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let name = name.into();
        tracing::debug!(action = %name, "teardown action queued");
        self.actions.lock().push(Action {
            name,
            future: Box::pin(async move { action.await.map_err(Into::into) }),
        });
    }

    /// Number of queued actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.lock().len()
    }

    /// Returns `true` if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.lock().is_empty()
    }

    /// Drains and runs every queued action, newest first, and waits for all
    /// of them. Returns the number of actions that failed.
    pub async fn run(&self) -> usize {
        let actions: Vec<Action> = self.actions.lock().drain(..).rev().collect();
        if actions.is_empty() {
            return 0;
        }
        tracing::debug!(count = actions.len(), "running teardown");

        let results = join_all(actions.into_iter().map(|action| async move {
            let result = action.future.await;
            (action.name, result)
        }))
        .await;

        let mut failures = 0;
        for (name, result) in results {
            if let Err(error) = result {
                failures += 1;
                tracing::error!(action = %name, %error, "teardown action failed");
            }
        }
        failures
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Teardown")
            .field("pending", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn actions_start_in_reverse_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let teardown = Teardown::new();
        for label in ["t1", "t2", "t3"] {
            let order = Arc::clone(&order);
            teardown.add(label, async move {
                order.lock().push(label);
                tokio::task::yield_now().await;
            });
        }

        assert_eq!(teardown.run().await, 0);
        assert_eq!(*order.lock(), vec!["t3", "t2", "t1"]);
    }

    #[tokio::test]
    async fn failures_are_counted_and_do_not_stop_others() {
        let ran = Arc::new(Mutex::new(0));
        let teardown = Teardown::new();
        {
            let ran = Arc::clone(&ran);
            teardown.add("counted", async move { *ran.lock() += 1 });
        }
        teardown.add_fallible("broken", async { Err::<(), _>("disk gone") });

        assert_eq!(teardown.run().await, 1);
        assert_eq!(*ran.lock(), 1);
    }

    #[tokio::test]
    async fn running_twice_is_a_no_op() {
        let teardown = Teardown::new();
        teardown.add("once", async {});
        teardown.run().await;
        assert_eq!(teardown.run().await, 0);
    }
}
