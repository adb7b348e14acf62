//! Units of background work and their outcomes.
//!
//! Plugins hand [`Work`] items to the loader; the staging engine runs them
//! all concurrently once loading has finished and reports one
//! [`WorkResult`] per item, in load order.

use core::any::Any;
use core::fmt;
use core::future::Future;
use std::borrow::Cow;

use futures::{Stream, StreamExt};
use trellis_system::component::Components;
use trellis_system::{BoxError, BoxFuture};

/// The value a finished work item produced.
pub type WorkValue = Box<dyn Any + Send>;

type Run = Box<dyn FnOnce(Components) -> BoxFuture<'static, Result<WorkValue, BoxError>> + Send>;

/// What a work body may return.
///
/// Implemented for `()` and for `Result<T, E>`.
pub trait WorkOutput: Send + 'static {
    /// Converts into the stored outcome.
    fn into_outcome(self) -> Result<WorkValue, BoxError>;
}

impl WorkOutput for () {
    fn into_outcome(self) -> Result<WorkValue, BoxError> {
        Ok(Box::new(()))
    }
}

impl<T, E> WorkOutput for Result<T, E>
where
    T: Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    fn into_outcome(self) -> Result<WorkValue, BoxError> {
        self.map(|value| Box::new(value) as WorkValue)
            .map_err(Into::into)
    }
}

/// A unit of background work, scheduled in the running phase.
///
/// The body receives the scope it runs in. With stacking enabled (the
/// default) that is a fresh child of the plugin scope, so values it adds
/// or memoizes stay private to this unit.
///
/// # Example
///
/// ```
/// use std::convert::Infallible;
/// use trellis_staging::work::Work;
///
/// let work = Work::new("heartbeat", |scope| async move {
///     scope.add(String::from("alive"));
///     Ok::<_, Infallible>(42_u32)
/// });
/// assert_eq!(work.name(), "heartbeat");
/// ```
pub struct Work {
    name: Cow<'static, str>,
    run: Run,
}

impl Work {
    /// Creates a work item from a body that receives its scope.
    pub fn new<F, Fut>(name: impl Into<Cow<'static, str>>, body: F) -> Self
    where
        F: FnOnce(Components) -> Fut + Send + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: WorkOutput,
    {
        let run: Run = Box::new(move |scope| -> BoxFuture<'static, Result<WorkValue, BoxError>> {
            Box::pin(async move { body(scope).await.into_outcome() })
        });
        Self {
            name: name.into(),
            run,
        }
    }

    /// Creates a work item from a future that does not need its scope.
    pub fn from_future<Fut>(name: impl Into<Cow<'static, str>>, future: Fut) -> Self
    where
        Fut: Future + Send + 'static,
        Fut::Output: WorkOutput,
    {
        Self::new(name, move |_| future)
    }

    /// Creates a work item that drains `stream`; its value is a `Vec` of
    /// every item the stream yielded.
    pub fn from_stream<S>(name: impl Into<Cow<'static, str>>, stream: S) -> Self
    where
        S: Stream + Send + 'static,
        S::Item: Send + 'static,
    {
        Self::from_future(name, async move {
            Ok::<_, BoxError>(stream.collect::<Vec<_>>().await)
        })
    }

    /// The diagnostic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn into_parts(self) -> (Cow<'static, str>, Run) {
        (self.name, self.run)
    }
}

impl fmt::Debug for Work {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Work")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Why a work item did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum TaskFailure {
    /// The body returned an error.
    #[error("work failed: {0}")]
    Failed(#[source] BoxError),

    /// The item was still running when staging was cancelled.
    #[error("work was cancelled")]
    Cancelled,

    /// The body panicked.
    #[error("work panicked: {0}")]
    Panicked(String),
}

/// The outcome of one work item.
#[derive(Debug)]
pub struct WorkResult {
    name: Cow<'static, str>,
    outcome: Result<WorkValue, TaskFailure>,
}

impl WorkResult {
    pub(crate) fn new(name: Cow<'static, str>, outcome: Result<WorkValue, TaskFailure>) -> Self {
        Self { name, outcome }
    }

    /// The work item's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw outcome.
    #[must_use]
    pub fn outcome(&self) -> &Result<WorkValue, TaskFailure> {
        &self.outcome
    }

    /// Consumes the result, returning the raw outcome.
    #[must_use]
    pub fn into_outcome(self) -> Result<WorkValue, TaskFailure> {
        self.outcome
    }

    /// Returns `true` if the item produced a value.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    /// The produced value, if the item succeeded with a `T`.
    #[must_use]
    pub fn value<T: 'static>(&self) -> Option<&T> {
        self.outcome.as_ref().ok()?.downcast_ref()
    }

    /// The failure, if any.
    #[must_use]
    pub fn failure(&self) -> Option<&TaskFailure> {
        self.outcome.as_ref().err()
    }

    /// Returns `true` if the item was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.outcome, Err(TaskFailure::Cancelled))
    }
}

/// Renders a panic payload as text.
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("non-string panic payload")
    }
}
