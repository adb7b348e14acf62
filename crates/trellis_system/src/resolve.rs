//! Type-directed dependency resolution.
//!
//! Resolving a target type against a scope proceeds as follows:
//!
//! 1. A value already registered in the scope (by name, then unnamed, frame
//!    by frame) is returned unchanged.
//! 2. Otherwise the candidate adapters are tried in order: exact adapters,
//!    most recently registered first, then generic adapters in the order of
//!    the target's declared lineage.
//! 3. For each candidate every parameter is resolved recursively. The first
//!    candidate whose parameters all resolve is invoked, and its result is
//!    added to the scope so later resolutions reuse it.
//! 4. If every candidate fails, a [`ResolveError`] lists why.
//!
//! Named requests never reach the adapters with their name: adapters always
//! produce unnamed values.

use std::sync::Arc;

use crate::adapter::{Adapters, Failure};
use crate::component::{Component, ComponentKey, Components, Frame, Name, Slot, TypeKey};
use crate::inject::{InjectContext, InjectSet};
use crate::{BoxError, BoxFuture};

/// Errors raised while resolving a dependency.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// Nothing is registered for the target and no adapter produces it.
    #[error("no adapter found for `{target}`")]
    NoAdapter {
        /// The requested type.
        target: &'static str,
    },

    /// Adapters exist, but none had all of its dependencies available.
    #[error("no adapter for `{target}` could be satisfied ({} candidates failed)", .errors.len())]
    Unsatisfied {
        /// The requested type.
        target: &'static str,
        /// Why each candidate failed, in the order they were tried.
        errors: Vec<ResolveError>,
    },

    /// The target is already being constructed further up the chain.
    #[error("dependency cycle while resolving `{target}` (via {})", .path.join(" -> "))]
    Cycle {
        /// The requested type.
        target: &'static str,
        /// Types under construction, outermost first.
        path: Vec<&'static str>,
    },

    /// An adapter body returned an error.
    #[error("adapter `{adapter}` failed to produce `{target}`")]
    Adapter {
        /// The requested type.
        target: &'static str,
        /// The adapter that failed.
        adapter: &'static str,
        /// The error it returned.
        #[source]
        source: BoxError,
    },
}

impl ResolveError {
    /// Returns `true` for failures that mean "not available here".
    ///
    /// Such failures let optional parameters fall back and let the resolver
    /// move on to the next candidate. Adapter body failures are not
    /// recoverable: they propagate to the caller unchanged.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Adapter { .. })
    }

    /// The requested type name.
    #[must_use]
    pub fn target(&self) -> &'static str {
        match self {
            Self::NoAdapter { target }
            | Self::Unsatisfied { target, .. }
            | Self::Cycle { target, .. }
            | Self::Adapter { target, .. } => target,
        }
    }
}

impl InjectContext<'_> {
    pub(crate) fn resolve_slot<'b>(
        &'b self,
        key: TypeKey,
        name: Option<&'b str>,
    ) -> BoxFuture<'b, Result<Slot, ResolveError>> {
        Box::pin(async move {
            if let Some(slot) = self.scope().lookup_slot(&ComponentKey::Type(key), name) {
                return Ok(slot);
            }
            if self.path().contains(&key) {
                return Err(ResolveError::Cycle {
                    target: key.name(),
                    path: self.path().iter().map(TypeKey::name).collect(),
                });
            }

            let candidates = self.adapters().candidates(key);
            if candidates.is_empty() {
                return Err(ResolveError::NoAdapter { target: key.name() });
            }

            let nested = self.descend(key);
            let mut errors = Vec::new();
            for record in candidates {
                match record.build(&nested).await {
                    Ok(slot) => return Ok(slot),
                    Err(Failure::Resolve(err)) if err.is_recoverable() => errors.push(err),
                    Err(Failure::Resolve(err)) => return Err(err),
                    Err(Failure::Body(source)) => {
                        return Err(ResolveError::Adapter {
                            target: key.name(),
                            adapter: record.name(),
                            source,
                        });
                    }
                }
            }
            Err(ResolveError::Unsatisfied {
                target: key.name(),
                errors,
            })
        })
    }
}

impl Adapters {
    /// Resolves an unnamed `T` against `scope`.
    ///
    /// # Errors
    ///
    /// Returns a [`ResolveError`] if `T` is neither registered nor
    /// constructible, or an adapter body fails.
    pub async fn resolve<T>(&self, scope: &Components) -> Result<Arc<T>, ResolveError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        InjectContext::new(self, scope).resolve::<T>(None).await
    }

    /// Resolves a `T`, preferring a component registered under `name`.
    ///
    /// # Errors
    ///
    /// See [`resolve`](Self::resolve).
    pub async fn resolve_named<T>(
        &self,
        scope: &Components,
        name: &str,
    ) -> Result<Arc<T>, ResolveError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        InjectContext::new(self, scope)
            .resolve::<T>(Some(name))
            .await
    }

    /// Resolves a `T`, returning `default` if it is unavailable.
    ///
    /// # Errors
    ///
    /// Adapter body failures still propagate.
    pub async fn resolve_or<T>(
        &self,
        scope: &Components,
        default: Arc<T>,
    ) -> Result<Arc<T>, ResolveError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        match self.resolve::<T>(scope).await {
            Err(err) if err.is_recoverable() => Ok(default),
            other => other,
        }
    }

    /// Starts a one-shot injection with extra dependencies.
    #[must_use]
    pub fn injector(&self, scope: &Components) -> Injector<'_> {
        Injector {
            adapters: self,
            scope: scope.clone(),
            frame: Frame::new(),
        }
    }
}

/// One-shot injection with additional dependencies.
///
/// The extra values live in a temporary frame above the caller's scope, as
/// do any values the resolution memoizes; nothing leaks back into the
/// caller's scope.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use trellis_system::prelude::*;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let adapters = Adapters::new();
/// let scope = Components::new();
///
/// let (count, label) = adapters
///     .injector(&scope)
///     .with(3_u32)
///     .with_named(String::from("retries"), "label")
///     .inject_named::<(Arc<u32>, Arc<String>)>(&["count", "label"])
///     .await
///     .unwrap();
///
/// assert_eq!(*count, 3);
/// assert_eq!(*label, "retries");
/// assert!(scope.get::<u32>().is_err());
/// # }
/// ```
pub struct Injector<'a> {
    adapters: &'a Adapters,
    scope: Components,
    frame: Frame,
}

impl Injector<'_> {
    /// Adds an unnamed dependency.
    #[must_use]
    pub fn with<T: Component>(mut self, value: T) -> Self {
        self.frame = self.frame.with(value);
        self
    }

    /// Adds a named dependency.
    #[must_use]
    pub fn with_named<T: Component>(mut self, value: T, name: impl Into<Name>) -> Self {
        self.frame = self.frame.with_named(value, name);
        self
    }

    /// Resolves a tuple of parameters.
    ///
    /// # Errors
    ///
    /// Returns the first parameter's [`ResolveError`].
    pub async fn inject<D: InjectSet>(self) -> Result<D, ResolveError> {
        let scope = self.scope.push_frame(self.frame);
        let cx = InjectContext::new(self.adapters, &scope);
        D::inject_all(&cx, &[]).await
    }

    /// Resolves a tuple of parameters carrying `names`, in order.
    ///
    /// # Errors
    ///
    /// Returns the first parameter's [`ResolveError`].
    pub async fn inject_named<D: InjectSet>(
        self,
        names: &[&'static str],
    ) -> Result<D, ResolveError> {
        let scope = self.scope.push_frame(self.frame);
        let cx = InjectContext::new(self.adapters, &scope);
        D::inject_all(&cx, names).await
    }

    /// Resolves a single `T`.
    ///
    /// # Errors
    ///
    /// See [`Adapters::resolve`].
    pub async fn resolve<T>(self) -> Result<Arc<T>, ResolveError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let scope = self.scope.push_frame(self.frame);
        self.adapters.resolve::<T>(&scope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use core::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);
    impl Component for Counter {}

    #[derive(Debug)]
    struct Widget;
    impl Component for Widget {}

    async fn widget(counter: Arc<Counter>) -> Result<Widget, Infallible> {
        counter.0.fetch_add(1, Ordering::SeqCst);
        Ok(Widget)
    }

    #[derive(Debug)]
    struct Ping;
    impl Component for Ping {}
    #[derive(Debug)]
    struct Pong;
    impl Component for Pong {}

    async fn ping(_: Arc<Pong>) -> Result<Ping, Infallible> {
        Ok(Ping)
    }

    async fn pong(_: Arc<Ping>) -> Result<Pong, Infallible> {
        Ok(Pong)
    }

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    async fn broken() -> Result<Widget, Boom> {
        Err(Boom)
    }

    #[tokio::test]
    async fn registered_values_win_over_adapters() {
        let adapters = Adapters::new();
        adapters.register(widget).unwrap();
        let scope = Components::new();
        let existing = scope.add(Widget);

        let resolved = adapters.resolve::<Widget>(&scope).await.unwrap();
        assert!(Arc::ptr_eq(&existing, &resolved));
    }

    #[tokio::test]
    async fn results_are_memoized_in_scope() {
        let adapters = Adapters::new();
        adapters.register(widget).unwrap();
        let scope = Components::new();
        let counter = scope.add(Counter(AtomicUsize::new(0)));

        let first = adapters.resolve::<Widget>(&scope).await.unwrap();
        let second = adapters.resolve::<Widget>(&scope).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cycles_are_reported() {
        let adapters = Adapters::new();
        adapters.register(ping).unwrap();
        adapters.register(pong).unwrap();

        let err = adapters
            .resolve::<Ping>(&Components::new())
            .await
            .unwrap_err();
        let ResolveError::Unsatisfied { errors, .. } = err else {
            panic!("expected an unsatisfied error");
        };
        let ResolveError::Unsatisfied { errors: inner, .. } = &errors[0] else {
            panic!("expected a nested unsatisfied error");
        };
        assert!(matches!(inner[0], ResolveError::Cycle { .. }));
    }

    #[tokio::test]
    async fn adapter_failures_propagate_without_fallback() {
        let adapters = Adapters::new();
        adapters.register(widget).unwrap();
        adapters.register(broken).unwrap();
        let scope = Components::new();
        scope.add(Counter(AtomicUsize::new(0)));

        let err = adapters.resolve::<Widget>(&scope).await.unwrap_err();
        assert!(matches!(err, ResolveError::Adapter { .. }));
        assert!(!err.is_recoverable());

        let err = adapters
            .resolve_or::<Widget>(&scope, Arc::new(Widget))
            .await
            .unwrap_err();
        assert_eq!(err.target(), core::any::type_name::<Widget>());
    }

    #[tokio::test]
    async fn resolve_or_returns_default_when_unavailable() {
        let adapters = Adapters::new();
        let fallback = Arc::new(Widget);
        let resolved = adapters
            .resolve_or::<Widget>(&Components::new(), Arc::clone(&fallback))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&fallback, &resolved));
    }

    #[tokio::test]
    async fn injector_keeps_caller_scope_clean() {
        let adapters = Adapters::new();
        adapters.register(widget).unwrap();
        let scope = Components::new();

        let widget = adapters
            .injector(&scope)
            .with(Counter(AtomicUsize::new(0)))
            .resolve::<Widget>()
            .await;

        assert!(widget.is_ok());
        assert!(scope.get::<Widget>().is_err());
        assert!(scope.get::<Counter>().is_err());
    }
}
