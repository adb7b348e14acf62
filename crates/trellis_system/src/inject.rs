//! Injectable parameters.
//!
//! Factories and plugin entry points declare their dependencies as typed
//! parameters. Each parameter type implements [`Inject`], which says what
//! declared type it resolves and how a failure to resolve it is treated:
//!
//! | Parameter | Resolves | When nothing provides it |
//! |---|---|---|
//! | `Arc<T>` | `T` | the factory is unsatisfied |
//! | `Option<Arc<T>>` | `T` | `None` |
//! | [`OrDefault<T>`] | `T` | `T::default()` |
//! | [`All<T>`] | every `T` in scope, by name | an empty map |
//! | [`Components`] | the current scope | never fails |
//!
//! A parameter may carry a name (given when the factory is registered). A
//! named parameter first looks for a component registered under that name
//! and falls back to the unnamed one, frame by frame.

use core::ops::Deref;
use std::sync::Arc;

use hashbrown::HashMap;
use variadics_please::all_tuples;

use crate::BoxFuture;
use crate::adapter::Adapters;
use crate::component::{Component, Components, Name, TypeKey, from_slot};
use crate::resolve::ResolveError;

/// The declaration of a single factory parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    key: TypeKey,
    name: Option<&'static str>,
    required: bool,
}

impl ParamSpec {
    /// Builds the declaration of parameter type `P`.
    #[must_use]
    pub fn of<P: Inject>(name: Option<&'static str>) -> Self {
        Self {
            key: P::declared_type(),
            name,
            required: P::is_required(),
        }
    }

    /// The declared type of the parameter.
    #[must_use]
    pub fn key(&self) -> TypeKey {
        self.key
    }

    /// The parameter name used for named lookups.
    #[must_use]
    pub fn name(&self) -> Option<&'static str> {
        self.name
    }

    /// Whether failing to resolve this parameter fails the factory.
    #[must_use]
    pub fn is_required(&self) -> bool {
        self.required
    }
}

/// Everything needed to resolve parameters: the factory index, the scope
/// that receives memoized values, and the chain of types currently being
/// constructed (used to detect cycles).
pub struct InjectContext<'a> {
    adapters: &'a Adapters,
    scope: &'a Components,
    path: Vec<TypeKey>,
}

impl<'a> InjectContext<'a> {
    /// Creates a context resolving against `scope`.
    #[must_use]
    pub fn new(adapters: &'a Adapters, scope: &'a Components) -> Self {
        Self {
            adapters,
            scope,
            path: Vec::new(),
        }
    }

    /// The scope being resolved against.
    #[must_use]
    pub fn scope(&self) -> &'a Components {
        self.scope
    }

    /// The factory index.
    #[must_use]
    pub fn adapters(&self) -> &'a Adapters {
        self.adapters
    }

    /// Types currently under construction, outermost first.
    #[must_use]
    pub fn path(&self) -> &[TypeKey] {
        &self.path
    }

    /// Resolves a `T` from the scope or, failing that, from the factory index.
    ///
    /// # Errors
    ///
    /// Returns a [`ResolveError`] if no registered value or factory can
    /// provide a `T`.
    pub async fn resolve<T>(&self, name: Option<&str>) -> Result<Arc<T>, ResolveError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let key = TypeKey::of::<T>();
        let slot = self.resolve_slot(key, name).await?;
        // Slots are always stored under their own type, so this only fails
        // for a value inserted under a foreign key.
        from_slot::<T>(&slot).ok_or(ResolveError::NoAdapter { target: key.name() })
    }

    /// A context for resolving the parameters of a factory producing `key`.
    pub(crate) fn descend(&self, key: TypeKey) -> InjectContext<'a> {
        let mut path = self.path.clone();
        path.push(key);
        InjectContext {
            adapters: self.adapters,
            scope: self.scope,
            path,
        }
    }
}

/// A value that can be supplied as a factory or plugin parameter.
pub trait Inject: Sized + Send + 'static {
    /// The declared type this parameter resolves.
    fn declared_type() -> TypeKey;

    /// Whether a failed resolution fails the enclosing factory.
    fn is_required() -> bool {
        true
    }

    /// Produces the parameter value.
    fn inject<'a>(
        cx: &'a InjectContext<'a>,
        name: Option<&'static str>,
    ) -> BoxFuture<'a, Result<Self, ResolveError>>;
}

impl<T> Inject for Arc<T>
where
    T: ?Sized + Send + Sync + 'static,
{
    fn declared_type() -> TypeKey {
        TypeKey::of::<T>()
    }

    fn inject<'a>(
        cx: &'a InjectContext<'a>,
        name: Option<&'static str>,
    ) -> BoxFuture<'a, Result<Self, ResolveError>> {
        Box::pin(cx.resolve::<T>(name))
    }
}

/// Optional dependency: an unresolvable `T` yields `None`.
///
/// Failures of a factory body still propagate.
impl<T> Inject for Option<Arc<T>>
where
    T: ?Sized + Send + Sync + 'static,
{
    fn declared_type() -> TypeKey {
        TypeKey::of::<T>()
    }

    fn is_required() -> bool {
        false
    }

    fn inject<'a>(
        cx: &'a InjectContext<'a>,
        name: Option<&'static str>,
    ) -> BoxFuture<'a, Result<Self, ResolveError>> {
        Box::pin(async move {
            match cx.resolve::<T>(name).await {
                Ok(value) => Ok(Some(value)),
                Err(err) if err.is_recoverable() => Ok(None),
                Err(err) => Err(err),
            }
        })
    }
}

/// A dependency with a fallback: an unresolvable `T` yields `T::default()`.
///
/// The default is handed to the factory but not registered in the scope.
#[derive(Debug)]
pub struct OrDefault<T>(pub Arc<T>);

impl<T> OrDefault<T> {
    /// Unwraps the shared value.
    #[must_use]
    pub fn into_inner(self) -> Arc<T> {
        self.0
    }
}

impl<T> Deref for OrDefault<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: Component + Default> Inject for OrDefault<T> {
    fn declared_type() -> TypeKey {
        TypeKey::of::<T>()
    }

    fn is_required() -> bool {
        false
    }

    fn inject<'a>(
        cx: &'a InjectContext<'a>,
        name: Option<&'static str>,
    ) -> BoxFuture<'a, Result<Self, ResolveError>> {
        Box::pin(async move {
            match cx.resolve::<T>(name).await {
                Ok(value) => Ok(Self(value)),
                Err(err) if err.is_recoverable() => Ok(Self(Arc::new(T::default()))),
                Err(err) => Err(err),
            }
        })
    }
}

/// Every registered `T` in scope, keyed by name (see [`Components::find`]).
///
/// Never constructs anything.
pub struct All<T: ?Sized>(pub HashMap<Option<Name>, Arc<T>>);

impl<T: ?Sized> All<T> {
    /// Unwraps the map.
    #[must_use]
    pub fn into_inner(self) -> HashMap<Option<Name>, Arc<T>> {
        self.0
    }
}

impl<T: ?Sized> Deref for All<T> {
    type Target = HashMap<Option<Name>, Arc<T>>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> Inject for All<T>
where
    T: ?Sized + Send + Sync + 'static,
{
    fn declared_type() -> TypeKey {
        TypeKey::of::<T>()
    }

    fn is_required() -> bool {
        false
    }

    fn inject<'a>(
        cx: &'a InjectContext<'a>,
        _name: Option<&'static str>,
    ) -> BoxFuture<'a, Result<Self, ResolveError>> {
        let found = cx.scope().find::<T>();
        Box::pin(async move { Ok(Self(found)) })
    }
}

/// The scope the enclosing factory is being resolved in.
impl Inject for Components {
    fn declared_type() -> TypeKey {
        TypeKey::of::<Components>()
    }

    fn is_required() -> bool {
        false
    }

    fn inject<'a>(
        cx: &'a InjectContext<'a>,
        _name: Option<&'static str>,
    ) -> BoxFuture<'a, Result<Self, ResolveError>> {
        let scope = cx.scope().clone();
        Box::pin(async move { Ok(scope) })
    }
}

/// A tuple of [`Inject`] parameters, resolved left to right.
pub trait InjectSet: Sized + Send + 'static {
    /// Number of parameters.
    const ARITY: usize;

    /// Declarations of every parameter, paired with `names` in order.
    fn params(names: &[&'static str]) -> Vec<ParamSpec>;

    /// Resolves every parameter, stopping at the first failure.
    fn inject_all<'a>(
        cx: &'a InjectContext<'a>,
        names: &'a [&'static str],
    ) -> BoxFuture<'a, Result<Self, ResolveError>>;
}

impl InjectSet for () {
    const ARITY: usize = 0;

    fn params(_names: &[&'static str]) -> Vec<ParamSpec> {
        Vec::new()
    }

    fn inject_all<'a>(
        _cx: &'a InjectContext<'a>,
        _names: &'a [&'static str],
    ) -> BoxFuture<'a, Result<Self, ResolveError>> {
        Box::pin(async { Ok(()) })
    }
}

macro_rules! impl_inject_set {
    ($($param:ident),*) => {
        impl<$($param: Inject),*> InjectSet for ($($param,)*) {
            const ARITY: usize = [$(stringify!($param)),*].len();

            fn params(names: &[&'static str]) -> Vec<ParamSpec> {
                let mut names = names.iter().copied();
                vec![$(ParamSpec::of::<$param>(names.next())),*]
            }

            fn inject_all<'a>(
                cx: &'a InjectContext<'a>,
                names: &'a [&'static str],
            ) -> BoxFuture<'a, Result<Self, ResolveError>> {
                Box::pin(async move {
                    let mut names = names.iter().copied();
                    Ok(($(<$param as Inject>::inject(cx, names.next()).await?,)*))
                })
            }
        }
    };
}

// Generate impls for tuples of size 1 to 12
all_tuples!(impl_inject_set, 1, 12, P);

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Settings {
        retries: u32,
    }

    impl Component for Settings {}

    #[test]
    fn param_specs_pair_names_in_order() {
        let params = <(Arc<u32>, Option<Arc<String>>)>::params(&["count", "label"]);

        assert_eq!(params.len(), 2);
        assert_eq!(params[0].key(), TypeKey::of::<u32>());
        assert_eq!(params[0].name(), Some("count"));
        assert!(params[0].is_required());
        assert_eq!(params[1].key(), TypeKey::of::<String>());
        assert!(!params[1].is_required());
    }

    #[test]
    fn arity_counts_tuple_members() {
        assert_eq!(<() as InjectSet>::ARITY, 0);
        assert_eq!(<(Arc<u8>,) as InjectSet>::ARITY, 1);
        assert_eq!(<(Arc<u8>, Components, All<u8>) as InjectSet>::ARITY, 3);
    }

    #[test]
    fn missing_names_leave_params_unnamed() {
        let params = <(Arc<u8>, Arc<u16>)>::params(&[]);
        assert!(params.iter().all(|param| param.name().is_none()));
    }

    #[tokio::test]
    async fn optional_and_default_params_never_fail() {
        let adapters = Adapters::new();
        let scope = Components::new();
        let cx = InjectContext::new(&adapters, &scope);

        let (missing, settings, all) =
            <(Option<Arc<u64>>, OrDefault<Settings>, All<String>)>::inject_all(&cx, &[])
                .await
                .unwrap();

        assert!(missing.is_none());
        assert_eq!(settings.retries, 0);
        assert!(all.is_empty());
        // Defaults are not memoized into the scope.
        assert!(scope.get::<Settings>().is_err());
    }

    #[tokio::test]
    async fn required_param_fails_when_unavailable() {
        let adapters = Adapters::new();
        let scope = Components::new();
        let cx = InjectContext::new(&adapters, &scope);

        let result = <(Arc<u64>,)>::inject_all(&cx, &[]).await;
        assert!(matches!(result, Err(ResolveError::NoAdapter { .. })));
    }

    #[tokio::test]
    async fn named_param_prefers_named_component() {
        let adapters = Adapters::new();
        let scope = Components::new();
        scope.add(String::from("plain"));
        scope.add_named(String::from("special"), "label");
        let cx = InjectContext::new(&adapters, &scope);

        let (label, other) = <(Arc<String>, Arc<String>)>::inject_all(&cx, &["label", "other"])
            .await
            .unwrap();

        assert_eq!(*label, "special");
        assert_eq!(*other, "plain");
    }

    #[tokio::test]
    async fn components_param_is_the_current_scope() {
        let adapters = Adapters::new();
        let scope = Components::new().push();
        let cx = InjectContext::new(&adapters, &scope);

        let (injected,) = <(Components,)>::inject_all(&cx, &[]).await.unwrap();
        assert!(injected.same_frame(&scope));
    }
}
