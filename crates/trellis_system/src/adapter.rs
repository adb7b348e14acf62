//! Factories ("adapters") and the factory index.
//!
//! An adapter is a registered way to produce a value of a target type from
//! other resolved values. Three kinds of adapter exist:
//!
//! - **Function adapters**: async functions whose parameters implement
//!   [`Inject`] and which return `Result<T, E>`.
//! - **Injectable types**: plain constructors, declared by implementing
//!   [`Injectable`] (usually via `#[derive(Injectable)]`).
//! - **Generic adapters**: a [`Binder`] type tag that can produce any type
//!   declaring it in its [`Lineage`](crate::component::Lineage).
//!
//! Registration happens up front, before resolution starts. Later
//! registrations for the same target take precedence over earlier ones, so
//! applications can override adapters provided by libraries.
//!
//! # Example
//!
//! ```
//! use std::convert::Infallible;
//! use std::sync::Arc;
//! use trellis_system::prelude::*;
//!
//! struct Database { url: String }
//! impl Component for Database {}
//!
//! async fn connect(url: Arc<String>) -> Result<Database, Infallible> {
//!     Ok(Database { url: url.to_string() })
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let adapters = Adapters::new();
//! adapters.register(connect).unwrap();
//!
//! let scope = Components::new();
//! scope.add(String::from("postgres://localhost"));
//!
//! let db = adapters.resolve::<Database>(&scope).await.unwrap();
//! assert_eq!(db.url, "postgres://localhost");
//! # }
//! ```

use core::any::type_name;
use core::future::Future;
use core::marker::PhantomData;
use std::sync::{Arc, LazyLock};

use hashbrown::{HashMap, HashSet};
use parking_lot::RwLock;
use variadics_please::all_tuples;

use crate::component::{Bound, Component, ComponentError, Components, Lineage, Slot, TypeKey};
use crate::inject::{Inject, InjectContext, InjectSet, ParamSpec};
use crate::resolve::ResolveError;
use crate::{BoxError, BoxFuture};

/// Why an adapter did not produce a value.
pub(crate) enum Failure {
    /// A parameter could not be resolved.
    Resolve(ResolveError),
    /// The adapter body itself failed.
    Body(BoxError),
}

/// Type-erased adapter body.
pub(crate) trait ErasedFactory: Send + Sync + 'static {
    /// Resolves the parameters, runs the body, and commits the result into
    /// the context's scope.
    fn build<'a>(
        &'a self,
        cx: &'a InjectContext<'a>,
        names: &'a [&'static str],
    ) -> BoxFuture<'a, Result<Slot, Failure>>;
}

/// Registers a freshly built value into the current scope.
fn commit<T: Component>(scope: &Components, value: T) -> Slot {
    let value = scope.add_shared(Arc::new(value), None);
    crate::component::into_slot(value)
}

/// One registered way of producing a target type.
pub struct AdapterRecord {
    name: &'static str,
    target: TypeKey,
    binder: Option<TypeKey>,
    params: Vec<ParamSpec>,
    names: Vec<&'static str>,
    factory: Box<dyn ErasedFactory>,
}

impl AdapterRecord {
    fn new<T, D>(
        name: &'static str,
        names: &[&'static str],
        binder: Option<TypeKey>,
        factory: impl ErasedFactory,
    ) -> Result<Self, ComponentError>
    where
        T: Component,
        D: InjectSet,
    {
        if !names.is_empty() && names.len() != D::ARITY {
            return Err(ComponentError::invalid::<T>(format!(
                "adapter `{name}` takes {} parameters but {} names were given",
                D::ARITY,
                names.len()
            )));
        }
        let target = TypeKey::of::<T>();
        let params = D::params(names);
        if params
            .iter()
            .any(|param| param.is_required() && param.key() == target)
        {
            return Err(ComponentError::invalid::<T>(format!(
                "adapter `{name}` requires its own target type"
            )));
        }
        Ok(Self {
            name,
            target,
            binder,
            params,
            names: names.to_vec(),
            factory: Box::new(factory),
        })
    }

    /// Builds the record for `T` produced through the generic adapter `B`.
    pub(crate) fn for_binder<T, B>() -> Result<Self, ComponentError>
    where
        T: Component,
        B: Binder<T>,
    {
        Self::new::<T, B::Deps>(
            type_name::<B>(),
            B::PARAM_NAMES,
            Some(TypeKey::of::<B>()),
            BinderFactory::<T, B>(PhantomData),
        )
    }

    /// Diagnostic name of the adapter.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The type this adapter produces.
    #[must_use]
    pub fn target(&self) -> TypeKey {
        self.target
    }

    /// For generic adapters, the binder type tag it was selected through.
    #[must_use]
    pub fn binder(&self) -> Option<TypeKey> {
        self.binder
    }

    /// The declared parameters.
    #[must_use]
    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub(crate) fn build<'a>(
        &'a self,
        cx: &'a InjectContext<'a>,
    ) -> BoxFuture<'a, Result<Slot, Failure>> {
        self.factory.build(cx, &self.names)
    }
}

impl core::fmt::Debug for AdapterRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AdapterRecord")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("binder", &self.binder)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

// ─── Function adapters ───

/// Conversion of an async function into an adapter.
///
/// Implemented for `Fn(P0, .., Pn) -> impl Future<Output = Result<T, E>>`
/// where every `Pi` implements [`Inject`], for up to 12 parameters.
pub trait IntoAdapter<Marker>: Sized {
    /// The type the adapter produces.
    type Target: Component;

    /// Builds the adapter record.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::InvalidRegistration`] if `names` does not
    /// match the parameter count or the function requires its own output.
    fn into_record(self, names: &[&'static str]) -> Result<AdapterRecord, ComponentError>;
}

struct FunctionFactory<F, Marker> {
    func: F,
    _marker: PhantomData<fn() -> Marker>,
}

macro_rules! impl_into_adapter {
    ($(($param:ident, $arg:ident)),*) => {
        impl<Func, Fut, T, E, $($param),*> IntoAdapter<fn($($param,)*) -> Result<T, E>> for Func
        where
            Func: Fn($($param),*) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<T, E>> + Send + 'static,
            T: Component,
            E: Into<BoxError> + 'static,
            $($param: Inject,)*
        {
            type Target = T;

            fn into_record(self, names: &[&'static str]) -> Result<AdapterRecord, ComponentError> {
                AdapterRecord::new::<T, ($($param,)*)>(
                    type_name::<Func>(),
                    names,
                    None,
                    FunctionFactory::<Func, fn($($param,)*) -> Result<T, E>> {
                        func: self,
                        _marker: PhantomData,
                    },
                )
            }
        }

        impl<Func, Fut, T, E, $($param),*> ErasedFactory
            for FunctionFactory<Func, fn($($param,)*) -> Result<T, E>>
        where
            Func: Fn($($param),*) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<T, E>> + Send + 'static,
            T: Component,
            E: Into<BoxError> + 'static,
            $($param: Inject,)*
        {
            fn build<'a>(
                &'a self,
                cx: &'a InjectContext<'a>,
                names: &'a [&'static str],
            ) -> BoxFuture<'a, Result<Slot, Failure>> {
                Box::pin(async move {
                    let ($($arg,)*) = <($($param,)*) as InjectSet>::inject_all(cx, names)
                        .await
                        .map_err(Failure::Resolve)?;
                    let value = (self.func)($($arg),*)
                        .await
                        .map_err(|err| Failure::Body(err.into()))?;
                    Ok(commit(cx.scope(), value))
                })
            }
        }
    };
}

all_tuples!(impl_into_adapter, 0, 12, P, p);

// ─── Injectable types ───

/// A type constructed directly from its injected dependencies.
///
/// Use `#[derive(Injectable)]` on a struct with named fields to generate
/// this from the field types, with field names as parameter names.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use trellis_system::prelude::*;
///
/// struct Clock;
/// impl Component for Clock {}
///
/// struct Scheduler {
///     clock: Arc<Clock>,
/// }
///
/// impl Component for Scheduler {}
///
/// impl Injectable for Scheduler {
///     type Deps = (Arc<Clock>,);
///     const PARAM_NAMES: &'static [&'static str] = &["clock"];
///
///     fn inject((clock,): Self::Deps) -> Self {
///         Self { clock }
///     }
/// }
///
/// let adapters = Adapters::new();
/// adapters.register_injectable::<Scheduler>().unwrap();
/// ```
pub trait Injectable: Component {
    /// The constructor parameters.
    type Deps: InjectSet;

    /// Parameter names, in order. Empty means every parameter is unnamed.
    const PARAM_NAMES: &'static [&'static str] = &[];

    /// Builds the value.
    fn inject(deps: Self::Deps) -> Self;
}

struct InjectableFactory<T>(PhantomData<fn() -> T>);

impl<T: Injectable> ErasedFactory for InjectableFactory<T> {
    fn build<'a>(
        &'a self,
        cx: &'a InjectContext<'a>,
        names: &'a [&'static str],
    ) -> BoxFuture<'a, Result<Slot, Failure>> {
        Box::pin(async move {
            let deps = T::Deps::inject_all(cx, names)
                .await
                .map_err(Failure::Resolve)?;
            Ok(commit(cx.scope(), T::inject(deps)))
        })
    }
}

// ─── Generic adapters ───

/// A generic adapter: one polymorphic factory for a whole family of types.
///
/// The implementing type is a tag. A component joins the family by calling
/// [`Lineage::bound`](crate::component::Lineage::bound) with the tag; the
/// family takes part in resolution once
/// [`Adapters::register_generic`] has been called for it, and each member
/// once [`Adapters::register_component`] has recorded its lineage.
///
/// When a type belongs to several families, the one declared first in its
/// lineage is tried first.
pub trait Binder<T: Component>: 'static {
    /// The factory parameters.
    type Deps: InjectSet;

    /// Parameter names, in order.
    const PARAM_NAMES: &'static [&'static str] = &[];

    /// Produces a `T` from the resolved parameters.
    fn adapt(deps: Self::Deps) -> BoxFuture<'static, Result<T, BoxError>>;
}

struct BinderFactory<T, B>(PhantomData<fn() -> (T, B)>);

impl<T: Component, B: Binder<T>> ErasedFactory for BinderFactory<T, B> {
    fn build<'a>(
        &'a self,
        cx: &'a InjectContext<'a>,
        names: &'a [&'static str],
    ) -> BoxFuture<'a, Result<Slot, Failure>> {
        Box::pin(async move {
            let deps = B::Deps::inject_all(cx, names)
                .await
                .map_err(Failure::Resolve)?;
            let value = B::adapt(deps).await.map_err(Failure::Body)?;
            Ok(commit(cx.scope(), value))
        })
    }
}

// ─── Index ───

#[derive(Default)]
struct AdapterIndex {
    /// Target type to adapters, most recent registration first.
    exact: HashMap<TypeKey, Vec<Arc<AdapterRecord>>>,
    /// Enabled binder tags.
    generic: HashSet<TypeKey>,
    /// Component type to its generic adapters, nearest bound first.
    members: HashMap<TypeKey, Vec<Arc<AdapterRecord>>>,
}

/// The factory index.
///
/// `Adapters` is normally created once per process ([`Adapters::shared`]),
/// filled during startup, and read during resolution. Tests create their own
/// instance for isolation.
#[derive(Default)]
pub struct Adapters {
    index: RwLock<AdapterIndex>,
}

impl Component for Adapters {}

static SHARED: LazyLock<Arc<Adapters>> = LazyLock::new(|| Arc::new(Adapters::new()));

impl Adapters {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide index.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::clone(&SHARED)
    }

    /// Registers an async function adapter with unnamed parameters.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::InvalidRegistration`] if the function
    /// requires its own output type.
    pub fn register<M, F: IntoAdapter<M>>(&self, adapter: F) -> Result<(), ComponentError> {
        self.register_named(adapter, &[])
    }

    /// Registers an async function adapter whose parameters carry `names`.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::InvalidRegistration`] if `names` does not
    /// have one entry per parameter, or the function requires its own
    /// output type.
    pub fn register_named<M, F: IntoAdapter<M>>(
        &self,
        adapter: F,
        names: &[&'static str],
    ) -> Result<(), ComponentError> {
        let record = adapter.into_record(names)?;
        self.insert(record);
        Ok(())
    }

    /// Registers the constructor of an [`Injectable`] type.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::InvalidRegistration`] if the declaration is
    /// inconsistent.
    pub fn register_injectable<T: Injectable>(&self) -> Result<(), ComponentError> {
        let record = AdapterRecord::new::<T, T::Deps>(
            type_name::<T>(),
            T::PARAM_NAMES,
            None,
            InjectableFactory::<T>(PhantomData),
        )?;
        self.insert(record);
        Ok(())
    }

    /// Enables the generic adapter family tagged `B`.
    pub fn register_generic<B: 'static>(&self) {
        self.index.write().generic.insert(TypeKey::of::<B>());
    }

    /// Records the generic families `T` belongs to, per its lineage.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::InvalidRegistration`] if a family's
    /// declaration is inconsistent for `T`.
    pub fn register_component<T: Component>(&self) -> Result<(), ComponentError> {
        let records = Lineage::<T>::of()
            .into_bounds()
            .into_iter()
            .map(|Bound { record, .. }| record().map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        self.index
            .write()
            .members
            .insert(TypeKey::of::<T>(), records);
        Ok(())
    }

    /// Returns the adapters that could produce `T`, in the order they would
    /// be tried.
    #[must_use]
    pub fn adapters_for<T: ?Sized + 'static>(&self) -> Vec<Arc<AdapterRecord>> {
        self.candidates(TypeKey::of::<T>())
    }

    /// Returns `true` if any adapter could produce `T`.
    #[must_use]
    pub fn can_adapt<T: ?Sized + 'static>(&self) -> bool {
        !self.adapters_for::<T>().is_empty()
    }

    fn insert(&self, record: AdapterRecord) {
        self.index
            .write()
            .exact
            .entry(record.target)
            .or_default()
            .insert(0, Arc::new(record));
    }

    /// Exact adapters first, then generic adapters by lineage order.
    pub(crate) fn candidates(&self, target: TypeKey) -> Vec<Arc<AdapterRecord>> {
        let index = self.index.read();
        let exact = index.exact.get(&target).into_iter().flatten();
        let generic = index
            .members
            .get(&target)
            .into_iter()
            .flatten()
            .filter(|record| {
                record
                    .binder
                    .is_some_and(|binder| index.generic.contains(&binder))
            });
        exact.chain(generic).cloned().collect()
    }
}

impl core::fmt::Debug for Adapters {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let index = self.index.read();
        f.debug_struct("Adapters")
            .field("targets", &index.exact.len())
            .field("generic", &index.generic.len())
            .field("members", &index.members.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;

    struct Engine;
    impl Component for Engine {}

    async fn engine() -> Result<Engine, Infallible> {
        Ok(Engine)
    }

    async fn engine_from(_: Arc<u32>) -> Result<Engine, Infallible> {
        Ok(Engine)
    }

    async fn recursive(_: Arc<Engine>) -> Result<Engine, Infallible> {
        Ok(Engine)
    }

    async fn maybe_recursive(_: Option<Arc<Engine>>) -> Result<Engine, Infallible> {
        Ok(Engine)
    }

    #[test]
    fn later_registrations_come_first() {
        let adapters = Adapters::new();
        adapters.register(engine).unwrap();
        adapters.register(engine_from).unwrap();

        let arities: Vec<_> = adapters
            .adapters_for::<Engine>()
            .iter()
            .map(|record| record.params().len())
            .collect();
        assert_eq!(arities, vec![1, 0]);
    }

    #[test]
    fn name_count_must_match_arity() {
        let adapters = Adapters::new();
        let err = adapters
            .register_named(engine_from, &["a", "b"])
            .unwrap_err();
        assert!(matches!(err, ComponentError::InvalidRegistration { .. }));
        assert!(!adapters.can_adapt::<Engine>());
    }

    #[test]
    fn requiring_own_target_is_rejected() {
        let adapters = Adapters::new();
        assert!(adapters.register(recursive).is_err());
        // An optional self-dependency is allowed.
        assert!(adapters.register(maybe_recursive).is_ok());
    }

    #[test]
    fn records_expose_their_declaration() {
        let adapters = Adapters::new();
        adapters.register_named(engine_from, &["cylinders"]).unwrap();

        let records = adapters.adapters_for::<Engine>();
        let record = &records[0];
        assert_eq!(record.target(), TypeKey::of::<Engine>());
        assert_eq!(record.params()[0].name(), Some("cylinders"));
        assert!(record.binder().is_none());
        assert!(record.name().contains("engine_from"));
    }
}
