//! The [`Component`] trait and declared supertype chains.
//!
//! Rust types have no inheritance, so a component spells out what else it
//! may be looked up as. Each [`Lineage::implements`] entry is an upcast to a
//! supertype (usually a trait object), listed nearest first; the value is
//! stored under every one of them when it is added to a registry frame. Each
//! [`Lineage::bound`] entry names a generic factory family the type belongs
//! to, which lets the resolver construct it from a polymorphic factory.

use core::any::Any;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::{ComponentError, TypeKey};
use crate::adapter::{AdapterRecord, Binder};

/// Type-erased storage for one registered value.
///
/// The concrete type behind the `Any` is always `Arc<T>` for the key the
/// slot was stored under, which keeps unsized keys (`dyn Trait`) working.
pub(crate) type Slot = Arc<dyn Any + Send + Sync>;

pub(crate) fn into_slot<T: ?Sized + Send + Sync + 'static>(value: Arc<T>) -> Slot {
    Arc::new(value)
}

pub(crate) fn from_slot<T: ?Sized + Send + Sync + 'static>(slot: &Slot) -> Option<Arc<T>> {
    (**slot).downcast_ref::<Arc<T>>().cloned()
}

/// A value that can be registered in a [`Components`](super::Components) scope.
///
/// Implement it by hand or with `#[derive(Component)]`. The default lineage is
/// empty: the value is only reachable under its own type.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use trellis_system::component::{Component, Components, Lineage};
///
/// trait Greeter: Send + Sync {
///     fn greet(&self) -> String;
/// }
///
/// struct English;
///
/// impl Greeter for English {
///     fn greet(&self) -> String {
///         "hello".into()
///     }
/// }
///
/// impl Component for English {
///     fn lineage(lineage: &mut Lineage<Self>) {
///         lineage.implements::<dyn Greeter>(|this| this);
///     }
/// }
///
/// let components = Components::new();
/// components.add(English);
///
/// let greeter: Arc<dyn Greeter> = components.get::<dyn Greeter>().unwrap();
/// assert_eq!(greeter.greet(), "hello");
/// ```
pub trait Component: Send + Sync + Sized + 'static {
    /// Declares the supertypes and generic factory families of this type.
    fn lineage(_lineage: &mut Lineage<Self>) {}
}

struct Upcast<T> {
    key: TypeKey,
    cast: Box<dyn Fn(&Arc<T>) -> Slot + Send + Sync>,
}

/// A generic factory family a component type belongs to.
pub(crate) struct Bound {
    pub(crate) key: TypeKey,
    pub(crate) record: fn() -> Result<AdapterRecord, ComponentError>,
}

/// The declared supertype chain of a component type `T`.
///
/// Filled in by [`Component::lineage`].
pub struct Lineage<T: Component> {
    upcasts: Vec<Upcast<T>>,
    bounds: Vec<Bound>,
}

impl<T: Component> Lineage<T> {
    /// Collects the lineage `T` declares.
    pub(crate) fn of() -> Self {
        let mut lineage = Self {
            upcasts: Vec::new(),
            bounds: Vec::new(),
        };
        T::lineage(&mut lineage);
        lineage
    }

    /// Registers `T` as also being a `U`.
    ///
    /// The upcast is usually the identity closure `|this| this`, which lets
    /// the compiler perform the unsized coercion to a trait object. Call it
    /// nearest supertype first; a frame slot keeps the value registered with
    /// the greatest distance from the slot's key, so more derived values win.
    pub fn implements<U>(&mut self, upcast: fn(Arc<T>) -> Arc<U>) -> &mut Self
    where
        U: ?Sized + Send + Sync + 'static,
    {
        self.upcasts.push(Upcast {
            key: TypeKey::of::<U>(),
            cast: Box::new(move |value| into_slot(upcast(Arc::clone(value)))),
        });
        self
    }

    /// Declares that `T` can be produced by the generic factory `B`.
    ///
    /// `B` is a type tag; it only takes part in resolution once it has been
    /// enabled with [`Adapters::register_generic`](crate::adapter::Adapters::register_generic).
    pub fn bound<B: Binder<T>>(&mut self) -> &mut Self {
        self.bounds.push(Bound {
            key: TypeKey::of::<B>(),
            record: AdapterRecord::for_binder::<T, B>,
        });
        self
    }

    /// Returns the declared supertypes, nearest first.
    pub fn supertypes(&self) -> impl Iterator<Item = TypeKey> + '_ {
        self.upcasts.iter().map(|upcast| upcast.key)
    }

    /// Yields `(key, distance, slot)` for the value and each of its supertypes.
    pub(crate) fn slots<'a>(
        &'a self,
        value: &'a Arc<T>,
    ) -> impl Iterator<Item = (TypeKey, u16, Slot)> + 'a {
        let own = (TypeKey::of::<T>(), 0, into_slot(Arc::clone(value)));
        let upcasts = (1u16..)
            .zip(&self.upcasts)
            .map(move |(distance, upcast)| (upcast.key, distance, (upcast.cast)(value)));
        core::iter::once(own).chain(upcasts)
    }

    pub(crate) fn into_bounds(self) -> Vec<Bound> {
        self.bounds
    }
}

macro_rules! impl_component {
    ($($ty:ty),* $(,)?) => {
        $(impl Component for $ty {})*
    };
}

impl_component!(
    String,
    &'static str,
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    f32,
    f64,
    Duration,
    PathBuf,
);

#[cfg(test)]
mod tests {
    use super::*;

    trait Animal: Send + Sync {}
    trait Pet: Animal {}

    struct Dog;

    impl Animal for Dog {}
    impl Pet for Dog {}

    impl Component for Dog {
        fn lineage(lineage: &mut Lineage<Self>) {
            lineage
                .implements::<dyn Pet>(|this| this)
                .implements::<dyn Animal>(|this| this);
        }
    }

    #[test]
    fn lineage_lists_supertypes_nearest_first() {
        let lineage = Lineage::<Dog>::of();
        let supertypes: Vec<_> = lineage.supertypes().collect();
        assert_eq!(
            supertypes,
            vec![TypeKey::of::<dyn Pet>(), TypeKey::of::<dyn Animal>()]
        );
    }

    #[test]
    fn slots_hold_the_upcast_value() {
        let lineage = Lineage::<Dog>::of();
        let dog = Arc::new(Dog);
        let slots: Vec<_> = lineage.slots(&dog).collect();

        assert_eq!(slots.len(), 3);
        assert_eq!(slots[0].1, 0);
        assert!(from_slot::<Dog>(&slots[0].2).is_some());
        assert!(from_slot::<dyn Pet>(&slots[1].2).is_some());
        assert!(from_slot::<dyn Animal>(&slots[2].2).is_some());
        assert!(from_slot::<Dog>(&slots[2].2).is_none());
    }

    #[test]
    fn default_lineage_is_empty() {
        let lineage = Lineage::<String>::of();
        assert_eq!(lineage.supertypes().count(), 0);
        assert!(lineage.into_bounds().is_empty());
    }
}
