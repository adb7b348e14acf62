//! Registry frames and scopes.

use core::any::{Any, TypeId};
use core::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;

use super::lineage::{Lineage, Slot, from_slot, into_slot};
use super::{Component, ComponentKey, Name, TypeKey};

/// Errors raised by registry operations.
#[derive(Debug, thiserror::Error)]
pub enum ComponentError {
    /// Nothing is registered under the requested key and name in any frame.
    #[error("component not found: {key} (name: {name:?})")]
    NotFound {
        /// The requested key.
        key: ComponentKey,
        /// The requested name, if any.
        name: Option<Name>,
    },

    /// A registration that can never be valid, e.g. a type identifier used
    /// as a value or a factory whose declaration is inconsistent.
    #[error("invalid registration of `{type_name}`: {reason}")]
    InvalidRegistration {
        /// The type being registered.
        type_name: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl ComponentError {
    pub(crate) fn invalid<T: ?Sized>(reason: impl Into<String>) -> Self {
        Self::InvalidRegistration {
            type_name: core::any::type_name::<T>(),
            reason: reason.into(),
        }
    }
}

struct Entry {
    slot: Slot,
    distance: u16,
}

/// All values stored under one key in one frame.
#[derive(Default)]
struct Space {
    unnamed: Option<Entry>,
    named: HashMap<Name, Entry>,
}

impl Space {
    /// Stores `entry`, unless a more derived value already occupies the slot.
    fn put(&mut self, name: Option<Name>, entry: Entry) {
        match name {
            None => {
                if self
                    .unnamed
                    .as_ref()
                    .is_none_or(|current| entry.distance >= current.distance)
                {
                    self.unnamed = Some(entry);
                }
            }
            Some(name) => {
                let keep_current = self
                    .named
                    .get(&*name)
                    .is_some_and(|current| entry.distance < current.distance);
                if !keep_current {
                    self.named.insert(name, entry);
                }
            }
        }
    }

    /// The named entry, falling back to the unnamed one.
    fn lookup(&self, name: Option<&str>) -> Option<&Slot> {
        name.and_then(|name| self.named.get(name))
            .or(self.unnamed.as_ref())
            .map(|entry| &entry.slot)
    }
}

/// One level of a [`Components`] scope: a map from `(key, name)` to a value.
///
/// Frames can be prepared up front with the builder methods and then pushed
/// with [`Components::push_frame`].
///
/// # Example
///
/// ```
/// use trellis_system::component::{Components, Frame};
///
/// let root = Components::new();
/// let scope = root.push_frame(
///     Frame::new()
///         .with(String::from("unnamed"))
///         .with_named(String::from("named"), "greeting"),
/// );
///
/// assert_eq!(*scope.get_named::<String>("greeting").unwrap(), "named");
/// assert!(root.get::<String>().is_err());
/// ```
#[derive(Default)]
pub struct Frame {
    spaces: RwLock<HashMap<ComponentKey, Space>>,
}

impl Frame {
    /// Creates an empty frame.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an unnamed component (builder form of [`Components::add`]).
    #[must_use]
    pub fn with<T: Component>(self, value: T) -> Self {
        self.put_component(Arc::new(value), None);
        self
    }

    /// Adds a named component (builder form of [`Components::add_named`]).
    #[must_use]
    pub fn with_named<T: Component>(self, value: T, name: impl Into<Name>) -> Self {
        self.put_component(Arc::new(value), Some(name.into()));
        self
    }

    /// Number of distinct keys stored in this frame.
    #[must_use]
    pub fn len(&self) -> usize {
        self.spaces.read().len()
    }

    /// Returns `true` if nothing has been stored in this frame.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.spaces.read().is_empty()
    }

    fn put_component<T: Component>(&self, value: Arc<T>, name: Option<Name>) {
        let lineage = Lineage::<T>::of();
        let mut spaces = self.spaces.write();
        for (key, distance, slot) in lineage.slots(&value) {
            spaces
                .entry(ComponentKey::Type(key))
                .or_default()
                .put(name.clone(), Entry { slot, distance });
        }
    }

    fn put(&self, key: ComponentKey, name: Option<Name>, slot: Slot) {
        self.spaces
            .write()
            .entry(key)
            .or_default()
            .put(name, Entry { slot, distance: 0 });
    }

    fn lookup(&self, key: &ComponentKey, name: Option<&str>) -> Option<Slot> {
        self.spaces
            .read()
            .get(key)
            .and_then(|space| space.lookup(name))
            .cloned()
    }

    /// Copies every entry under `key` that `merged` does not hold yet.
    fn merge_into(&self, key: &ComponentKey, merged: &mut HashMap<Option<Name>, Slot>) {
        let spaces = self.spaces.read();
        let Some(space) = spaces.get(key) else {
            return;
        };
        if let Some(entry) = &space.unnamed {
            merged.entry(None).or_insert_with(|| Arc::clone(&entry.slot));
        }
        for (name, entry) in &space.named {
            merged
                .entry(Some(name.clone()))
                .or_insert_with(|| Arc::clone(&entry.slot));
        }
    }

    fn clear(&self) {
        self.spaces.write().clear();
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.spaces.read().keys()).finish()
    }
}

struct Node {
    frame: Frame,
    parent: Option<Arc<Node>>,
    depth: usize,
}

/// A scope: a stack of [`Frame`]s, innermost first.
///
/// `Components` is a cheap, clonable handle. Clones share the same innermost
/// frame, so values added through one clone are visible through the others.
/// [`push`](Self::push) returns a new handle with a fresh innermost frame on
/// top of this one and never touches the parent; values added to the child
/// stay invisible to the parent and to siblings.
///
/// Lookups search innermost first. Within each frame a named lookup tries
/// the name, then the unnamed entry, before moving out to the next frame.
///
/// # Example
///
/// ```
/// use trellis_system::component::Components;
///
/// let parent = Components::new();
/// parent.add(1_u32);
///
/// let child = parent.push();
/// child.add(String::from("child only"));
///
/// assert_eq!(*child.get::<u32>().unwrap(), 1);
/// assert!(parent.get::<String>().is_err());
///
/// let popped = child.pop().unwrap();
/// assert!(popped.get::<String>().is_err());
/// ```
#[derive(Clone)]
pub struct Components {
    node: Arc<Node>,
}

impl Default for Components {
    fn default() -> Self {
        Self::new()
    }
}

impl Components {
    /// Creates a root scope with one empty frame.
    #[must_use]
    pub fn new() -> Self {
        Self::from_frame(Frame::new())
    }

    /// Creates a root scope whose only frame is `frame`.
    #[must_use]
    pub fn from_frame(frame: Frame) -> Self {
        Self {
            node: Arc::new(Node {
                frame,
                parent: None,
                depth: 1,
            }),
        }
    }

    /// Returns a child scope with a fresh, empty innermost frame.
    #[must_use]
    pub fn push(&self) -> Self {
        self.push_frame(Frame::new())
    }

    /// Returns a child scope whose innermost frame is `frame`.
    #[must_use]
    pub fn push_frame(&self, frame: Frame) -> Self {
        Self {
            node: Arc::new(Node {
                frame,
                parent: Some(Arc::clone(&self.node)),
                depth: self.node.depth + 1,
            }),
        }
    }

    /// Returns the parent scope, discarding this scope's innermost frame.
    ///
    /// Returns `None` for a root scope.
    #[must_use]
    pub fn pop(&self) -> Option<Self> {
        self.node
            .parent
            .as_ref()
            .map(|node| Self { node: Arc::clone(node) })
    }

    /// Number of frames in this scope.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.node.depth
    }

    /// Returns `true` if both handles share the same innermost frame.
    #[must_use]
    pub fn same_frame(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }

    /// Adds an unnamed component to the innermost frame.
    ///
    /// The value is stored under its own type and each supertype its
    /// [`Lineage`] declares. Returns the shared handle to the stored value.
    pub fn add<T: Component>(&self, value: T) -> Arc<T> {
        self.add_shared(Arc::new(value), None)
    }

    /// Adds a named component to the innermost frame.
    pub fn add_named<T: Component>(&self, value: T, name: impl Into<Name>) -> Arc<T> {
        self.add_shared(Arc::new(value), Some(name.into()))
    }

    /// Adds an already shared component to the innermost frame.
    pub fn add_shared<T: Component>(&self, value: Arc<T>, name: Option<Name>) -> Arc<T> {
        self.node.frame.put_component(Arc::clone(&value), name);
        value
    }

    /// Stores `value` under an explicit key, without lineage expansion.
    ///
    /// This is the low-level form of [`add`](Self::add) for tag keys and
    /// trait-object values.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::InvalidRegistration`] if `value` is itself a
    /// type identifier, if a type key does not match `T`, or if a tag key is
    /// empty.
    pub fn insert<T>(
        &self,
        key: impl Into<ComponentKey>,
        name: Option<Name>,
        value: Arc<T>,
    ) -> Result<(), ComponentError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let key = key.into();
        reject_type_values::<T>()?;
        match &key {
            ComponentKey::Type(type_key) if type_key.type_id() != TypeId::of::<T>() => {
                return Err(ComponentError::invalid::<T>(format!(
                    "value cannot be stored under type key `{type_key}`"
                )));
            }
            ComponentKey::Tag(tag) if tag.is_empty() => {
                return Err(ComponentError::invalid::<T>("tag keys must not be empty"));
            }
            _ => {}
        }
        self.node.frame.put(key, name, into_slot(value));
        Ok(())
    }

    /// Looks up an unnamed `T`.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::NotFound`] if no frame holds a `T`.
    pub fn get<T>(&self) -> Result<Arc<T>, ComponentError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.lookup::<T>(None)
    }

    /// Looks up a `T` by name, falling back to the unnamed `T` frame by frame.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::NotFound`] if no frame holds a `T`.
    pub fn get_named<T>(&self, name: &str) -> Result<Arc<T>, ComponentError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.lookup::<T>(Some(name))
    }

    /// Looks up a `T` with an optional name.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::NotFound`] if no frame holds a `T`.
    pub fn lookup<T>(&self, name: Option<&str>) -> Result<Arc<T>, ComponentError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.lookup_key(&ComponentKey::of::<T>(), name)
    }

    /// Looks up a `T` stored under an explicit key.
    ///
    /// Frames holding a value of another type under `key` are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::NotFound`] if no frame holds a matching `T`.
    pub fn lookup_key<T>(
        &self,
        key: &ComponentKey,
        name: Option<&str>,
    ) -> Result<Arc<T>, ComponentError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.frames()
            .filter_map(|frame| frame.lookup(key, name))
            .find_map(|slot| from_slot::<T>(&slot))
            .ok_or_else(|| ComponentError::NotFound {
                key: key.clone(),
                name: name.map(|name| Name::Owned(name.to_owned())),
            })
    }

    /// Returns `true` if an unnamed or named `T` is reachable.
    #[must_use]
    pub fn contains<T>(&self) -> bool
    where
        T: ?Sized + Send + Sync + 'static,
    {
        !self.find::<T>().is_empty()
    }

    /// Merges every `T` across the whole scope into a `name -> value` map.
    ///
    /// Inner frames override outer ones.
    #[must_use]
    pub fn find<T>(&self) -> HashMap<Option<Name>, Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.find_key(&ComponentKey::of::<T>())
            .into_iter()
            .filter_map(|(name, slot)| from_slot::<T>(&slot).map(|value| (name, value)))
            .collect()
    }

    /// Merges every value stored under a tag, regardless of its type.
    #[must_use]
    pub fn find_tagged(&self, tag: &str) -> HashMap<Option<Name>, Arc<dyn Any + Send + Sync>> {
        self.find_key(&ComponentKey::tag(tag.to_owned()))
    }

    /// Clears the innermost frame.
    ///
    /// Breaks reference cycles between a scope and components that hold it.
    pub fn clear(&self) {
        self.node.frame.clear();
    }

    pub(crate) fn lookup_slot(&self, key: &ComponentKey, name: Option<&str>) -> Option<Slot> {
        self.frames().find_map(|frame| frame.lookup(key, name))
    }

    pub(crate) fn find_key(&self, key: &ComponentKey) -> HashMap<Option<Name>, Slot> {
        let mut merged = HashMap::new();
        for frame in self.frames() {
            frame.merge_into(key, &mut merged);
        }
        merged
    }

    fn frames(&self) -> impl Iterator<Item = &Frame> {
        core::iter::successors(Some(&*self.node), |node| node.parent.as_deref())
            .map(|node| &node.frame)
    }
}

impl fmt::Debug for Components {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Components")
            .field("depth", &self.depth())
            .field("frames", &self.frames().collect::<Vec<_>>())
            .finish()
    }
}

/// Type identifiers are never valid component values.
fn reject_type_values<T: ?Sized + 'static>() -> Result<(), ComponentError> {
    let id = TypeId::of::<T>();
    if id == TypeId::of::<TypeId>()
        || id == TypeId::of::<TypeKey>()
        || id == TypeId::of::<ComponentKey>()
    {
        return Err(ComponentError::invalid::<T>(
            "expected an instance, got a type identifier",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Shape: Send + Sync {
        fn sides(&self) -> u32;
    }

    trait Polygon: Shape {}

    #[derive(Debug, PartialEq)]
    struct Square(u32);

    impl Shape for Square {
        fn sides(&self) -> u32 {
            4
        }
    }
    impl Polygon for Square {}

    impl Component for Square {
        fn lineage(lineage: &mut Lineage<Self>) {
            lineage
                .implements::<dyn Polygon>(|this| this)
                .implements::<dyn Shape>(|this| this);
        }
    }

    struct Circle;

    impl Shape for Circle {
        fn sides(&self) -> u32 {
            0
        }
    }

    impl Component for Circle {
        fn lineage(lineage: &mut Lineage<Self>) {
            lineage.implements::<dyn Shape>(|this| this);
        }
    }

    // ─── Frames ───

    #[test]
    fn named_lookup_falls_back_to_unnamed_in_same_frame() {
        let components = Components::new();
        components.add(String::from("plain"));

        assert_eq!(*components.get_named::<String>("missing").unwrap(), "plain");
    }

    #[test]
    fn unnamed_in_inner_frame_beats_named_in_outer_frame() {
        let outer = Components::new();
        outer.add_named(String::from("outer named"), "x");
        let inner = outer.push();
        inner.add(String::from("inner plain"));

        assert_eq!(*inner.get_named::<String>("x").unwrap(), "inner plain");
    }

    #[test]
    fn more_derived_value_keeps_the_supertype_slot() {
        let components = Components::new();
        components.add(Circle);
        components.add(Square(1));
        assert_eq!(components.get::<dyn Shape>().unwrap().sides(), 4);

        // A less derived value does not displace the square.
        components.add(Circle);
        assert_eq!(components.get::<dyn Shape>().unwrap().sides(), 4);
    }

    // ─── Scopes ───

    #[test]
    fn push_does_not_mutate_parent() {
        let parent = Components::new();
        let child = parent.push();
        child.add(7_u8);

        assert!(parent.find::<u8>().is_empty());
        assert_eq!(child.find::<u8>().len(), 1);
        assert_eq!(child.depth(), 2);
        assert!(child.pop().unwrap().same_frame(&parent));
    }

    #[test]
    fn pop_of_root_is_none() {
        assert!(Components::new().pop().is_none());
    }

    #[test]
    fn find_merges_frames_inner_first() {
        let outer = Components::new();
        outer.add(String::from("a"));
        outer.add_named(String::from("b"), "b");
        let inner = outer.push();
        inner.add_named(String::from("c"), "b");

        let found = inner.find::<String>();
        assert_eq!(found.len(), 2);
        assert_eq!(*found[&None], "a");
        assert_eq!(*found[&Some(Name::from("b"))], "c");
    }

    // ─── Errors ───

    #[test]
    fn missing_component_reports_key_and_name() {
        let err = Components::new().get_named::<u64>("count").unwrap_err();
        match err {
            ComponentError::NotFound { key, name } => {
                assert_eq!(key, ComponentKey::of::<u64>());
                assert_eq!(name.as_deref(), Some("count"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn type_identifiers_are_rejected() {
        let components = Components::new();
        let err = components
            .insert(ComponentKey::tag("ty"), None, Arc::new(TypeKey::of::<u8>()))
            .unwrap_err();
        assert!(matches!(err, ComponentError::InvalidRegistration { .. }));
    }

    #[test]
    fn mismatched_type_key_is_rejected() {
        let components = Components::new();
        let result = components.insert(ComponentKey::of::<u8>(), None, Arc::new(1_u16));
        assert!(matches!(
            result,
            Err(ComponentError::InvalidRegistration { .. })
        ));
    }

    #[test]
    fn tagged_values_are_found_by_tag() {
        let components = Components::new();
        components
            .insert("bar", None, Arc::new(String::from("foo")))
            .unwrap();

        let value: Arc<String> = components
            .lookup_key(&ComponentKey::tag("bar"), None)
            .unwrap();
        assert_eq!(*value, "foo");
        assert_eq!(components.find_tagged("bar").len(), 1);
        assert!(components.insert("", None, Arc::new(1_u8)).is_err());
    }

    #[test]
    fn trait_objects_can_be_inserted_directly() {
        let components = Components::new();
        let shape: Arc<dyn Shape> = Arc::new(Circle);
        components
            .insert(ComponentKey::of::<dyn Shape>(), None, shape)
            .unwrap();

        assert_eq!(components.get::<dyn Shape>().unwrap().sides(), 0);
        assert!(components.get::<Circle>().is_err());
    }
}
