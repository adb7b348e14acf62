//! Keys and names under which components are stored.

use core::any::{TypeId, type_name};
use core::fmt;
use core::hash::{Hash, Hasher};
use std::borrow::Cow;

/// Distinguishes several values registered under the same key.
pub type Name = Cow<'static, str>;

/// Identifies a Rust type by its [`TypeId`].
///
/// The type name is carried along for diagnostics only; equality and hashing
/// consider the `TypeId` alone.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    /// Creates the key for `T`. `T` may be unsized, e.g. `dyn Service`.
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    /// Returns the underlying `TypeId`.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.id
    }

    /// Returns the type name, for diagnostics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypeKey").field(&self.name).finish()
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// The key half of a `(key, name)` registry slot.
///
/// Most components are keyed by their type. A [`Tag`](ComponentKey::Tag) key
/// stores a value under an arbitrary string discriminator instead, which is
/// useful for values that share a Rust type but play different roles.
///
/// # Example
///
/// ```
/// use trellis_system::component::{ComponentKey, TypeKey};
///
/// let by_type = ComponentKey::of::<String>();
/// assert_eq!(by_type, ComponentKey::Type(TypeKey::of::<String>()));
///
/// let by_tag = ComponentKey::tag("greeting");
/// assert_ne!(by_type, by_tag);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ComponentKey {
    /// Keyed by the stored value's type (or one of its declared supertypes).
    Type(TypeKey),
    /// Keyed by an arbitrary discriminator.
    Tag(Cow<'static, str>),
}

impl ComponentKey {
    /// Creates a type key for `T`.
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::Type(TypeKey::of::<T>())
    }

    /// Creates a tag key.
    #[must_use]
    pub fn tag(tag: impl Into<Cow<'static, str>>) -> Self {
        Self::Tag(tag.into())
    }

    /// Returns the type key, if this is one.
    #[must_use]
    pub fn as_type(&self) -> Option<TypeKey> {
        match self {
            Self::Type(key) => Some(*key),
            Self::Tag(_) => None,
        }
    }
}

impl From<TypeKey> for ComponentKey {
    fn from(key: TypeKey) -> Self {
        Self::Type(key)
    }
}

impl From<&'static str> for ComponentKey {
    fn from(tag: &'static str) -> Self {
        Self::Tag(Cow::Borrowed(tag))
    }
}

impl From<String> for ComponentKey {
    fn from(tag: String) -> Self {
        Self::Tag(Cow::Owned(tag))
    }
}

impl fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Type(key) => fmt::Display::fmt(key, f),
            Self::Tag(tag) => write!(f, "#{tag}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashbrown::HashSet;

    trait Marker {}

    #[test]
    fn type_keys_compare_by_type_id() {
        assert_eq!(TypeKey::of::<u32>(), TypeKey::of::<u32>());
        assert_ne!(TypeKey::of::<u32>(), TypeKey::of::<u64>());
        assert_ne!(TypeKey::of::<dyn Marker>(), TypeKey::of::<u32>());
    }

    #[test]
    fn keys_hash_consistently() {
        let mut set = HashSet::new();
        set.insert(ComponentKey::of::<String>());
        set.insert(ComponentKey::of::<String>());
        set.insert(ComponentKey::tag("name"));
        set.insert(ComponentKey::from("name"));
        set.insert(ComponentKey::from(String::from("name")));

        assert_eq!(set.len(), 2);
    }

    #[test]
    fn display_distinguishes_tags() {
        assert_eq!(ComponentKey::tag("bar").to_string(), "#bar");
        assert_eq!(ComponentKey::of::<u8>().to_string(), "u8");
        assert_eq!(ComponentKey::tag("bar").as_type(), None);
    }
}
