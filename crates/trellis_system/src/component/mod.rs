//! The scoped component registry.
//!
//! A [`Components`] scope is a stack of [`Frame`]s. Each frame maps a
//! `(key, name)` pair to a shared value, where the key is usually the
//! value's type ([`TypeKey`]) and the name optionally distinguishes several
//! values of the same type.
//!
//! # Scoping
//!
//! Scopes model nested lifetimes. Entering a nested unit of work (a plugin
//! loading phase, a spawned task) pushes a child scope; the child sees every
//! value of its ancestors but writes only to its own innermost frame. When
//! the unit completes the child is simply dropped (or [`pop`](Components::pop)ped).
//!
//! # Supertypes
//!
//! A value is stored under its own type and under every supertype its
//! [`Lineage`] declares, at the time it is added. Lookups by supertype are
//! therefore plain map lookups.

mod key;
mod lineage;
mod registry;

pub use key::{ComponentKey, Name, TypeKey};
pub use lineage::{Component, Lineage};
pub use registry::{ComponentError, Components, Frame};

pub(crate) use lineage::{Bound, Slot, from_slot, into_slot};

