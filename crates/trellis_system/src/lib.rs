//! The foundational registry and resolver for Trellis (Layer 1).
//!
//! `trellis_system` provides the primitives every Trellis application is
//! assembled from:
//!
//! - [`component`] - Scoped component registry
//! - [`adapter`] - Factory registration and the factory index
//! - [`inject`] - Injectable parameter types
//! - [`resolve`] - Type-directed dependency resolution
//!
//! # Architecture
//!
//! This crate is Layer 1 of the Trellis architecture:
//!
//! - **Layer 1** (`trellis_system`): registry and resolver (this crate)
//! - **Layer 2** (`trellis_staging`): plugin loading and lifecycle staging
//! - **Layer 3** (`trellis_core_plugins`): logging, configuration, background jobs
//!
//! # Example
//!
//! ```
//! use std::convert::Infallible;
//! use std::sync::Arc;
//! use trellis_system::prelude::*;
//!
//! #[derive(Component)]
//! struct Pool {
//!     size: u32,
//! }
//!
//! #[derive(Component, Injectable)]
//! struct Repository {
//!     pool: Arc<Pool>,
//! }
//!
//! async fn pool() -> Result<Pool, Infallible> {
//!     Ok(Pool { size: 8 })
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let adapters = Adapters::new();
//! adapters.register(pool).unwrap();
//! adapters.register_injectable::<Repository>().unwrap();
//!
//! let scope = Components::new();
//! let repository = adapters.resolve::<Repository>(&scope).await.unwrap();
//!
//! assert_eq!(repository.pool.size, 8);
//! // Both values are now memoized in the scope.
//! assert!(scope.get::<Pool>().is_ok());
//! # }
//! ```

// Self-reference so derive output can use `trellis_system::` paths inside
// this crate's own tests.
extern crate self as trellis_system;

use core::future::Future;
use core::pin::Pin;

/// Factory registration and the factory index.
pub mod adapter;

/// Scoped component registry.
pub mod component;

/// Injectable parameter types.
pub mod inject;

/// Type-directed dependency resolution.
pub mod resolve;

/// Re-export the derive macros.
pub use trellis_system_macros::{Component, Injectable};

/// A boxed future that is `Send`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An opaque error produced by user code.
pub type BoxError = Box<dyn core::error::Error + Send + Sync>;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use crate::adapter::{Adapters, Binder, Injectable, IntoAdapter};
    pub use crate::component::{
        Component, ComponentError, ComponentKey, Components, Frame, Lineage, Name, TypeKey,
    };
    pub use crate::inject::{All, Inject, InjectContext, InjectSet, OrDefault};
    pub use crate::resolve::{Injector, ResolveError};
    pub use crate::{BoxError, BoxFuture};
    pub use trellis_system_macros::{Component, Injectable};
}
