//! Plugin-based application bootstrapping for Rust.
//!
//! Trellis assembles an application from plugins. Components live in a
//! stack of scopes, factories build missing ones on demand from their
//! parameter types, and a staging engine loads the plugins, runs their work
//! concurrently and tears everything down in reverse.
//!
//! ```
//! use std::sync::Arc;
//! use trellis::prelude::*;
//!
//! async fn hello(teardown: Arc<Teardown>) -> Work {
//!     teardown.add("goodbye", async {});
//!     Work::from_future("hello", async { Ok::<_, BoxError>("world") })
//! }
//!
//! let report = trellis::trellis_staging::run([PluginRef::of(hello)]).unwrap();
//! assert!(report.is_success());
//! ```

pub use trellis_internal::*;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use trellis_internal::prelude::*;
}
