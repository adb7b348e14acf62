//! Plugin loading and lifecycle staging for Trellis (Layer 2).
//!
//! An application is a set of plugins. Each plugin receives its parameters
//! from the shared loading scope, registers components and factories,
//! queues teardown actions, includes further plugins, and may hand back
//! long-running work. Staging loads everything, runs the work concurrently
//! until it completes or is cancelled, then tears down in reverse.
//!
//! - [`plugin`] - The plugin abstraction and plugin functions
//! - [`catalog`] - Plugins addressed by dotted path
//! - [`loader`] - Loading plugins exactly once
//! - [`work`] - Work items and their results
//! - [`stage`] - The load/run/teardown engine
//! - [`teardown`] - Reverse-order cleanup
//! - [`cancel`] - Cooperative cancellation
//! - [`spawn`] - Spawning with an inherited scope
//!
//! # Feature Flags
//!
//! - `test-utils` - Enables the [`testing`] fixture
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use trellis_staging::prelude::*;
//!
//! #[derive(Component)]
//! struct Greeting(String);
//!
//! async fn greeting(scope: Components, teardown: Arc<Teardown>) {
//!     scope.add(Greeting(String::from("hello")));
//!     teardown.add("farewell", async {});
//! }
//!
//! async fn greeter(loader: Arc<Loader>) -> Result<Work, PluginError> {
//!     loader.include(PluginRef::of(greeting)).await?;
//!     Ok(Work::new("greet", |scope: Components| async move {
//!         let greeting = scope.get::<Greeting>()?;
//!         Ok::<_, BoxError>(greeting.0.len())
//!     }))
//! }
//!
//! let report = Staging::builder()
//!     .catalog(Arc::new(PluginCatalog::new()))
//!     .build()
//!     .run_blocking([PluginRef::of(greeter)])
//!     .unwrap();
//!
//! assert_eq!(report.get("greet").unwrap().value::<usize>(), Some(&5));
//! ```
//!
//! # Architecture
//!
//! - **Layer 1** (`trellis_system`): registry and resolver
//! - **Layer 2** (`trellis_staging`): plugin loading and staging (this crate)
//! - **Layer 3** (`trellis_core_plugins`): logging, configuration, background jobs

/// Cooperative cancellation.
pub mod cancel;

/// Plugins addressed by dotted path.
pub mod catalog;

/// Staging errors.
pub mod error;

/// Loading plugins exactly once.
pub mod loader;

/// Termination signal handling.
pub mod os_signals;

/// The plugin abstraction.
pub mod plugin;

/// Spawning with an inherited scope.
pub mod spawn;

/// The load/run/teardown engine.
pub mod stage;

/// Reverse-order cleanup.
pub mod teardown;

/// Work items and their results.
pub mod work;

/// Test fixtures.
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

#[doc(hidden)]
pub use inventory;

pub use stage::run;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use crate::cancel::{Cancel, CancelReason};
    pub use crate::catalog::{PluginCatalog, PluginRef};
    pub use crate::error::{PluginError, StageError};
    pub use crate::loader::Loader;
    pub use crate::plugin::{IntoPlugin, Plugin, PluginId, PluginOutput};
    pub use crate::spawn::Spawner;
    pub use crate::stage::{StageReport, StageState, Staging, StagingConfig};
    pub use crate::submit_plugin;
    pub use crate::teardown::Teardown;
    pub use crate::work::{TaskFailure, Work, WorkResult};
    pub use trellis_system::prelude::*;
}
