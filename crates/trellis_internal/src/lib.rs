//! # Trellis Internal Library
//!
//! Re-exports the core Trellis crates for convenience.

/// Layer 1: Scoped component registry and dependency resolver.
pub use trellis_system;

/// Layer 2: Plugin loading and lifecycle staging.
pub use trellis_staging;

/// Layer 3: Core infrastructure plugins.
pub use trellis_core_plugins;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use trellis_core_plugins::{
        ConfigPlugin, ConfigSection, ConfigSource, FromConfig, Jobs, TracingPlugin, jobs,
    };
    pub use trellis_staging::prelude::*;
}
