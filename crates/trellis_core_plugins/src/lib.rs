//! Core infrastructure plugins for Trellis (Layer 3).
//!
//! This crate provides plugins most Trellis applications need:
//!
//! - [`TracingPlugin`] - Logging and observability via the `tracing` crate
//! - [`ConfigPlugin`] - Layered configuration with environment overrides
//! - [`jobs`] - Fire-and-forget background jobs
//! - [`default_plugins`] - Convenient bundle of tracing and jobs
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use trellis_core_plugins::default_plugins;
//! use trellis_staging::prelude::*;
//!
//! let report = Staging::builder()
//!     .catalog(Arc::new(PluginCatalog::new()))
//!     .build()
//!     .run_blocking(default_plugins())
//!     .unwrap();
//! assert!(report.is_success());
//! ```
//!
//! # Architecture
//!
//! - **Layer 1** (`trellis_system`): registry and resolver
//! - **Layer 2** (`trellis_staging`): plugin loading and staging
//! - **Layer 3** (`trellis_core_plugins`): infrastructure plugins (this crate)

mod config;
mod jobs;
mod tracing_plugin;

pub use config::{ConfigError, ConfigPlugin, ConfigSection, ConfigSource, FromConfig};
pub use jobs::{JobOutcome, Jobs, jobs};
pub use tracing_plugin::{TracingConfig, TracingFormat, TracingPlugin};

use trellis_staging::catalog::PluginRef;

/// Default plugins for most Trellis applications.
///
/// Includes:
/// - [`TracingPlugin`] with default settings
/// - [`jobs`]
#[must_use]
pub fn default_plugins() -> Vec<PluginRef> {
    vec![PluginRef::of(TracingPlugin::default()), PluginRef::of(jobs)]
}

/// Minimal plugins for headless or testing scenarios.
///
/// Includes only [`jobs`]; no subscriber is installed, which suits unit
/// tests that don't need logging output.
#[must_use]
pub fn minimal_plugins() -> Vec<PluginRef> {
    vec![PluginRef::of(jobs)]
}
