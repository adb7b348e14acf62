//! Helpers for testing plugins.
//!
//! [`StageFixture`] wraps a [`Staging`] engine built on an isolated factory
//! index and an empty catalog, so tests neither see nor disturb the
//! process-wide registrations.
//!
//! ```
//! use std::sync::Arc;
//! use trellis_staging::prelude::*;
//! use trellis_staging::testing::StageFixture;
//!
//! async fn plugin(teardown: Arc<Teardown>) {
//!     teardown.add("close", async {});
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let mut fixture = StageFixture::new();
//! fixture.load(plugin).await.unwrap();
//! assert_eq!(fixture.teardown().len(), 1);
//! assert_eq!(fixture.finish().await.unwrap(), 0);
//! # }
//! ```

use std::sync::Arc;

use trellis_system::adapter::Adapters;
use trellis_system::component::{Component, Components};
use trellis_system::resolve::ResolveError;

use crate::catalog::{PluginCatalog, PluginRef};
use crate::error::StageError;
use crate::plugin::IntoPlugin;
use crate::stage::{StageReport, Staging, StagingConfig};
use crate::teardown::Teardown;

/// A staging engine for tests.
#[derive(Debug)]
pub struct StageFixture {
    staging: Staging,
}

impl Default for StageFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl StageFixture {
    /// Creates a fixture with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(StagingConfig::default())
    }

    /// Creates a fixture with `config`.
    #[must_use]
    pub fn with_config(config: StagingConfig) -> Self {
        Self::with_parts(config, Arc::new(Adapters::new()), Arc::new(PluginCatalog::new()))
    }

    /// Creates a fixture around the given factory index and catalog.
    #[must_use]
    pub fn with_parts(
        config: StagingConfig,
        adapters: Arc<Adapters>,
        catalog: Arc<PluginCatalog>,
    ) -> Self {
        let staging = Staging::builder()
            .config(config)
            .adapters(adapters)
            .catalog(catalog)
            .build();
        Self { staging }
    }

    /// The loading scope.
    #[must_use]
    pub fn scope(&self) -> &Components {
        self.staging.scope()
    }

    /// The fixture's factory index.
    #[must_use]
    pub fn adapters(&self) -> &Arc<Adapters> {
        self.staging.adapters()
    }

    /// The fixture's catalog.
    #[must_use]
    pub fn catalog(&self) -> &Arc<PluginCatalog> {
        self.staging.loader().catalog()
    }

    /// The teardown list.
    #[must_use]
    pub fn teardown(&self) -> &Arc<Teardown> {
        self.staging.teardown()
    }

    /// The wrapped engine.
    pub fn staging(&mut self) -> &mut Staging {
        &mut self.staging
    }

    /// Loads a single plugin.
    ///
    /// # Errors
    ///
    /// Returns the loading failure.
    pub async fn load<M>(&mut self, plugin: impl IntoPlugin<M>) -> Result<(), StageError> {
        self.staging.load([PluginRef::of(plugin)]).await
    }

    /// Resolves `T` in the loading scope.
    ///
    /// # Errors
    ///
    /// Returns the resolution failure.
    pub async fn resolve<T: Component>(&self) -> Result<Arc<T>, ResolveError> {
        self.adapters().resolve::<T>(self.scope()).await
    }

    /// Runs the collected work.
    ///
    /// # Errors
    ///
    /// See [`Staging::run`].
    pub async fn run(&mut self) -> Result<StageReport, StageError> {
        self.staging.run().await
    }

    /// Runs teardown and returns the number of failed actions.
    ///
    /// # Errors
    ///
    /// See [`Staging::run_teardown`].
    pub async fn finish(mut self) -> Result<usize, StageError> {
        self.staging.run_teardown().await
    }
}
