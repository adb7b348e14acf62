//! The loader: runs plugin bodies and collects their work.

use core::fmt;
use core::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use indexmap::IndexMap;
use parking_lot::Mutex;
use trellis_system::adapter::Adapters;
use trellis_system::component::{Component, Components};
use trellis_system::inject::InjectContext;
use trellis_system::BoxFuture;

use crate::catalog::{PluginCatalog, PluginRef};
use crate::error::PluginError;
use crate::plugin::{Plugin, PluginId};
use crate::work::{Work, panic_message};

struct Loaded {
    name: String,
    works: Vec<Work>,
}

/// Loads plugins into the shared loading scope.
///
/// The loader keeps the loaded-plugin set: every plugin that has started
/// loading, in load order, with the work it produced. A plugin already in
/// the set is skipped, so plugins that include each other (directly or
/// through a cycle) run exactly once.
///
/// Plugins that include each other must do so through catalog paths: two
/// async fns naming each other with [`PluginRef::of`] have recursive
/// opaque types and do not compile.
///
/// Plugins can request `Arc<Loader>` to include further plugins:
///
/// ```
/// use std::sync::Arc;
/// use trellis_staging::prelude::*;
///
/// async fn database() {}
///
/// async fn plugin(loader: Arc<Loader>) -> Result<(), PluginError> {
///     loader.include(PluginRef::of(database)).await
/// }
/// ```
pub struct Loader {
    scope: Components,
    adapters: Arc<Adapters>,
    catalog: Arc<PluginCatalog>,
    loaded: Mutex<IndexMap<PluginId, Loaded>>,
}

impl Component for Loader {}

impl Loader {
    /// Creates a loader resolving plugin parameters against `scope`.
    #[must_use]
    pub fn new(scope: Components, adapters: Arc<Adapters>, catalog: Arc<PluginCatalog>) -> Self {
        Self {
            scope,
            adapters,
            catalog,
            loaded: Mutex::new(IndexMap::new()),
        }
    }

    /// The shared loading scope.
    #[must_use]
    pub fn scope(&self) -> &Components {
        &self.scope
    }

    /// The plugin catalog used for path references.
    #[must_use]
    pub fn catalog(&self) -> &Arc<PluginCatalog> {
        &self.catalog
    }

    /// Loads a plugin unless it is already loaded, together with everything
    /// it includes.
    ///
    /// # Errors
    ///
    /// Returns a [`PluginError`] if the reference cannot be resolved, the
    /// plugin's parameters are unavailable, or the plugin body fails or
    /// panics.
    pub fn include(&self, plugin: impl Into<PluginRef>) -> BoxFuture<'_, Result<(), PluginError>> {
        let plugin = plugin.into();
        Box::pin(async move {
            let plugin = self.catalog.resolve(&plugin)?;
            self.include_plugin(plugin).await
        })
    }

    async fn include_plugin(&self, plugin: Arc<dyn Plugin>) -> Result<(), PluginError> {
        let id = plugin.id();
        {
            let mut loaded = self.loaded.lock();
            if loaded.contains_key(&id) {
                tracing::trace!(plugin = plugin.name(), "plugin already loaded");
                return Ok(());
            }
            // Marked before the body runs so that re-entrant includes stop here.
            loaded.insert(
                id,
                Loaded {
                    name: plugin.name().to_owned(),
                    works: Vec::new(),
                },
            );
        }

        tracing::debug!(plugin = plugin.name(), "loading plugin");
        let cx = InjectContext::new(&self.adapters, &self.scope);
        let works = match AssertUnwindSafe(plugin.load(&cx)).catch_unwind().await {
            Ok(works) => works?,
            Err(payload) => {
                let message = panic_message(&*payload);
                tracing::error!(plugin = plugin.name(), %message, "plugin panicked");
                return Err(PluginError::Panicked {
                    plugin: plugin.name().to_owned(),
                    message,
                });
            }
        };
        tracing::debug!(plugin = plugin.name(), works = works.len(), "plugin loaded");

        if let Some(entry) = self.loaded.lock().get_mut(&id) {
            entry.works.extend(works);
        }
        Ok(())
    }

    /// Returns `true` if the plugin with `id` has started loading.
    #[must_use]
    pub fn is_loaded(&self, id: PluginId) -> bool {
        self.loaded.lock().contains_key(&id)
    }

    /// Names of the loaded plugins, in load order.
    #[must_use]
    pub fn loaded(&self) -> Vec<String> {
        self.loaded
            .lock()
            .values()
            .map(|entry| entry.name.clone())
            .collect()
    }

    /// Number of collected, not yet scheduled, work items.
    #[must_use]
    pub fn pending_work(&self) -> usize {
        self.loaded
            .lock()
            .values()
            .map(|entry| entry.works.len())
            .sum()
    }

    /// Takes every collected work item, in load order.
    pub(crate) fn take_work(&self) -> Vec<Work> {
        self.loaded
            .lock()
            .values_mut()
            .flat_map(|entry| entry.works.drain(..))
            .collect()
    }

    /// Drops every collected work item without running it.
    pub(crate) fn discard_work(&self) -> usize {
        self.take_work().len()
    }
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("loaded", &self.loaded())
            .field("pending_work", &self.pending_work())
            .finish_non_exhaustive()
    }
}
