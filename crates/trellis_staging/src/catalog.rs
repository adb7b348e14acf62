//! Plugins addressed by dotted path.
//!
//! A plugin path has the form `module.path:function`. The function part is
//! optional and defaults to `plugin`, so `app.db` and `app.db:plugin` name
//! the same entry point. Paths starting with dots are relative to an
//! explicit base module: with base `app.web`, `.routes` means
//! `app.web.routes:plugin` and `..db:connect` means `app.db:connect`.
//!
//! Plugins are registered on a [`PluginCatalog`] explicitly, or from
//! anywhere in the program with [`submit_plugin!`](crate::submit_plugin),
//! which [`PluginCatalog::discover`] collects at startup.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::error::PluginError;
use crate::plugin::{IntoPlugin, Plugin};

/// Function name used when a path omits one.
pub const DEFAULT_FUNCTION: &str = "plugin";

/// A link-time plugin registration, created by
/// [`submit_plugin!`](crate::submit_plugin).
pub struct PluginRegistration {
    /// The plugin path.
    pub path: &'static str,
    /// Builds the plugin.
    pub build: fn() -> Arc<dyn Plugin>,
}

inventory::collect!(PluginRegistration);

/// Registers a plugin function under a path for [`PluginCatalog::discover`].
///
/// ```
/// use trellis_staging::submit_plugin;
///
/// async fn plugin() {}
///
/// submit_plugin!("app.hello", plugin);
///
/// fn main() {
///     let catalog = trellis_staging::catalog::PluginCatalog::discover();
///     assert!(catalog.contains("app.hello:plugin"));
/// }
/// ```
#[macro_export]
macro_rules! submit_plugin {
    ($path:expr, $plugin:expr) => {
        $crate::inventory::submit! {
            $crate::catalog::PluginRegistration {
                path: $path,
                build: || $crate::plugin::IntoPlugin::into_plugin($plugin),
            }
        }
    };
}

/// A reference to a plugin: the plugin itself, or a path to look up.
#[derive(Debug, Clone)]
pub enum PluginRef {
    /// A plugin value.
    Direct(Arc<dyn Plugin>),
    /// A path, possibly relative to `base`.
    Named {
        /// The path as written.
        path: String,
        /// The module relative paths are resolved against.
        base: Option<String>,
    },
}

impl PluginRef {
    /// References a plugin value.
    #[must_use]
    pub fn of<M>(plugin: impl IntoPlugin<M>) -> Self {
        Self::Direct(plugin.into_plugin())
    }

    /// References a path relative to the module `base`.
    #[must_use]
    pub fn relative(path: impl Into<String>, base: impl Into<String>) -> Self {
        Self::Named {
            path: path.into(),
            base: Some(base.into()),
        }
    }
}

impl From<Arc<dyn Plugin>> for PluginRef {
    fn from(plugin: Arc<dyn Plugin>) -> Self {
        Self::Direct(plugin)
    }
}

impl From<&str> for PluginRef {
    fn from(path: &str) -> Self {
        Self::Named {
            path: path.to_owned(),
            base: None,
        }
    }
}

impl From<String> for PluginRef {
    fn from(path: String) -> Self {
        Self::Named { path, base: None }
    }
}

/// Turns `path` into its absolute `module:function` form.
///
/// # Errors
///
/// Returns [`PluginError::InvalidName`] for an empty module, more than one
/// `:`, an empty function name, or a relative path that climbs above its
/// base (or has no base).
pub fn absolute_path(path: &str, base: Option<&str>) -> Result<String, PluginError> {
    let (module, function) = match path.split_once(':') {
        Some((_, function)) if function.contains(':') => {
            return Err(PluginError::invalid(path, "more than one `:`"));
        }
        Some((_, "")) => return Err(PluginError::invalid(path, "empty function name")),
        Some((module, function)) => (module, function),
        None => (path, DEFAULT_FUNCTION),
    };

    let module = if let Some(relative) = module.strip_prefix('.') {
        let base = base.ok_or_else(|| PluginError::invalid(path, "relative path without a base"))?;
        let climb = relative.len() - relative.trim_start_matches('.').len();
        let rest = &relative[climb..];
        let mut parts: Vec<&str> = base.split('.').filter(|part| !part.is_empty()).collect();
        if climb >= parts.len() {
            return Err(PluginError::invalid(path, "relative path climbs above its base"));
        }
        parts.truncate(parts.len() - climb);
        if !rest.is_empty() {
            parts.push(rest);
        }
        parts.join(".")
    } else {
        module.to_owned()
    };

    if module.is_empty() || module.split('.').any(str::is_empty) {
        return Err(PluginError::invalid(path, "empty module name"));
    }
    Ok(format!("{module}:{function}"))
}

/// Plugins addressable by path.
#[derive(Default)]
pub struct PluginCatalog {
    entries: RwLock<HashMap<String, Arc<dyn Plugin>>>,
}

impl PluginCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog holding every plugin submitted with
    /// [`submit_plugin!`](crate::submit_plugin).
    ///
    /// Submissions with an invalid path are skipped with a warning.
    #[must_use]
    pub fn discover() -> Self {
        let catalog = Self::new();
        for registration in inventory::iter::<PluginRegistration> {
            if let Err(error) = catalog.insert(registration.path, (registration.build)()) {
                tracing::warn!(path = registration.path, %error, "skipping plugin submission");
            }
        }
        catalog
    }

    /// Registers `plugin` under `path`, replacing any previous entry.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidName`] if `path` is not an absolute
    /// plugin path.
    pub fn register<M>(&self, path: &str, plugin: impl IntoPlugin<M>) -> Result<(), PluginError> {
        self.insert(path, plugin.into_plugin())
    }

    fn insert(&self, path: &str, plugin: Arc<dyn Plugin>) -> Result<(), PluginError> {
        let path = absolute_path(path, None)?;
        tracing::trace!(%path, "plugin registered");
        self.entries.write().insert(path, plugin);
        Ok(())
    }

    /// Returns `true` if a plugin is registered under `path`.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        absolute_path(path, None).is_ok_and(|path| self.entries.read().contains_key(&path))
    }

    /// Registered paths, sorted.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.entries.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Resolves a reference to its plugin.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidName`] for malformed paths and
    /// [`PluginError::NotFound`] for unregistered ones.
    pub fn resolve(&self, plugin: &PluginRef) -> Result<Arc<dyn Plugin>, PluginError> {
        match plugin {
            PluginRef::Direct(plugin) => Ok(Arc::clone(plugin)),
            PluginRef::Named { path, base } => {
                let path = absolute_path(path, base.as_deref())?;
                self.entries
                    .read()
                    .get(&path)
                    .cloned()
                    .ok_or(PluginError::NotFound { path })
            }
        }
    }
}

impl core::fmt::Debug for PluginCatalog {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PluginCatalog")
            .field("paths", &self.paths())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn plugin() {}

    // ─── Paths ───

    #[test]
    fn function_defaults_to_plugin() {
        assert_eq!(absolute_path("app.db", None).unwrap(), "app.db:plugin");
        assert_eq!(absolute_path("app.db:connect", None).unwrap(), "app.db:connect");
    }

    #[test]
    fn relative_paths_resolve_against_base() {
        let base = Some("app.web");
        assert_eq!(absolute_path(".routes", base).unwrap(), "app.web.routes:plugin");
        assert_eq!(absolute_path("..db:connect", base).unwrap(), "app.db:connect");
        assert_eq!(absolute_path(".", base).unwrap(), "app.web:plugin");
    }

    #[test]
    fn malformed_paths_are_rejected() {
        for (path, base) in [
            ("a:b:c", None),
            ("app:", None),
            (":fn", None),
            ("app..db", None),
            (".rel", None),
            ("...x", Some("app.web")),
        ] {
            assert!(
                matches!(absolute_path(path, base), Err(PluginError::InvalidName { .. })),
                "{path} should be invalid"
            );
        }
    }

    // ─── Catalog ───

    #[test]
    fn registered_plugins_resolve_by_any_spelling() {
        let catalog = PluginCatalog::new();
        catalog.register("app.hello", plugin).unwrap();

        let by_short = catalog.resolve(&"app.hello".into()).unwrap();
        let by_full = catalog.resolve(&"app.hello:plugin".into()).unwrap();
        let by_relative = catalog
            .resolve(&PluginRef::relative(".hello", "app.other"))
            .unwrap_err();

        assert_eq!(by_short.id(), by_full.id());
        assert!(matches!(by_relative, PluginError::NotFound { .. }));
        assert_eq!(catalog.paths(), vec![String::from("app.hello:plugin")]);
    }

    #[test]
    fn unknown_paths_are_not_found() {
        let catalog = PluginCatalog::new();
        let err = catalog.resolve(&"missing".into()).unwrap_err();
        assert!(matches!(err, PluginError::NotFound { path } if path == "missing:plugin"));
    }

    submit_plugin!("catalog.tests:submitted", plugin);

    #[test]
    fn submissions_are_discovered() {
        let catalog = PluginCatalog::discover();
        assert!(catalog.contains("catalog.tests:submitted"));
    }
}
