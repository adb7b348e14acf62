//! Errors raised while loading plugins and staging a run.

use trellis_system::BoxError;
use trellis_system::resolve::ResolveError;

use crate::stage::StageState;

/// Errors raised while loading a plugin.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// The plugin reference is malformed.
    #[error("invalid plugin name `{name}`: {reason}")]
    InvalidName {
        /// The reference as given.
        name: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// No plugin is registered under the path.
    #[error("no plugin registered at `{path}`")]
    NotFound {
        /// The absolute `module:function` path.
        path: String,
    },

    /// The plugin's parameters could not be resolved.
    #[error("cannot resolve the parameters of plugin `{plugin}`")]
    Resolve {
        /// The plugin name.
        plugin: String,
        /// The resolver's error.
        #[source]
        source: ResolveError,
    },

    /// The plugin body failed.
    #[error("plugin `{plugin}` failed")]
    Failed {
        /// The plugin name.
        plugin: String,
        /// The error it returned.
        #[source]
        source: BoxError,
    },

    /// The plugin body panicked.
    #[error("plugin `{plugin}` panicked: {message}")]
    Panicked {
        /// The plugin name.
        plugin: String,
        /// The panic payload, as text.
        message: String,
    },
}

impl PluginError {
    pub(crate) fn invalid(name: &str, reason: &'static str) -> Self {
        Self::InvalidName {
            name: name.to_owned(),
            reason,
        }
    }
}

/// Errors raised by [`Staging`](crate::stage::Staging).
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// Loading a plugin failed; the run was aborted.
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// The requested phase is not reachable from the current one.
    #[error("cannot {action} while {from}")]
    InvalidState {
        /// The state the engine was in.
        from: StageState,
        /// What was attempted.
        action: &'static str,
    },

    /// The blocking entry point could not start a runtime.
    #[error("failed to start the async runtime")]
    Runtime(#[source] std::io::Error),
}
