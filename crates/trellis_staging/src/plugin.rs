//! Plugin entry points.
//!
//! A plugin is setup code run once while a stage is loading. It can register
//! components, queue teardown actions, include other plugins, and hand back
//! units of background [`Work`] for the running phase.
//!
//! Any async function whose parameters implement [`Inject`] is a plugin.
//! Its parameters are resolved against the shared loading scope, which holds
//! the [`Loader`](crate::loader::Loader), the
//! [`Teardown`](crate::teardown::Teardown) list, the
//! [`Cancel`](crate::cancel::Cancel) signal, and whatever earlier plugins
//! registered.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use trellis_staging::prelude::*;
//!
//! async fn plugin(teardown: Arc<Teardown>, scope: Components) -> Work {
//!     scope.add(String::from("ready"));
//!     teardown.add("say goodbye", async {});
//!     Work::from_future("greeter", async { tracing::info!("hello") })
//! }
//!
//! let plugin = PluginRef::of(plugin);
//! ```

use core::any::type_name;
use core::fmt;
use core::future::Future;
use core::marker::PhantomData;
use std::sync::Arc;

use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use trellis_system::component::TypeKey;
use trellis_system::inject::{Inject, InjectContext, InjectSet};
use trellis_system::{BoxError, BoxFuture};
use variadics_please::all_tuples;

use crate::error::PluginError;
use crate::work::Work;

// ─────────────────────────────────────────────────────────────────────────────
// PluginId
// ─────────────────────────────────────────────────────────────────────────────

/// Identity of a plugin.
///
/// Two references to the same entry point (direct or by path) share one id,
/// which is what keeps a plugin from loading twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PluginId(TypeKey);

impl PluginId {
    /// The id of the plugin implemented by type `P`.
    #[must_use]
    pub fn of<P: ?Sized + 'static>() -> Self {
        Self(TypeKey::of::<P>())
    }

    /// The implementing type's name.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.0.name()
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Trait
// ─────────────────────────────────────────────────────────────────────────────

/// A loadable unit of setup code.
///
/// Usually implemented through [`IntoPlugin`] for async functions; implement
/// it by hand for plugins that carry configuration.
pub trait Plugin: Send + Sync + 'static {
    /// The identity used for the loaded-plugin set.
    fn id(&self) -> PluginId;

    /// A human readable name for logs and errors.
    fn name(&self) -> &str;

    /// Runs the plugin body and returns the work it produced.
    fn load<'a>(&'a self, cx: &'a InjectContext<'a>) -> BoxFuture<'a, Result<Vec<Work>, PluginError>>;
}

impl fmt::Debug for dyn Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin").field("name", &self.name()).finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Output
// ─────────────────────────────────────────────────────────────────────────────

/// What a plugin function may return: zero or more units of work.
///
/// | Return type | Work scheduled |
/// |---|---|
/// | `()` | none |
/// | [`Work`] | one |
/// | `Option<Work>` | zero or one |
/// | `Vec<Work>` | each |
/// | `BoxStream<'static, Work>` | each item the stream yields |
/// | `BoxStream<'static, Result<Work, BoxError>>` | each item, until the first error |
/// | `Result<O, E>` | per `O`, or a plugin failure |
pub trait PluginOutput: Send + 'static {
    /// Drains the output into a list of work items.
    fn into_work(self) -> BoxFuture<'static, Result<Vec<Work>, BoxError>>;
}

impl PluginOutput for () {
    fn into_work(self) -> BoxFuture<'static, Result<Vec<Work>, BoxError>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}

impl PluginOutput for Work {
    fn into_work(self) -> BoxFuture<'static, Result<Vec<Work>, BoxError>> {
        Box::pin(async move { Ok(vec![self]) })
    }
}

impl PluginOutput for Option<Work> {
    fn into_work(self) -> BoxFuture<'static, Result<Vec<Work>, BoxError>> {
        Box::pin(async move { Ok(self.into_iter().collect()) })
    }
}

impl PluginOutput for Vec<Work> {
    fn into_work(self) -> BoxFuture<'static, Result<Vec<Work>, BoxError>> {
        Box::pin(async move { Ok(self) })
    }
}

impl PluginOutput for BoxStream<'static, Work> {
    fn into_work(self) -> BoxFuture<'static, Result<Vec<Work>, BoxError>> {
        self.collect::<Vec<_>>().map(Ok).boxed()
    }
}

impl PluginOutput for BoxStream<'static, Result<Work, BoxError>> {
    fn into_work(mut self) -> BoxFuture<'static, Result<Vec<Work>, BoxError>> {
        Box::pin(async move {
            let mut works = Vec::new();
            while let Some(work) = self.next().await {
                works.push(work?);
            }
            Ok(works)
        })
    }
}

impl<O, E> PluginOutput for Result<O, E>
where
    O: PluginOutput,
    E: Into<BoxError> + Send + 'static,
{
    fn into_work(self) -> BoxFuture<'static, Result<Vec<Work>, BoxError>> {
        match self {
            Ok(output) => output.into_work(),
            Err(err) => {
                let err = err.into();
                Box::pin(async move { Err(err) })
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Function Plugins
// ─────────────────────────────────────────────────────────────────────────────

/// Conversion into a shareable [`Plugin`].
///
/// Implemented for every [`Plugin`] and for async functions of up to twelve
/// [`Inject`] parameters returning a [`PluginOutput`].
pub trait IntoPlugin<Marker>: Sized {
    /// Performs the conversion.
    fn into_plugin(self) -> Arc<dyn Plugin>;
}

#[doc(hidden)]
pub struct IsPlugin;

impl<P: Plugin> IntoPlugin<IsPlugin> for P {
    fn into_plugin(self) -> Arc<dyn Plugin> {
        Arc::new(self)
    }
}

/// A plugin backed by an async function.
pub struct FunctionPlugin<F, Marker> {
    func: F,
    _marker: PhantomData<fn() -> Marker>,
}

macro_rules! impl_function_plugin {
    ($(($param:ident, $arg:ident)),*) => {
        impl<Func, Fut, O, $($param),*> IntoPlugin<fn($($param,)*) -> O> for Func
        where
            Func: Fn($($param),*) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = O> + Send + 'static,
            O: PluginOutput,
            $($param: Inject,)*
        {
            fn into_plugin(self) -> Arc<dyn Plugin> {
                Arc::new(FunctionPlugin::<Func, fn($($param,)*) -> O> {
                    func: self,
                    _marker: PhantomData,
                })
            }
        }

        impl<Func, Fut, O, $($param),*> Plugin for FunctionPlugin<Func, fn($($param,)*) -> O>
        where
            Func: Fn($($param),*) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = O> + Send + 'static,
            O: PluginOutput,
            $($param: Inject,)*
        {
            fn id(&self) -> PluginId {
                PluginId::of::<Func>()
            }

            fn name(&self) -> &str {
                type_name::<Func>()
            }

            fn load<'a>(
                &'a self,
                cx: &'a InjectContext<'a>,
            ) -> BoxFuture<'a, Result<Vec<Work>, PluginError>> {
                Box::pin(async move {
                    let ($($arg,)*) = <($($param,)*) as InjectSet>::inject_all(cx, &[])
                        .await
                        .map_err(|source| PluginError::Resolve {
                            plugin: self.name().to_owned(),
                            source,
                        })?;
                    (self.func)($($arg),*)
                        .await
                        .into_work()
                        .await
                        .map_err(|source| PluginError::Failed {
                            plugin: self.name().to_owned(),
                            source,
                        })
                })
            }
        }
    };
}

all_tuples!(impl_function_plugin, 0, 12, P, p);
