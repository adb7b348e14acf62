//! Structured logging.
//!
//! [`TracingPlugin`] installs the process-wide `tracing` subscriber (logs go
//! to standard error) and records what it installed as a [`TracingConfig`]
//! component.
//!
//! # Lifecycle
//!
//! - **Loading** installs the subscriber, unless one is already set, and
//!   adds [`TracingConfig`] to the loading scope.
//! - **Teardown** queues one debug line. Teardown runs in reverse, so it is
//!   the last line logged by a stage that loaded tracing first.
//!
//! The default configuration is registered in the plugin catalog as
//! `trellis.tracing`.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use trellis_core_plugins::{TracingConfig, TracingFormat, TracingPlugin};
//! use trellis_staging::prelude::*;
//! use tracing::Level;
//!
//! async fn logged_operation(config: Arc<TracingConfig>) {
//!     tracing::info!("starting operation");
//!
//!     if config.level >= Level::DEBUG {
//!         tracing::debug!("detailed debug information");
//!     }
//! }
//!
//! let report = Staging::builder()
//!     .catalog(Arc::new(PluginCatalog::new()))
//!     .build()
//!     .run_blocking([
//!         PluginRef::of(
//!             TracingPlugin::default()
//!                 .with_level(Level::DEBUG)
//!                 .with_format(TracingFormat::Compact),
//!         ),
//!         PluginRef::of(logged_operation),
//!     ])
//!     .unwrap();
//! assert!(report.is_success());
//! ```

use std::io::IsTerminal;

use trellis_staging::error::PluginError;
use trellis_staging::plugin::{Plugin, PluginId};
use trellis_staging::teardown::Teardown;
use trellis_staging::work::Work;
use trellis_system::BoxFuture;
use trellis_system::component::Component;
use trellis_system::inject::InjectContext;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

// ─────────────────────────────────────────────────────────────────────────────
// TracingFormat
// ─────────────────────────────────────────────────────────────────────────────

/// Tracing output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TracingFormat {
    /// Pretty output on a terminal, JSON otherwise (default).
    #[default]
    Auto,
    /// Human-readable colored output.
    Pretty,
    /// Compact single-line output.
    Compact,
    /// JSON structured output for log aggregation.
    Json,
}

impl TracingFormat {
    /// Resolves [`Auto`](Self::Auto) against the standard error stream.
    #[must_use]
    pub fn resolve(self) -> Self {
        match self {
            Self::Auto if std::io::stderr().is_terminal() => Self::Pretty,
            Self::Auto => Self::Json,
            other => other,
        }
    }
}

impl core::str::FromStr for TracingFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format `{other}`")),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TracingConfig
// ─────────────────────────────────────────────────────────────────────────────

/// What the tracing plugin installed, as seen by later plugins and work.
#[derive(Debug, Clone, Copy)]
pub struct TracingConfig {
    /// Maximum level let through when no custom filter is set.
    pub level: Level,
    /// Resolved output format; never [`TracingFormat::Auto`].
    pub format: TracingFormat,
}

impl Component for TracingConfig {}

// ─────────────────────────────────────────────────────────────────────────────
// TracingPlugin
// ─────────────────────────────────────────────────────────────────────────────

/// Installs a global `tracing` subscriber while loading.
///
/// The subscriber is a [`tracing_subscriber`] registry with an [`EnvFilter`]
/// and one `fmt` layer in the chosen [`TracingFormat`]. When a subscriber is
/// already installed (a test harness, an embedding application) it is left
/// in place.
///
/// | Adds to the loading scope | |
/// |---|---|
/// | [`TracingConfig`] | the effective level and format |
///
/// ```
/// use trellis_core_plugins::{TracingFormat, TracingPlugin};
/// use tracing::Level;
///
/// let local = TracingPlugin::new()
///     .with_level(Level::DEBUG)
///     .with_format(TracingFormat::Pretty)
///     .with_span_events(true);
///
/// let deployed = TracingPlugin::new()
///     .with_format(TracingFormat::Json)
///     .with_env_filter("trellis_staging=debug,warn");
/// ```
#[derive(Debug, Clone)]
pub struct TracingPlugin {
    level: Level,
    format: TracingFormat,
    directives: Option<String>,
    span_events: bool,
}

impl Default for TracingPlugin {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: TracingFormat::Auto,
            directives: None,
            span_events: false,
        }
    }
}

impl TracingPlugin {
    /// Info level, automatic format, no span events.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum level.
    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Sets the output format.
    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    /// Replaces the level with `EnvFilter` directives such as
    /// `trellis_staging=debug,warn`.
    ///
    /// Directives that fail to parse fall back to the level.
    #[must_use]
    pub fn with_env_filter(mut self, directives: impl Into<String>) -> Self {
        self.directives = Some(directives.into());
        self
    }

    /// Logs span enter and exit events.
    #[must_use]
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    fn filter(&self) -> EnvFilter {
        self.directives
            .as_deref()
            .and_then(|directives| EnvFilter::try_new(directives).ok())
            .unwrap_or_else(|| EnvFilter::new(self.level.as_str()))
    }

    /// Returns `false` if another subscriber was already installed.
    fn install(&self, format: TracingFormat) -> bool {
        let spans = if self.span_events {
            FmtSpan::ENTER | FmtSpan::EXIT
        } else {
            FmtSpan::NONE
        };
        let fmt = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_span_events(spans);
        let output: Box<dyn Layer<Registry> + Send + Sync> = match format {
            TracingFormat::Compact => fmt.compact().boxed(),
            TracingFormat::Json => fmt.json().boxed(),
            TracingFormat::Pretty | TracingFormat::Auto => fmt.pretty().boxed(),
        };

        tracing_subscriber::registry()
            .with(output)
            .with(self.filter())
            .try_init()
            .is_ok()
    }
}

impl Plugin for TracingPlugin {
    fn id(&self) -> PluginId {
        PluginId::of::<Self>()
    }

    fn name(&self) -> &str {
        "trellis::tracing"
    }

    fn load<'a>(&'a self, cx: &'a InjectContext<'a>) -> BoxFuture<'a, Result<Vec<Work>, PluginError>> {
        Box::pin(async move {
            let format = self.format.resolve();
            let installed = self.install(format);
            cx.scope().add(TracingConfig {
                level: self.level,
                format,
            });

            if let Ok(teardown) = cx.scope().get::<Teardown>() {
                teardown.add("tracing", async {
                    tracing::debug!("last teardown action, logging stops with the process");
                });
            }

            tracing::info!(level = %self.level, ?format, installed, "tracing ready");
            Ok(Vec::new())
        })
    }
}

trellis_staging::submit_plugin!("trellis.tracing", TracingPlugin::default());
