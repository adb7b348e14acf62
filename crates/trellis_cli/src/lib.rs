//! The `trellis` command.
//!
//! Stages the plugins named on the command line, after the built-in
//! tracing and configuration plugins.
//!
//! # Usage
//!
//! ```bash
//! trellis [OPTIONS] [PLUGIN]...
//! ```
//!
//! # Example
//!
//! ```bash
//! USER_CONFIG=app.json APP_HTTP_PORT=8080 trellis trellis.jobs app.web --timeout 30
//! ```
//!
//! Exit status is `0` when every work item succeeded (or was cancelled),
//! `1` when a work item failed, and `2` when loading failed.

use core::error::Error;
use core::fmt::Write as _;
use core::time::Duration;
use std::path::PathBuf;

use clap::Parser;
use tracing::Level;
use trellis_core_plugins::{ConfigError, ConfigPlugin, ConfigSource, TracingFormat, TracingPlugin};
use trellis_staging::catalog::PluginRef;
use trellis_staging::error::StageError;
use trellis_staging::stage::{StageReport, StagingConfig};
use trellis_staging::work::{TaskFailure, WorkResult};

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "trellis")]
#[command(about = "Load plugins, run their work, and tear down")]
#[command(version)]
pub struct Cli {
    /// Plugins to load, as `module.path[:function]`
    #[arg(value_name = "PLUGIN")]
    pub plugins: Vec<String>,

    /// JSON configuration file
    #[arg(short, long, value_name = "PATH", env = "USER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Prefix of configuration environment variables
    #[arg(long, value_name = "PREFIX", default_value = "APP")]
    pub env_prefix: String,

    /// Maximum log level
    #[arg(long, value_name = "LEVEL", default_value = "info", env = "APP_LOG_LEVEL")]
    pub log_level: Level,

    /// Log format: auto, pretty, compact or json
    #[arg(long, value_name = "FORMAT", default_value = "auto", env = "APP_LOG_FORMAT")]
    pub log_format: TracingFormat,

    /// Cancel the run after this many seconds
    #[arg(long, value_name = "SECONDS", value_parser = parse_seconds)]
    pub timeout: Option<Duration>,

    /// Seconds cancelled work may take to finish before it is aborted
    #[arg(long, value_name = "SECONDS", value_parser = parse_seconds)]
    pub grace: Option<Duration>,

    /// Keep running on termination signals
    #[arg(long)]
    pub no_signals: bool,

    /// Print the registered plugin paths and exit
    #[arg(long)]
    pub list: bool,
}

fn parse_seconds(value: &str) -> Result<Duration, String> {
    let seconds: f64 = value
        .parse()
        .map_err(|_| format!("`{value}` is not a number of seconds"))?;
    Duration::try_from_secs_f64(seconds).map_err(|err| err.to_string())
}

impl Cli {
    /// The staging configuration the flags describe.
    #[must_use]
    pub fn staging_config(&self) -> StagingConfig {
        let mut config = StagingConfig::new().with_signals(!self.no_signals);
        if let Some(timeout) = self.timeout {
            config = config.with_timeout(timeout);
        }
        if let Some(grace) = self.grace {
            config = config.with_grace(grace);
        }
        config
    }

    /// Reads the configuration file, if any.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read or parsed.
    pub fn config_source(&self) -> Result<ConfigSource, ConfigError> {
        let mut source = ConfigSource::new().with_env_prefix(self.env_prefix.clone());
        if let Some(path) = &self.config {
            source.merge_file(path)?;
        }
        Ok(source)
    }

    /// The plugins to stage: tracing, configuration, then the named ones.
    #[must_use]
    pub fn plugins(&self, source: ConfigSource) -> Vec<PluginRef> {
        let tracing = TracingPlugin::new()
            .with_level(self.log_level)
            .with_format(self.log_format);
        [PluginRef::of(tracing), PluginRef::of(ConfigPlugin::new(source))]
            .into_iter()
            .chain(self.plugins.iter().map(|path| PluginRef::from(path.as_str())))
            .collect()
    }
}

/// One line per work item, plus the cancellation reason.
#[must_use]
pub fn summary(report: &StageReport) -> String {
    let mut out = String::new();
    for result in report.results() {
        let status = match result.failure() {
            None => String::from("ok"),
            Some(TaskFailure::Cancelled) => String::from("cancelled"),
            Some(failure) => failure.to_string(),
        };
        // Writing to a String cannot fail.
        let _ = writeln!(out, "{}: {status}", result.name());
    }
    if let Some(reason) = report.cancel_reason() {
        let _ = writeln!(out, "cancelled: {reason}");
    }
    out
}

/// The process exit status for a staging outcome.
#[must_use]
pub fn exit_status(result: &Result<StageReport, StageError>) -> u8 {
    match result {
        Ok(report) if report.failures().all(WorkResult::is_cancelled) => 0,
        Ok(_) => 1,
        Err(_) => 2,
    }
}

/// Renders an error followed by its sources.
#[must_use]
pub fn error_chain(err: &dyn Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(err) = source {
        let _ = write!(out, ": {err}");
        source = err.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use std::sync::Arc;
    use trellis_staging::catalog::PluginCatalog;
    use trellis_staging::stage::Staging;
    use trellis_staging::work::Work;

    #[test]
    fn flags_map_onto_staging_config() {
        let cli = Cli::try_parse_from([
            "trellis",
            "app.web",
            "app.db:connect",
            "--timeout",
            "1.5",
            "--no-signals",
        ])
        .unwrap();

        let config = cli.staging_config();
        assert_eq!(config.timeout(), Some(Duration::from_millis(1500)));
        assert!(!config.handle_signals());
        assert!(config.stacking());
        assert_eq!(cli.plugins, vec!["app.web", "app.db:connect"]);
    }

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["trellis"]).unwrap();
        assert_eq!(cli.env_prefix, "APP");
        assert_eq!(cli.log_level, Level::INFO);
        assert!(cli.staging_config().handle_signals());
        // Tracing and config come first.
        assert_eq!(cli.plugins(ConfigSource::new()).len(), 2);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(Cli::try_parse_from(["trellis", "--timeout", "soon"]).is_err());
        assert!(Cli::try_parse_from(["trellis", "--timeout", "-1"]).is_err());
        assert!(Cli::try_parse_from(["trellis", "--log-format", "xml"]).is_err());
    }

    async fn answer() -> Work {
        Work::from_future("answer", async { Ok::<_, Infallible>(42_u32) })
    }

    async fn broken() -> Work {
        Work::from_future("broken", async { Err::<(), _>("boom") })
    }

    fn stage(plugins: Vec<PluginRef>) -> Result<StageReport, StageError> {
        Staging::builder()
            .catalog(Arc::new(PluginCatalog::new()))
            .build()
            .run_blocking(plugins)
    }

    #[test]
    fn exit_status_reflects_the_outcome() {
        let ok = stage(vec![PluginRef::of(answer)]);
        assert_eq!(exit_status(&ok), 0);
        assert_eq!(summary(ok.as_ref().unwrap()), "answer: ok\n");

        let failed = stage(vec![PluginRef::of(answer), PluginRef::of(broken)]);
        assert_eq!(exit_status(&failed), 1);
        assert_eq!(
            summary(failed.as_ref().unwrap()),
            "answer: ok\nbroken: work failed: boom\n"
        );

        let unknown = stage(vec![PluginRef::from("app.missing")]);
        assert_eq!(exit_status(&unknown), 2);
    }

    #[test]
    fn error_chain_includes_sources() {
        let err = ConfigError::Io {
            path: PathBuf::from("missing.json"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        assert_eq!(
            error_chain(&err),
            "cannot read config file `missing.json`: no such file"
        );
    }
}
