//! Integration tests for the core plugins.
//!
//! The plugins are staged together on isolated fixtures, the way an
//! application would combine them.

use std::sync::Arc;

use serde::Deserialize;
use trellis_core_plugins::{ConfigPlugin, ConfigSection, ConfigSource, FromConfig, Jobs, jobs};
use trellis_staging::prelude::*;
use trellis_staging::testing::StageFixture;

// ─── Fixtures ───

#[derive(Debug, Component, Deserialize, schemars::JsonSchema)]
#[component(bound(FromConfig))]
struct Database {
    url: String,
    #[serde(default = "default_pool")]
    pool: u32,
}

fn default_pool() -> u32 {
    4
}

impl ConfigSection for Database {
    const SECTION: Option<&'static str> = Some("database");
}

#[derive(Debug, Component, Deserialize, schemars::JsonSchema)]
#[component(bound(FromConfig))]
struct Cache {}

impl ConfigSection for Cache {
    const SECTION: Option<&'static str> = Some("database");
}

fn source() -> ConfigSource {
    ConfigSource::from_value(serde_json::json!({
        "database": {"url": "postgres://localhost/app"}
    }))
    .unwrap()
    .with_env_prefix("TEST")
    .with_env([("TEST_DATABASE_POOL", "16")])
}

// ─── Configuration ───

/// Sections become resolvable and honour environment overrides.
#[tokio::test]
async fn sections_resolve_from_the_source() {
    let mut fixture = StageFixture::new();
    fixture
        .load(ConfigPlugin::new(source()).with_section::<Database>())
        .await
        .unwrap();

    let database = fixture.resolve::<Database>().await.unwrap();
    assert_eq!(database.url, "postgres://localhost/app");
    assert_eq!(database.pool, 16);

    // Memoized in the loading scope.
    assert!(fixture.scope().contains::<Database>());
    fixture.finish().await.unwrap();
}

/// Two records claiming one section fail the plugin.
#[tokio::test]
async fn duplicate_sections_fail_loading() {
    let mut fixture = StageFixture::new();
    let err = fixture
        .load(
            ConfigPlugin::new(source())
                .with_section::<Database>()
                .with_section::<Cache>(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        StageError::Plugin(PluginError::Failed { .. })
    ));
}

/// The plugin lists every variable its sections honour.
#[test]
fn env_help_covers_registered_sections() {
    let plugin = ConfigPlugin::new(source()).with_section::<Database>();
    let mut names = plugin.env_help();
    names.sort();
    assert_eq!(names, vec!["TEST_DATABASE_POOL", "TEST_DATABASE_URL"]);
}

// ─── Jobs ───

async fn with_jobs(loader: Arc<Loader>, scope: Components) -> Result<Work, BoxError> {
    loader.include(PluginRef::of(jobs)).await?;
    let jobs = scope.get::<Jobs>()?;
    Ok(Work::new("schedule", move |scope: Components| async move {
        jobs.add(&scope, "background", |_| futures::future::pending::<()>());
        Ok::<_, BoxError>(jobs.len())
    }))
}

/// Jobs started by work outlive it and are stopped during teardown.
#[tokio::test]
async fn jobs_stop_at_teardown() {
    let staging = Staging::builder()
        .adapters(Arc::new(Adapters::new()))
        .catalog(Arc::new(PluginCatalog::new()))
        .build();

    let report = staging.stage([PluginRef::of(with_jobs)]).await.unwrap();

    assert_eq!(report.get("schedule").unwrap().value::<usize>(), Some(&1));
}
