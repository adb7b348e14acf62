//! End-to-end staging tests.
//!
//! Each test stages a small plugin set on an isolated factory index and
//! catalog, then checks the report and the side effects of teardown.

use core::convert::Infallible;
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;
use std::sync::Arc;

use parking_lot::Mutex;
use trellis_staging::prelude::*;

// ─── Fixtures ───

#[derive(Component, Default)]
struct Log(Mutex<Vec<String>>);

impl Log {
    fn push(&self, entry: &str) {
        self.0.lock().push(entry.to_owned());
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

#[derive(Component, Default)]
struct Ran(AtomicBool);

fn staging(config: StagingConfig) -> (Staging, Arc<Log>) {
    let staging = Staging::builder()
        .config(config)
        .adapters(Arc::new(Adapters::new()))
        .catalog(Arc::new(PluginCatalog::new()))
        .build();
    let log = staging.scope().add(Log::default());
    (staging, log)
}

async fn three_teardowns(teardown: Arc<Teardown>, log: Arc<Log>) {
    for name in ["t1", "t2", "t3"] {
        let log = Arc::clone(&log);
        teardown.add(name, async move { log.push(name) });
    }
}

async fn broken() -> Result<(), BoxError> {
    Err("broken plugin".into())
}

// ─── Teardown ───

/// Teardown actions run newest first after a successful run.
#[tokio::test]
async fn teardown_runs_in_reverse_order() {
    let (staging, log) = staging(StagingConfig::new());

    let report = staging.stage([PluginRef::of(three_teardowns)]).await.unwrap();

    assert!(report.is_success());
    assert_eq!(log.entries(), vec!["t3", "t2", "t1"]);
}

/// Teardown still runs, in the same order, when a later plugin fails.
#[tokio::test]
async fn teardown_runs_after_a_load_failure() {
    let (staging, log) = staging(StagingConfig::new());

    let err = staging
        .stage([PluginRef::of(three_teardowns), PluginRef::of(broken)])
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        StageError::Plugin(PluginError::Failed { .. })
    ));
    assert_eq!(log.entries(), vec!["t3", "t2", "t1"]);
}

// ─── Load failures ───

async fn with_work(teardown: Arc<Teardown>, log: Arc<Log>, ran: Arc<Ran>) -> Work {
    teardown.add("first", async move { log.push("first torn down") });
    Work::from_future("never", async move {
        ran.0.store(true, Ordering::SeqCst);
    })
}

/// Work collected before a plugin failure is never scheduled.
#[tokio::test]
async fn load_failure_discards_collected_work() {
    let (staging, log) = staging(StagingConfig::new());
    let ran = staging.scope().add(Ran::default());

    let result = staging
        .stage([PluginRef::of(with_work), PluginRef::of(broken)])
        .await;

    assert!(result.is_err());
    assert!(!ran.0.load(Ordering::SeqCst));
    assert_eq!(log.entries(), vec!["first torn down"]);
}

fn fail_loading() {
    panic!("plugin exploded");
}

async fn panicking(teardown: Arc<Teardown>, log: Arc<Log>) {
    teardown.add("before the panic", async move { log.push("torn down") });
    fail_loading();
}

/// A panicking plugin aborts loading like a failing one; teardown still runs.
#[tokio::test]
async fn plugin_panic_still_runs_teardown() {
    let (staging, log) = staging(StagingConfig::new());

    let err = staging
        .stage([PluginRef::of(panicking)])
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        StageError::Plugin(PluginError::Panicked { ref message, .. })
            if message.contains("plugin exploded")
    ));
    assert_eq!(log.entries(), vec!["torn down"]);
}

#[derive(Component)]
struct Unregistered;

async fn needs_unregistered(_: Arc<Unregistered>) {}

/// A parameter nobody can provide fails the plugin with a resolution error.
#[tokio::test]
async fn unresolvable_parameters_fail_loading() {
    let (staging, _) = staging(StagingConfig::new());

    let err = staging
        .stage([PluginRef::of(needs_unregistered)])
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        StageError::Plugin(PluginError::Resolve { .. })
    ));
}

// ─── Cancellation ───

async fn cancel_and_wait() -> Vec<Work> {
    vec![
        Work::new("cancels", |scope: Components| async move {
            scope.get::<Cancel>()?.cancel();
            Ok::<_, BoxError>("done")
        }),
        Work::from_future("pending", futures::future::pending::<()>()),
    ]
}

/// Cancelling from inside a work item stops the pending ones without
/// deadlocking.
#[tokio::test]
async fn work_can_cancel_the_run() {
    let (staging, _) = staging(StagingConfig::new());

    let report = staging.stage([PluginRef::of(cancel_and_wait)]).await.unwrap();

    assert_eq!(report.get("cancels").unwrap().value::<&str>(), Some(&"done"));
    assert!(report.get("pending").unwrap().is_cancelled());
    assert_eq!(report.cancel_reason(), Some(CancelReason::Requested));
}

async fn forever() -> Work {
    Work::from_future("forever", futures::future::pending::<()>())
}

/// The run-level timeout cancels outstanding work.
#[tokio::test]
async fn timeout_cancels_outstanding_work() {
    let (staging, _) = staging(StagingConfig::new().with_timeout(Duration::from_millis(20)));

    let report = staging.stage([PluginRef::of(forever)]).await.unwrap();

    assert!(report.get("forever").unwrap().is_cancelled());
    assert_eq!(report.cancel_reason(), Some(CancelReason::Timeout));
}

async fn cooperative() -> Vec<Work> {
    vec![
        Work::new("listener", |scope: Components| async move {
            let cancel = scope.get::<Cancel>()?;
            cancel.cancelled().await;
            Ok::<_, BoxError>(7_u8)
        }),
        Work::new("trigger", |scope: Components| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            scope.get::<Cancel>()?.cancel();
            Ok::<_, BoxError>(())
        }),
    ]
}

/// With a grace period, work that observes cancellation finishes on its own.
#[tokio::test]
async fn grace_period_lets_work_finish() {
    let (staging, _) = staging(StagingConfig::new().with_grace(Duration::from_secs(5)));

    let report = staging.stage([PluginRef::of(cooperative)]).await.unwrap();

    assert!(report.is_success());
    assert_eq!(report.get("listener").unwrap().value::<u8>(), Some(&7));
}

async fn spawns_child(teardown: Arc<Teardown>, spawner: Arc<Spawner>, log: Arc<Log>) -> Work {
    let watched = Arc::clone(&spawner);
    teardown.add("check", async move {
        if watched.is_empty() {
            log.push("no spawned units at teardown");
        }
    });
    Work::new("parent", move |scope: Components| async move {
        let ran = scope.get::<Ran>()?;
        let _child = spawner.spawn(&scope, move |_| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            ran.0.store(true, Ordering::SeqCst);
        });
        Ok::<_, ComponentError>(())
    })
}

/// Units spawned by work are stopped before teardown and never outlive the
/// run.
#[tokio::test]
async fn spawned_units_stop_with_the_run() {
    let (staging, log) = staging(StagingConfig::new());
    let ran = staging.scope().add(Ran::default());

    let report = staging.stage([PluginRef::of(spawns_child)]).await.unwrap();

    assert!(report.is_success());
    assert_eq!(log.entries(), vec!["no spawned units at teardown"]);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!ran.0.load(Ordering::SeqCst));
}

// ─── Failures ───

fn explode() {
    panic!("work exploded");
}

async fn mixed() -> Vec<Work> {
    vec![
        Work::from_future("fails", async { Err::<(), _>("nope") }),
        Work::from_future("panics", async { explode() }),
        Work::from_future("succeeds", async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok::<_, Infallible>(42_u64)
        }),
    ]
}

/// Failed and panicking work is reported without affecting siblings.
#[tokio::test]
async fn failures_are_isolated() {
    let (staging, _) = staging(StagingConfig::new());

    let report = staging.stage([PluginRef::of(mixed)]).await.unwrap();

    assert!(matches!(
        report.get("fails").unwrap().failure(),
        Some(TaskFailure::Failed(_))
    ));
    assert!(matches!(
        report.get("panics").unwrap().failure(),
        Some(TaskFailure::Panicked(message)) if message.contains("work exploded")
    ));
    assert_eq!(report.get("succeeds").unwrap().value::<u64>(), Some(&42));
    assert_eq!(report.failures().count(), 2);
    assert!(report.cancel_reason().is_none());
}

// ─── Loading ───

async fn database(teardown: Arc<Teardown>, log: Arc<Log>) {
    log.push("database loaded");
    teardown.add("database", async {});
}

async fn web(loader: Arc<Loader>, log: Arc<Log>) -> Result<(), PluginError> {
    loader.include(PluginRef::relative("..db", "app.web")).await?;
    loader.include("app.db").await?;
    log.push("web loaded");
    Ok(())
}

/// Path references resolve through the catalog and load each plugin once.
#[tokio::test]
async fn named_plugins_load_once() {
    let catalog = Arc::new(PluginCatalog::new());
    catalog.register("app.db", database).unwrap();
    catalog.register("app.web", web).unwrap();

    let staging = Staging::builder()
        .adapters(Arc::new(Adapters::new()))
        .catalog(catalog)
        .build();
    let log = staging.scope().add(Log::default());

    staging.stage(["app.web", "app.db:plugin"]).await.unwrap();

    assert_eq!(log.entries(), vec!["database loaded", "web loaded"]);
}

async fn stacked() -> Vec<Work> {
    (0..2_u32)
        .map(|n| {
            Work::new(format!("stacked{n}"), move |scope: Components| async move {
                tokio::task::yield_now().await;
                scope.add(n);
                tokio::task::yield_now().await;
                Ok::<_, ComponentError>(*scope.get::<u32>()?)
            })
        })
        .collect()
}

/// Stacked work items never observe each other's components.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stacked_work_is_isolated() {
    let (staging, _) = staging(StagingConfig::new());

    let report = staging.stage([PluginRef::of(stacked)]).await.unwrap();

    assert_eq!(report.get("stacked0").unwrap().value::<u32>(), Some(&0));
    assert_eq!(report.get("stacked1").unwrap().value::<u32>(), Some(&1));
}
