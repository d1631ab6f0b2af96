pub mod builders;
pub mod fake_operation;

use std::sync::Once;
use std::time::Duration;

use taskflow::config::OperationSection;
use taskflow::dag::DagRun;
use taskflow::operation::OperationRegistry;
use taskflow::service::DagService;
use taskflow::types::DagRunId;
use tracing_subscriber::{EnvFilter, fmt};

pub use fake_operation::{
    FAKE_LABEL, FAKE_OPERATION, FakeOperation, FakeOutcome, RecordingNotifier,
};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// Built-in operations plus the given fake.
pub fn registry_with(fake: &FakeOperation) -> OperationRegistry {
    OperationRegistry::with_builtins(&OperationSection::default()).with(fake.clone())
}

/// Poll until the run satisfies `done`, returning the matching snapshot.
///
/// Callers wrap this in [`with_timeout`].
pub async fn wait_for_run<F>(service: &DagService, id: DagRunId, done: F) -> DagRun
where
    F: Fn(&DagRun) -> bool,
{
    loop {
        if let Some(run) = service.find_dag_run(id).expect("find dag run") {
            if done(&run) {
                return run;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Poll until the run reaches a terminal status.
pub async fn wait_for_terminal(service: &DagService, id: DagRunId) -> DagRun {
    wait_for_run(service, id, |run| run.status.is_terminal()).await
}
