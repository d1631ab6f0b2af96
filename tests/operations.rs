// tests/operations.rs

use std::collections::BTreeMap;
use std::error::Error;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use taskflow::operation::{
    DummyOperation, Operation, OperationCommand, OperationContext, OperationError,
    OperationStatus, ShellOperation,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

type TestResult = Result<(), Box<dyn Error>>;

/// Context whose output lines are collected for inspection.
fn recording_context(cancel: CancellationToken) -> (OperationContext, Arc<Mutex<Vec<String>>>) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let lines = Arc::clone(&lines);
        Arc::new(move |line: &str| lines.lock().unwrap().push(line.to_string()))
    };
    (OperationContext::new(cancel, sink), lines)
}

fn command(config: &[(&str, toml::Value)]) -> OperationCommand {
    let config = config
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    OperationCommand::new(config, BTreeMap::new())
}

fn s(value: &str) -> toml::Value {
    toml::Value::String(value.to_string())
}

#[tokio::test]
async fn dummy_reports_configured_status() -> TestResult {
    let op = DummyOperation::default();

    let result = op.run(&command(&[]), OperationContext::detached()).await?;
    assert_eq!(result.status, OperationStatus::Success);
    assert_eq!(result.stdout, "Success dummy operation");

    let result = op
        .run(&command(&[("status", s("failed"))]), OperationContext::detached())
        .await?;
    assert_eq!(result.status, OperationStatus::Failed);
    assert_eq!(result.stderr, "Failed dummy operation");
    Ok(())
}

#[tokio::test]
async fn dummy_falls_back_to_its_reference_config() -> TestResult {
    let mut reference = toml::Table::new();
    reference.insert("status".to_string(), s("failed"));
    let op = DummyOperation::new(reference);

    let result = op.run(&command(&[]), OperationContext::detached()).await?;
    assert_eq!(result.status, OperationStatus::Failed);

    let result = op
        .run(&command(&[("status", s("success"))]), OperationContext::detached())
        .await?;
    assert_eq!(result.status, OperationStatus::Success);
    Ok(())
}

#[tokio::test]
async fn dummy_sleep_observes_cancellation() -> TestResult {
    let op = DummyOperation::default();
    let cancel = CancellationToken::new();
    let (context, _) = recording_context(cancel.clone());

    let cmd = command(&[("sleep", s("1h"))]);
    let run = op.run(&cmd, context);
    cancel.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(5), run).await?;
    assert!(matches!(outcome, Err(OperationError::Canceled)));
    Ok(())
}

#[tokio::test]
async fn dummy_rejects_malformed_config() {
    let op = DummyOperation::default();
    let outcome = op
        .run(&command(&[("sleep", s("forever"))]), OperationContext::detached())
        .await;
    assert!(matches!(outcome, Err(OperationError::Config(_))));
}

#[cfg(unix)]
mod shell {
    use super::*;

    #[tokio::test]
    async fn streams_stdout_lines_and_collects_output() -> TestResult {
        let op = ShellOperation::default();
        let (context, lines) = recording_context(CancellationToken::new());

        let cmd = command(&[("script", s("echo one; echo two; echo oops >&2"))]);
        let result = op.run(&cmd, context).await?;

        assert_eq!(result.status, OperationStatus::Success);
        assert_eq!(result.stdout, "one\ntwo\n");
        assert_eq!(result.stderr, "oops\n");
        assert_eq!(*lines.lock().unwrap(), vec!["one", "two"]);
        Ok(())
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_failed_result() -> TestResult {
        let op = ShellOperation::default();
        let cmd = command(&[("script", s("echo partial; exit 3"))]);

        let result = op.run(&cmd, OperationContext::detached()).await?;
        assert_eq!(result.status, OperationStatus::Failed);
        assert_eq!(result.stdout, "partial\n");
        Ok(())
    }

    #[tokio::test]
    async fn environment_and_directory_are_applied() -> TestResult {
        let dir = TempDir::new()?;
        std::fs::write(dir.path().join("marker.txt"), "here")?;

        let op = ShellOperation::default();
        let mut cmd = command(&[
            ("script", s("echo $GREETING; cat marker.txt")),
            ("directory", s(&dir.path().to_string_lossy())),
        ]);
        cmd.environment
            .insert("GREETING".to_string(), "hello".to_string());

        let result = op.run(&cmd, OperationContext::detached()).await?;
        assert_eq!(result.status, OperationStatus::Success, "{result:?}");
        assert_eq!(result.stdout, "hello\nhere\n");
        Ok(())
    }

    #[tokio::test]
    async fn timeout_kills_the_process() -> TestResult {
        let op = ShellOperation::default();
        let cmd = command(&[("script", s("echo begin; sleep 30")), ("timeout", s("200ms"))]);

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            op.run(&cmd, OperationContext::detached()),
        )
        .await??;

        assert_eq!(result.status, OperationStatus::Failed);
        assert!(
            result.stderr.contains("process killed after timeout"),
            "stderr: {}",
            result.stderr
        );
        Ok(())
    }

    #[tokio::test]
    async fn cancellation_kills_the_process() -> TestResult {
        let op = ShellOperation::default();
        let cancel = CancellationToken::new();
        let (context, lines) = recording_context(cancel.clone());
        let cmd = command(&[("script", s("echo started; sleep 30"))]);

        let canceller = {
            let cancel = cancel.clone();
            let lines = Arc::clone(&lines);
            tokio::spawn(async move {
                while lines.lock().unwrap().is_empty() {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                cancel.cancel();
            })
        };

        let outcome = tokio::time::timeout(Duration::from_secs(10), op.run(&cmd, context)).await?;
        canceller.await?;

        assert!(matches!(outcome, Err(OperationError::Canceled)));
        assert_eq!(*lines.lock().unwrap(), vec!["started"]);
        Ok(())
    }

    #[tokio::test]
    async fn script_can_come_from_the_reference_config() -> TestResult {
        let mut reference = toml::Table::new();
        reference.insert("script".to_string(), s("echo from-reference"));
        let op = ShellOperation::new(reference);

        let result = op.run(&command(&[]), OperationContext::detached()).await?;
        assert_eq!(result.stdout, "from-reference\n");

        let result = op
            .run(&command(&[("script", s("echo own"))]), OperationContext::detached())
            .await?;
        assert_eq!(result.stdout, "own\n");
        Ok(())
    }

    #[tokio::test]
    async fn missing_script_is_a_config_error() {
        let op = ShellOperation::default();
        let outcome = op.run(&command(&[]), OperationContext::detached()).await;
        assert!(matches!(outcome, Err(OperationError::Config(_))));
    }

    #[tokio::test]
    async fn missing_directory_is_an_io_error() {
        let op = ShellOperation::default();
        let cmd = command(&[
            ("script", s("true")),
            ("directory", s("/definitely/not/here")),
        ]);
        let outcome = op.run(&cmd, OperationContext::detached()).await;
        assert!(matches!(outcome, Err(OperationError::Io(_))));
    }
}
