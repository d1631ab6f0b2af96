// tests/config_loading.rs

use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use taskflow::config::{load_and_validate, load_from_path};
use taskflow::errors::TaskflowError;
use taskflow::types::Serialization;
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn Error>>;

fn write_config(dir: &TempDir, contents: &str) -> Result<PathBuf, Box<dyn Error>> {
    let path = dir.path().join("Taskflow.toml");
    fs::write(&path, contents)?;
    Ok(path)
}

const PIPELINE: &str = r#"
[config]
serialization = "global"
tick_retry = "250ms"

[operation.shell]
timeout = "10m"

[dag]
token = "pipeline"

[[dag.task]]
token = "compile"
operation = "shell"
[dag.task.command.config]
script = "echo compile"
[dag.task.command.environment]

[[dag.task]]
token = "test"
depends = ["compile"]
retry = 3
operation = "shell"
[dag.task.command.config]
script = "echo test"
[dag.task.command.environment]
CI = "1"

[[dag.task]]
token = "notify"
depends = ["test"]
operation = "dummy"
[dag.task.command.config]
status = "success"
[dag.task.command.environment]
"#;

#[test]
fn full_config_loads_and_validates() -> TestResult {
    let dir = TempDir::new()?;
    let path = write_config(&dir, PIPELINE)?;

    let cfg = load_and_validate(&path)?;

    assert_eq!(cfg.executor.serialization, Serialization::Global);
    assert_eq!(cfg.executor.tick_retry, Some(Duration::from_millis(250)));
    assert!(cfg.operations.contains("shell"));
    assert!(cfg.operations.contains("dummy"));

    let shell = cfg.operations.get("shell").ok_or("shell operation")?;
    assert_eq!(
        shell.reference().get("timeout").and_then(|v| v.as_str()),
        Some("10m")
    );

    assert_eq!(cfg.dag.token, "pipeline");
    let test = cfg.dag.task_by_token("test").ok_or("task test")?;
    assert_eq!(test.retry, 3);
    assert!(test.depends.contains("compile"));
    assert_eq!(
        test.command.environment.get("CI").map(String::as_str),
        Some("1")
    );

    let notify = cfg.dag.task_by_token("notify").ok_or("task notify")?;
    assert_eq!(notify.retry, 1);
    Ok(())
}

#[test]
fn config_section_defaults_to_per_run() -> TestResult {
    let dir = TempDir::new()?;
    let path = write_config(
        &dir,
        r#"
[dag]
token = "tiny"

[[dag.task]]
token = "only"
operation = "dummy"
[dag.task.command.config]
[dag.task.command.environment]
"#,
    )?;

    let cfg = load_and_validate(&path)?;
    assert_eq!(cfg.executor.serialization, Serialization::PerRun);
    assert_eq!(cfg.executor.tick_retry, None);
    assert_eq!(cfg.dag.tasks.len(), 1);
    Ok(())
}

#[test]
fn raw_load_does_not_validate_the_dag() -> TestResult {
    let dir = TempDir::new()?;
    let path = write_config(
        &dir,
        r#"
[[dag.task]]
token = "a"
depends = ["missing"]
"#,
    )?;

    let raw = load_from_path(&path)?;
    assert!(raw.dag.token.is_none());
    assert_eq!(raw.dag.tasks.len(), 1);
    assert_eq!(raw.dag.tasks[0].depends, vec!["missing".to_string()]);
    Ok(())
}

#[test]
fn invalid_dag_reports_every_problem() -> TestResult {
    let dir = TempDir::new()?;
    let path = write_config(
        &dir,
        r#"
[[dag.task]]
token = "a"
depends = ["missing"]
operation = "teleport"
"#,
    )?;

    match load_and_validate(&path) {
        Err(TaskflowError::InvalidDag(errors)) => {
            assert!(errors.contains("token", "required"));
            assert!(errors.contains("tasks[0].depends[0]", "undefined token 'missing'"));
            assert!(errors.contains("tasks[0].operation", "unexpected operation 'teleport'"));
            assert!(errors.contains("tasks[0].command", "required"));
        }
        other => panic!("expected InvalidDag, got {other:?}"),
    }
    Ok(())
}

#[test]
fn unknown_serialization_is_a_toml_error() -> TestResult {
    let dir = TempDir::new()?;
    let path = write_config(
        &dir,
        r#"
[config]
serialization = "sometimes"
"#,
    )?;

    assert!(matches!(
        load_and_validate(&path),
        Err(TaskflowError::TomlError(_))
    ));
    Ok(())
}

#[test]
fn bad_tick_retry_is_rejected() -> TestResult {
    let dir = TempDir::new()?;

    for (value, needle) in [("soon", "[config].tick_retry:"), ("0s", "greater than zero")] {
        let path = write_config(
            &dir,
            &format!(
                r#"
[config]
tick_retry = "{value}"

[dag]
token = "d"
[[dag.task]]
token = "a"
operation = "dummy"
[dag.task.command.config]
[dag.task.command.environment]
"#
            ),
        )?;

        match load_and_validate(&path) {
            Err(TaskflowError::ConfigError(message)) => {
                assert!(message.contains(needle), "{value}: {message}");
            }
            other => panic!("expected ConfigError for {value}, got {other:?}"),
        }
    }
    Ok(())
}

const SCHEDULED: &str = r#"
[schedule]
cron = "{cron}"
{enabled}

[dag]
token = "nightly"
[[dag.task]]
token = "a"
operation = "dummy"
[dag.task.command.config]
[dag.task.command.environment]
"#;

fn scheduled(cron: &str, enabled: &str) -> String {
    SCHEDULED.replace("{cron}", cron).replace("{enabled}", enabled)
}

#[test]
fn schedule_section_attaches_to_the_dag_token() -> TestResult {
    let dir = TempDir::new()?;

    let cfg = load_and_validate(write_config(&dir, &scheduled("0 2 * * *", ""))?)?;
    let schedule = cfg.schedule.ok_or("schedule missing")?;
    assert_eq!(schedule.token, "nightly");
    assert!(schedule.enabled);
    assert_eq!(schedule.cron_expression.as_deref(), Some("0 2 * * *"));

    let cfg = load_and_validate(write_config(&dir, &scheduled("0 2 * * *", "enabled = false"))?)?;
    assert_eq!(cfg.schedule.map(|s| s.enabled), Some(false));

    // No section, no schedule.
    let cfg = load_and_validate(write_config(&dir, PIPELINE)?)?;
    assert!(cfg.schedule.is_none());
    Ok(())
}

#[test]
fn invalid_cron_expression_is_rejected() -> TestResult {
    let dir = TempDir::new()?;

    for cron in ["every night", "61 * * * *", ""] {
        let path = write_config(&dir, &scheduled(cron, ""))?;
        match load_and_validate(&path) {
            Err(TaskflowError::ConfigError(message)) => {
                assert!(message.starts_with("[schedule].cron:"), "{cron}: {message}");
            }
            other => panic!("expected ConfigError for {cron:?}, got {other:?}"),
        }
    }
    Ok(())
}

#[test]
fn missing_file_is_an_io_error() -> TestResult {
    let dir = TempDir::new()?;
    let result = load_and_validate(dir.path().join("nope.toml"));
    assert!(matches!(result, Err(TaskflowError::IoError(_))));
    Ok(())
}
