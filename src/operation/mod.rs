// src/operation/mod.rs

//! Pluggable units of work that tasks invoke.
//!
//! - [`Operation`] is the trait every operation implements.
//! - [`registry`] maps operation ids to implementations.
//! - [`dummy`] and [`shell`] are the built-in operations.
//!
//! Operations are asynchronous and cooperatively cancellable: the
//! [`OperationContext`] carries a cancellation token that implementations
//! check at safe points, returning [`OperationError::Canceled`] when it fires.

pub mod dummy;
pub mod registry;
pub mod shell;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use dummy::DummyOperation;
pub use registry::OperationRegistry;
pub use shell::ShellOperation;

/// Boxed future returned by [`Operation::run`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Parameters a task passes to its operation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OperationCommand {
    pub config: toml::Table,
    pub environment: BTreeMap<String, String>,
}

impl OperationCommand {
    pub fn new(config: toml::Table, environment: BTreeMap<String, String>) -> Self {
        Self {
            config,
            environment,
        }
    }

    /// Task config with missing keys filled in from the operation's
    /// reference config.
    pub fn config_with_fallback(&self, reference: &toml::Table) -> toml::Table {
        let mut merged = reference.clone();
        for (key, value) in &self.config {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Success,
    Failed,
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationStatus::Success => f.write_str("SUCCESS"),
            OperationStatus::Failed => f.write_str("FAILED"),
        }
    }
}

/// Outcome of an operation that ran to completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub status: OperationStatus,
    pub stdout: String,
    pub stderr: String,
}

impl OperationResult {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            status: OperationStatus::Success,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed result carrying `reason` as its error output.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: OperationStatus::Failed,
            stdout: String::new(),
            stderr: reason.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum OperationError {
    /// The cancellation token fired and the operation stopped early.
    #[error("operation canceled")]
    Canceled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid operation config: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Kind of value a config field expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Duration,
    Integer,
    Boolean,
}

/// Describes one config key an operation understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaField {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub description: &'static str,
}

/// Callback receiving output lines as an operation produces them.
pub type OutputSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Execution context handed to [`Operation::run`].
#[derive(Clone)]
pub struct OperationContext {
    cancel: CancellationToken,
    output: OutputSink,
}

impl fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl OperationContext {
    pub fn new(cancel: CancellationToken, output: OutputSink) -> Self {
        Self { cancel, output }
    }

    /// Context with a fresh token and an output sink that drops lines.
    pub fn detached() -> Self {
        Self::new(CancellationToken::new(), Arc::new(|_: &str| {}))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn emit_line(&self, line: &str) {
        (self.output)(line)
    }
}

/// A pluggable unit of work that can be included as a task in a dag.
///
/// Implementations must be immutable; per-invocation state lives in the
/// future returned by [`run`](Operation::run).
pub trait Operation: Send + Sync {
    fn id(&self) -> &str;

    /// Default config merged under every task's config.
    fn reference(&self) -> &toml::Table;

    /// Config keys this operation understands.
    fn schema(&self) -> &[SchemaField];

    fn run<'a>(
        &'a self,
        command: &'a OperationCommand,
        context: OperationContext,
    ) -> BoxFuture<'a, Result<OperationResult, OperationError>>;
}

/// Read a string key from a merged config table.
pub(crate) fn config_str<'a>(
    config: &'a toml::Table,
    key: &str,
) -> Result<Option<&'a str>, OperationError> {
    match config.get(key) {
        None => Ok(None),
        Some(toml::Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(OperationError::Config(format!(
            "`{key}` must be a string, got {}",
            other.type_str()
        ))),
    }
}

/// Read a duration key (`"3s"`, `"250ms"`) from a merged config table.
pub(crate) fn config_duration(
    config: &toml::Table,
    key: &str,
) -> Result<Option<std::time::Duration>, OperationError> {
    match config_str(config, key)? {
        None => Ok(None),
        Some(s) => crate::types::parse_duration(s)
            .map(Some)
            .map_err(|e| OperationError::Config(format!("`{key}`: {e}"))),
    }
}
