// src/operation/dummy.rs

//! Operation that does nothing except report a configured outcome.
//!
//! Config keys:
//! - `status`: `"success"` (default) or `"failed"`
//! - `sleep`: optional duration to wait first; the wait observes cancellation

use tracing::debug;

use super::{
    BoxFuture, FieldKind, Operation, OperationCommand, OperationContext, OperationError,
    OperationResult, SchemaField, config_duration, config_str,
};

const SCHEMA: &[SchemaField] = &[
    SchemaField {
        name: "status",
        kind: FieldKind::String,
        required: true,
        description: "outcome to report: success or failed",
    },
    SchemaField {
        name: "sleep",
        kind: FieldKind::Duration,
        required: false,
        description: "time to wait before reporting",
    },
];

#[derive(Debug, Clone)]
pub struct DummyOperation {
    reference: toml::Table,
}

impl DummyOperation {
    pub fn new(mut reference: toml::Table) -> Self {
        if !reference.contains_key("status") {
            reference.insert("status".to_string(), toml::Value::String("success".to_string()));
        }
        Self { reference }
    }
}

impl Default for DummyOperation {
    fn default() -> Self {
        Self::new(toml::Table::new())
    }
}

impl Operation for DummyOperation {
    fn id(&self) -> &str {
        "dummy"
    }

    fn reference(&self) -> &toml::Table {
        &self.reference
    }

    fn schema(&self) -> &[SchemaField] {
        SCHEMA
    }

    fn run<'a>(
        &'a self,
        command: &'a OperationCommand,
        context: OperationContext,
    ) -> BoxFuture<'a, Result<OperationResult, OperationError>> {
        Box::pin(async move {
            let config = command.config_with_fallback(&self.reference);

            if let Some(sleep) = config_duration(&config, "sleep")? {
                debug!(?sleep, "dummy operation sleeping");
                tokio::select! {
                    _ = tokio::time::sleep(sleep) => {}
                    _ = context.cancelled() => return Err(OperationError::Canceled),
                }
            }

            let status = config_str(&config, "status")?.unwrap_or("success");
            if status.eq_ignore_ascii_case("success") {
                Ok(OperationResult::success("Success dummy operation"))
            } else {
                Ok(OperationResult::failed("Failed dummy operation"))
            }
        })
    }
}
