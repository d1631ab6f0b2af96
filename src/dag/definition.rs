// src/dag/definition.rs

//! Candidate dag definitions, as submitted by a user.
//!
//! Every field is optional so that a malformed definition still
//! deserializes and can be reported on as a whole by
//! [`validate_dag`](super::validate::validate_dag). A definition that passes
//! validation converts into a strongly typed [`Dag`].

use std::collections::BTreeMap;

use serde::Deserialize;

use super::model::{Dag, Task};
use super::validate::{ValidationErrors, validate_dag};
use crate::operation::{OperationCommand, OperationRegistry};

/// `[dag]` section: the workflow token plus its `[[dag.task]]` entries.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DagDefinition {
    #[serde(default)]
    pub token: Option<String>,

    /// Tasks in declaration order; the scheduler breaks ties by this order.
    #[serde(default, rename = "task")]
    pub tasks: Vec<TaskDefinition>,
}

/// `[[dag.task]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskDefinition {
    #[serde(default)]
    pub token: Option<String>,

    /// Tokens of the tasks that must succeed before this one starts.
    #[serde(default)]
    pub depends: Vec<String>,

    /// Failed attempts allowed before the whole run fails.
    #[serde(default = "default_retry")]
    pub retry: u32,

    #[serde(default)]
    pub operation: Option<String>,

    #[serde(default)]
    pub command: Option<CommandDefinition>,
}

/// `[dag.task.command]` table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommandDefinition {
    #[serde(default)]
    pub config: Option<toml::Table>,

    #[serde(default)]
    pub environment: Option<BTreeMap<String, String>>,
}

fn default_retry() -> u32 {
    1
}

impl Default for TaskDefinition {
    fn default() -> Self {
        Self {
            token: None,
            depends: Vec::new(),
            retry: default_retry(),
            operation: None,
            command: None,
        }
    }
}

impl DagDefinition {
    /// Validate against the available operations and build the typed dag.
    ///
    /// Ids and versions are left at zero; the persistence layer assigns them.
    pub fn into_dag(self, operations: &OperationRegistry) -> Result<Dag, ValidationErrors> {
        let errors = validate_dag(&self, operations);
        if !errors.is_empty() {
            return Err(errors);
        }

        let tasks = self
            .tasks
            .into_iter()
            .map(|t| {
                let command = t
                    .command
                    .map(|c| {
                        OperationCommand::new(
                            c.config.unwrap_or_default(),
                            c.environment.unwrap_or_default(),
                        )
                    })
                    .unwrap_or_default();

                Task {
                    id: 0,
                    version: 0,
                    token: t.token.unwrap_or_default(),
                    depends: t.depends.into_iter().collect(),
                    retry: t.retry,
                    operation: t.operation.unwrap_or_default(),
                    command,
                }
            })
            .collect();

        Ok(Dag {
            id: 0,
            version: 0,
            token: self.token.unwrap_or_default(),
            tasks,
        })
    }
}

impl From<&Dag> for DagDefinition {
    fn from(dag: &Dag) -> Self {
        Self {
            token: Some(dag.token.clone()),
            tasks: dag
                .tasks
                .iter()
                .map(|t| TaskDefinition {
                    token: Some(t.token.clone()),
                    depends: t.depends.iter().cloned().collect(),
                    retry: t.retry,
                    operation: Some(t.operation.clone()),
                    command: Some(CommandDefinition {
                        config: Some(t.command.config.clone()),
                        environment: Some(t.command.environment.clone()),
                    }),
                })
                .collect(),
        }
    }
}
