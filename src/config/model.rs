// src/config/model.rs

use serde::Deserialize;

use crate::dag::{Dag, DagDefinition, DagSchedule};
use crate::executor::ExecutorOptions;
use crate::operation::OperationRegistry;
use crate::types::Serialization;

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [config]
/// serialization = "per_run"
/// tick_retry = "5s"
///
/// [operation.shell]
/// timeout = "10m"
///
/// [schedule]
/// cron = "0 2 * * *"
///
/// [dag]
/// token = "build"
///
/// [[dag.task]]
/// token = "compile"
/// operation = "shell"
/// [dag.task.command.config]
/// script = "make"
/// [dag.task.command.environment]
///
/// [[dag.task]]
/// token = "test"
/// depends = ["compile"]
/// retry = 3
/// operation = "shell"
/// [dag.task.command.config]
/// script = "make test"
/// [dag.task.command.environment]
/// CI = "1"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    /// Executor behaviour from `[config]`.
    #[serde(default)]
    pub config: ConfigSection,

    /// Reference configs of the built-in operations from `[operation.*]`.
    #[serde(default)]
    pub operation: OperationSection,

    /// Optional cron trigger for the dag.
    #[serde(default)]
    pub schedule: Option<ScheduleSection>,

    /// The workflow from `[dag]`.
    #[serde(default)]
    pub dag: DagDefinition,
}

/// `[config]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigSection {
    /// `"per_run"` (default) or `"global"`.
    #[serde(default)]
    pub serialization: Serialization,

    /// Delay before a tick that failed with an error is scheduled again,
    /// e.g. `"5s"`. Unset means a failed tick waits for the next schedule.
    #[serde(default)]
    pub tick_retry: Option<String>,
}

/// `[schedule]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleSection {
    pub cron: String,

    #[serde(default = "default_schedule_enabled")]
    pub enabled: bool,
}

fn default_schedule_enabled() -> bool {
    true
}

/// `[operation.<id>]` sections: defaults merged under every task's config.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperationSection {
    #[serde(default)]
    pub dummy: toml::Table,

    #[serde(default)]
    pub shell: toml::Table,
}

/// Validated configuration.
///
/// Only constructed through `TryFrom<RawConfigFile>`, so the dag is known to
/// be well formed against the registry.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub executor: ExecutorOptions,
    pub operations: OperationRegistry,
    /// Ids and versions are unassigned until the dag is persisted.
    pub dag: Dag,
    /// Schedule for the dag's token, with a parseable expression.
    pub schedule: Option<DagSchedule>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        executor: ExecutorOptions,
        operations: OperationRegistry,
        dag: Dag,
        schedule: Option<DagSchedule>,
    ) -> Self {
        Self {
            executor,
            operations,
            dag,
            schedule,
        }
    }
}
