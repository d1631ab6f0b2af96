// src/config/validate.rs

use crate::config::model::{ConfigFile, ConfigSection, RawConfigFile, ScheduleSection};
use crate::dag::DagSchedule;
use crate::errors::{Result, TaskflowError};
use crate::executor::ExecutorOptions;
use crate::operation::OperationRegistry;
use crate::scheduler::CronExpression;
use crate::types::parse_duration;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = TaskflowError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let executor = executor_options(&raw.config)?;
        let operations = OperationRegistry::with_builtins(&raw.operation);
        let dag = raw
            .dag
            .into_dag(&operations)
            .map_err(TaskflowError::InvalidDag)?;

        let schedule = raw
            .schedule
            .as_ref()
            .map(|section| dag_schedule(&dag.token, section))
            .transpose()?;

        Ok(ConfigFile::new_unchecked(executor, operations, dag, schedule))
    }
}

fn dag_schedule(token: &str, section: &ScheduleSection) -> Result<DagSchedule> {
    let expression = CronExpression::parse(&section.cron)
        .map_err(|e| TaskflowError::ConfigError(format!("[schedule].cron: {e}")))?;
    Ok(DagSchedule::new(token, section.enabled, expression.as_str()))
}

fn executor_options(section: &ConfigSection) -> Result<ExecutorOptions> {
    let tick_retry = match section.tick_retry.as_deref() {
        None => None,
        Some(raw) => {
            let delay = parse_duration(raw).map_err(|e| {
                TaskflowError::ConfigError(format!("[config].tick_retry: {e}"))
            })?;
            if delay.is_zero() {
                return Err(TaskflowError::ConfigError(
                    "[config].tick_retry must be greater than zero".to_string(),
                ));
            }
            Some(delay)
        }
    };

    Ok(ExecutorOptions {
        serialization: section.serialization,
        tick_retry,
    })
}
