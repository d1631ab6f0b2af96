#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use taskflow::dag::{
    CommandDefinition, Dag, DagDefinition, DagRun, DagRunStatus, Task, TaskDefinition, TaskRun,
    TaskRunStatus,
};
use taskflow::operation::OperationCommand;

/// Builder for `DagDefinition` to simplify test setup.
pub struct DagDefinitionBuilder {
    def: DagDefinition,
}

impl DagDefinitionBuilder {
    pub fn new(token: &str) -> Self {
        Self {
            def: DagDefinition {
                token: Some(token.to_string()),
                tasks: Vec::new(),
            },
        }
    }

    pub fn task(mut self, task: TaskDefinitionBuilder) -> Self {
        self.def.tasks.push(task.build());
        self
    }

    pub fn build(self) -> DagDefinition {
        self.def
    }
}

/// Builder for `TaskDefinition`, with an empty environment and config.
pub struct TaskDefinitionBuilder {
    task: TaskDefinition,
}

impl TaskDefinitionBuilder {
    pub fn new(token: &str, operation: &str) -> Self {
        Self {
            task: TaskDefinition {
                token: Some(token.to_string()),
                depends: Vec::new(),
                retry: 1,
                operation: Some(operation.to_string()),
                command: Some(CommandDefinition {
                    config: Some(toml::Table::new()),
                    environment: Some(Default::default()),
                }),
            },
        }
    }

    /// `dummy` task reporting the given status (`"success"` / `"failed"`).
    pub fn dummy(token: &str, status: &str) -> Self {
        Self::new(token, "dummy").config("status", status)
    }

    /// `fake` task labelled with its own token.
    pub fn fake(token: &str) -> Self {
        Self::new(token, crate::FAKE_OPERATION).config(crate::FAKE_LABEL, token)
    }

    pub fn depends(mut self, dep: &str) -> Self {
        self.task.depends.push(dep.to_string());
        self
    }

    pub fn retry(mut self, retry: u32) -> Self {
        self.task.retry = retry;
        self
    }

    pub fn config(mut self, key: &str, value: impl Into<toml::Value>) -> Self {
        if let Some(command) = self.task.command.as_mut() {
            command
                .config
                .get_or_insert_with(toml::Table::new)
                .insert(key.to_string(), value.into());
        }
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        if let Some(command) = self.task.command.as_mut() {
            command
                .environment
                .get_or_insert_with(Default::default)
                .insert(key.to_string(), value.to_string());
        }
        self
    }

    pub fn build(self) -> TaskDefinition {
        self.task
    }
}

/// Builder for an already persisted-looking `Dag` (ids assigned), used to
/// feed the decision function directly.
///
/// Tasks get ids 1, 2, 3, ... in declaration order.
pub struct DagBuilder {
    dag: Dag,
}

impl DagBuilder {
    pub fn new(token: &str) -> Self {
        Self {
            dag: Dag {
                id: 1,
                version: 1,
                token: token.to_string(),
                tasks: Vec::new(),
            },
        }
    }

    /// Task with the default retry budget of 1.
    pub fn task(self, token: &str, depends: &[&str]) -> Self {
        self.task_with_retry(token, depends, 1)
    }

    pub fn task_with_retry(mut self, token: &str, depends: &[&str], retry: u32) -> Self {
        let id = self.dag.tasks.len() as u64 + 1;
        self.dag.tasks.push(Task {
            id,
            version: 1,
            token: token.to_string(),
            depends: depends.iter().map(|d| d.to_string()).collect(),
            retry,
            operation: "dummy".to_string(),
            command: OperationCommand::default(),
        });
        self
    }

    pub fn build(self) -> Dag {
        self.dag
    }
}

/// Fixed point in time all builder timestamps derive from.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Builder for `DagRun`s of a `Dag` built by [`DagBuilder`].
///
/// Task runs get ids 1, 2, 3, ... in the order they are added. A task run
/// with id `n` starts at `base + 10n s` and, when finished, ends 5 s later,
/// so consecutive attempts of one task are always correctly ordered.
pub struct DagRunBuilder<'a> {
    dag: &'a Dag,
    run: DagRun,
}

impl<'a> DagRunBuilder<'a> {
    pub fn new(dag: &'a Dag) -> Self {
        Self {
            dag,
            run: DagRun {
                id: 1,
                dag_id: dag.id,
                created_date: base_time(),
                start_date: Some(base_time()),
                finish_date: None,
                status: DagRunStatus::Running,
                task_runs: Vec::new(),
            },
        }
    }

    pub fn status(mut self, status: DagRunStatus) -> Self {
        self.run.status = status;
        match status {
            DagRunStatus::Pending => self.run.start_date = None,
            DagRunStatus::Running => {}
            DagRunStatus::Success | DagRunStatus::Failed | DagRunStatus::Canceled => {
                self.run.finish_date = Some(base_time() + Duration::hours(1));
            }
        }
        self
    }

    /// One PENDING run for every task of the dag.
    pub fn all_pending(mut self) -> Self {
        let tokens: Vec<String> = self.dag.tasks.iter().map(|t| t.token.clone()).collect();
        for token in tokens {
            self = self.task_run(&token, TaskRunStatus::Pending);
        }
        self
    }

    pub fn task_run(self, token: &str, status: TaskRunStatus) -> Self {
        let task_id = self
            .dag
            .task_by_token(token)
            .map(|t| t.id)
            .unwrap_or_else(|| panic!("unknown task token {token}"));
        self.raw_task_run(task_id, status)
    }

    /// Task run for an arbitrary task id, even one the dag does not have.
    pub fn raw_task_run(mut self, task_id: u64, status: TaskRunStatus) -> Self {
        let id = self.run.task_runs.len() as u64 + 1;
        let start = base_time() + Duration::seconds(10 * id as i64);
        let finish = start + Duration::seconds(5);

        let (start_date, finish_date) = match status {
            TaskRunStatus::Pending => (None, None),
            TaskRunStatus::Running => (Some(start), None),
            TaskRunStatus::Success | TaskRunStatus::Failed | TaskRunStatus::Canceled => {
                (Some(start), Some(finish))
            }
        };

        self.run.task_runs.push(TaskRun {
            id,
            dag_run_id: self.run.id,
            task_id,
            created_date: base_time(),
            start_date,
            finish_date,
            status,
            operation_result: None,
        });
        self
    }

    pub fn build(self) -> DagRun {
        self.run
    }
}
