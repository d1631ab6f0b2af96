// src/dag/model.rs

//! Workflow definitions (`Dag`, `Task`) and their runs (`DagRun`, `TaskRun`).

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::operation::{OperationCommand, OperationResult};
use crate::types::{DagId, DagRunId, TaskId, TaskRunId};

/// Directed acyclic graph of tasks.
///
/// `(token, version)` is unique; the persistence layer decides which version
/// of a token is the latest one. Immutable once persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dag {
    pub id: DagId,
    pub version: u32,
    pub token: String,
    pub tasks: Vec<Task>,
}

impl Dag {
    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_by_token(&self, token: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.token == token)
    }
}

/// Parametrized invocation of an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub version: u32,
    pub token: String,
    /// Tokens of tasks in the same dag that must succeed first.
    pub depends: BTreeSet<String>,
    /// Number of failed attempts after which the run gives up on this task.
    pub retry: u32,
    /// Id of the operation in the registry.
    pub operation: String,
    pub command: OperationCommand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DagRunStatus {
    Pending,
    Running,
    Success,
    Failed,
    Canceled,
}

impl DagRunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DagRunStatus::Success | DagRunStatus::Failed | DagRunStatus::Canceled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskRunStatus {
    Pending,
    Running,
    Success,
    Failed,
    Canceled,
}

impl TaskRunStatus {
    pub fn is_unfinished(self) -> bool {
        matches!(self, TaskRunStatus::Pending | TaskRunStatus::Running)
    }
}

impl fmt::Display for DagRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DagRunStatus::Pending => "PENDING",
            DagRunStatus::Running => "RUNNING",
            DagRunStatus::Success => "SUCCESS",
            DagRunStatus::Failed => "FAILED",
            DagRunStatus::Canceled => "CANCELED",
        };
        f.write_str(s)
    }
}

impl fmt::Display for TaskRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskRunStatus::Pending => "PENDING",
            TaskRunStatus::Running => "RUNNING",
            TaskRunStatus::Success => "SUCCESS",
            TaskRunStatus::Failed => "FAILED",
            TaskRunStatus::Canceled => "CANCELED",
        };
        f.write_str(s)
    }
}

/// One execution instance of a [`Dag`].
///
/// Owns its task runs; `task_runs` is kept in creation (id) order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagRun {
    pub id: DagRunId,
    pub dag_id: DagId,
    pub created_date: DateTime<Utc>,
    pub start_date: Option<DateTime<Utc>>,
    pub finish_date: Option<DateTime<Utc>>,
    pub status: DagRunStatus,
    pub task_runs: Vec<TaskRun>,
}

impl DagRun {
    pub fn task_run(&self, id: TaskRunId) -> Option<&TaskRun> {
        self.task_runs.iter().find(|t| t.id == id)
    }

    /// Task runs currently in RUNNING state.
    pub fn running_task_runs(&self) -> impl Iterator<Item = &TaskRun> {
        self.task_runs
            .iter()
            .filter(|t| t.status == TaskRunStatus::Running)
    }
}

/// One execution attempt of a [`Task`] within a [`DagRun`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRun {
    pub id: TaskRunId,
    pub dag_run_id: DagRunId,
    pub task_id: TaskId,
    pub created_date: DateTime<Utc>,
    pub start_date: Option<DateTime<Utc>>,
    pub finish_date: Option<DateTime<Utc>>,
    pub status: TaskRunStatus,
    pub operation_result: Option<OperationResult>,
}
