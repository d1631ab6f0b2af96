// src/persistence/mod.rs

//! Storage interfaces for dags, their runs and their schedules.
//!
//! All run transitions are compare-and-swap writes: each one only applies
//! when the row is in the expected status and reports whether it did. A
//! `false` return is a lost race, not an error; callers log it and move on.

pub mod memory;

use crate::dag::{Dag, DagRun, DagSchedule, TaskRun};
use crate::errors::Result;
use crate::operation::OperationResult;
use crate::types::{DagId, DagRunId, TaskRunId};

pub use memory::InMemoryPersistence;

pub trait DagPersistence: Send + Sync {
    /// Persist the first version of a new token; assigns dag and task ids
    /// and stores a disabled [`DagSchedule`] for the token.
    fn create_dag(&self, dag: Dag) -> Result<Dag>;

    /// Persist a new version of an existing token, which becomes the latest.
    fn update_dag(&self, dag: Dag) -> Result<Dag>;

    fn find_dag(&self, id: DagId) -> Result<Option<Dag>>;

    /// Latest version of `token`.
    fn find_dag_by_token(&self, token: &str) -> Result<Option<Dag>>;

    /// Latest version of every token.
    fn find_latest_dags(&self) -> Result<Vec<Dag>>;
}

pub trait DagRunPersistence: Send + Sync {
    /// New PENDING run with one PENDING task run per task, in task order.
    fn create_dag_run(&self, dag: &Dag) -> Result<DagRun>;

    fn find_dag_run(&self, id: DagRunId) -> Result<Option<DagRun>>;

    fn find_dag_runs(&self) -> Result<Vec<DagRun>>;

    /// Runs that are PENDING or RUNNING.
    fn find_pending_dag_runs(&self) -> Result<Vec<DagRun>>;

    /// Runs of one dag that are PENDING or RUNNING.
    fn find_pending_dag_runs_by_dag(&self, dag_id: DagId) -> Result<Vec<DagRun>>;

    /// PENDING -> RUNNING, sets the start date.
    fn start_dag_run(&self, id: DagRunId) -> Result<bool>;

    /// RUNNING -> SUCCESS, sets the finish date.
    fn mark_dag_run_success(&self, id: DagRunId) -> Result<bool>;

    /// RUNNING -> FAILED, sets the finish date.
    fn mark_dag_run_failed(&self, id: DagRunId) -> Result<bool>;

    /// PENDING or RUNNING -> CANCELED, sets the finish date.
    fn mark_dag_run_canceled(&self, id: DagRunId) -> Result<bool>;

    /// Append a new PENDING attempt for the task of `task_run_id`.
    fn retry(&self, dag_run_id: DagRunId, task_run_id: TaskRunId) -> Result<TaskRun>;

    /// PENDING -> RUNNING, sets the start date.
    fn start_task_run(&self, id: TaskRunId) -> Result<bool>;

    /// RUNNING -> SUCCESS with the operation result, sets the finish date.
    fn mark_task_run_success(&self, id: TaskRunId, result: OperationResult) -> Result<bool>;

    /// RUNNING -> FAILED with the operation result, sets the finish date.
    fn mark_task_run_failed(&self, id: TaskRunId, result: OperationResult) -> Result<bool>;

    /// PENDING or RUNNING -> CANCELED, sets the finish date.
    fn mark_task_run_canceled(
        &self,
        id: TaskRunId,
        result: Option<OperationResult>,
    ) -> Result<bool>;
}

pub trait DagSchedulePersistence: Send + Sync {
    /// Every schedule, enabled ones first, then by token.
    fn find_dag_schedules(&self) -> Result<Vec<DagSchedule>>;

    /// Enabled schedules by token.
    fn find_enabled_dag_schedules(&self) -> Result<Vec<DagSchedule>>;

    fn find_dag_schedule(&self, token: &str) -> Result<Option<DagSchedule>>;

    /// `false` when the token has no schedule.
    fn mark_dag_schedule_enabled(&self, token: &str) -> Result<bool>;

    /// `false` when the token has no schedule.
    fn mark_dag_schedule_disabled(&self, token: &str) -> Result<bool>;

    /// Replace `enabled` and the expression of an existing schedule; `false`
    /// when the token has none.
    fn update_dag_schedule(&self, schedule: &DagSchedule) -> Result<bool>;
}
