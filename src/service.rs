// src/service.rs

//! Dag and run operations used by the executors and the CLI.
//!
//! Every successful run transition is followed by an event on the run's
//! channel. Terminal run transitions also send a notification and close the
//! channel; a failed task run sends a task-failure notification. Event and
//! notification problems are logged and never fail the transition.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::dag::{Dag, DagDefinition, DagRun, DagRunStatus, TaskRun, ValidationErrors, validate_dag};
use crate::errors::{Result, TaskflowError};
use crate::events::{DagRunEvent, EventBus, dag_run_channel};
use crate::executor::ScheduleHandle;
use crate::notification::DagRunNotificationService;
use crate::operation::{OperationRegistry, OperationResult};
use crate::persistence::{DagPersistence, DagRunPersistence};
use crate::types::{DagId, DagRunId, TaskRunId};

pub struct DagService {
    dags: Arc<dyn DagPersistence>,
    runs: Arc<dyn DagRunPersistence>,
    operations: Arc<OperationRegistry>,
    notifications: DagRunNotificationService,
    events: Arc<EventBus>,
    scheduler: ScheduleHandle,
}

impl fmt::Debug for DagService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DagService")
            .field("operations", &self.operations)
            .field("notifications", &self.notifications)
            .finish_non_exhaustive()
    }
}

impl DagService {
    pub fn new(
        dags: Arc<dyn DagPersistence>,
        runs: Arc<dyn DagRunPersistence>,
        operations: Arc<OperationRegistry>,
        notifications: DagRunNotificationService,
        events: Arc<EventBus>,
        scheduler: ScheduleHandle,
    ) -> Self {
        Self {
            dags,
            runs,
            operations,
            notifications,
            events,
            scheduler,
        }
    }

    pub fn operations(&self) -> &Arc<OperationRegistry> {
        &self.operations
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn scheduler(&self) -> &ScheduleHandle {
        &self.scheduler
    }

    // dag api

    pub fn validate(&self, definition: &DagDefinition) -> ValidationErrors {
        validate_dag(definition, &self.operations)
    }

    /// Validate and persist the first version of a new dag token.
    pub fn create_dag(&self, definition: DagDefinition) -> Result<Dag> {
        let dag = definition
            .into_dag(&self.operations)
            .map_err(TaskflowError::InvalidDag)?;
        self.dags.create_dag(dag)
    }

    /// Validate and persist a new version of an existing dag token.
    pub fn update_dag(&self, definition: DagDefinition) -> Result<Dag> {
        let dag = definition
            .into_dag(&self.operations)
            .map_err(TaskflowError::InvalidDag)?;
        self.dags.update_dag(dag)
    }

    pub fn find_dag(&self, id: DagId) -> Result<Option<Dag>> {
        self.dags.find_dag(id)
    }

    pub fn find_dag_by_token(&self, token: &str) -> Result<Option<Dag>> {
        self.dags.find_dag_by_token(token)
    }

    pub fn find_latest_dags(&self) -> Result<Vec<Dag>> {
        self.dags.find_latest_dags()
    }

    // dag run api

    /// Persist a new PENDING run and hand it to the run executor.
    pub fn create_dag_run(&self, dag: &Dag) -> Result<DagRun> {
        let dag_run = self.runs.create_dag_run(dag)?;
        self.publish(dag_run.id, DagRunEvent::DagRunUpdated(dag_run.clone()));
        self.scheduler.schedule(dag_run.id);
        Ok(dag_run)
    }

    /// Ask the run executor to cancel a run; applied in order with the
    /// run's other decisions.
    pub fn cancel_dag_run(&self, id: DagRunId) {
        info!(dag_run_id = id, "cancel requested");
        self.scheduler.cancel(id);
    }

    pub fn find_dag_run(&self, id: DagRunId) -> Result<Option<DagRun>> {
        self.runs.find_dag_run(id)
    }

    pub fn find_dag_runs(&self) -> Result<Vec<DagRun>> {
        self.runs.find_dag_runs()
    }

    pub fn find_pending_dag_runs(&self) -> Result<Vec<DagRun>> {
        self.runs.find_pending_dag_runs()
    }

    pub fn find_pending_dag_runs_by_dag(&self, dag_id: DagId) -> Result<Vec<DagRun>> {
        self.runs.find_pending_dag_runs_by_dag(dag_id)
    }

    pub fn start_dag_run(&self, id: DagRunId) -> Result<bool> {
        let updated = self.runs.start_dag_run(id)?;
        if updated {
            let dag_run = self.load_dag_run(id)?;
            self.publish_dag_run_status(&dag_run);
        }
        Ok(updated)
    }

    pub fn mark_dag_run_success(&self, id: DagRunId) -> Result<bool> {
        let updated = self.runs.mark_dag_run_success(id)?;
        if updated {
            self.finish_dag_run(id)?;
        }
        Ok(updated)
    }

    pub fn mark_dag_run_failed(&self, id: DagRunId) -> Result<bool> {
        let updated = self.runs.mark_dag_run_failed(id)?;
        if updated {
            self.finish_dag_run(id)?;
        }
        Ok(updated)
    }

    pub fn mark_dag_run_canceled(&self, id: DagRunId) -> Result<bool> {
        let updated = self.runs.mark_dag_run_canceled(id)?;
        if updated {
            self.finish_dag_run(id)?;
        }
        Ok(updated)
    }

    fn finish_dag_run(&self, id: DagRunId) -> Result<()> {
        let dag_run = self.load_dag_run(id)?;
        let dag = self.load_dag(dag_run.dag_id)?;

        info!(dag = %dag.token, dag_run_id = id, status = %dag_run.status, "dag run finished");

        self.publish_dag_run_status(&dag_run);
        self.events.remove(&dag_run_channel(id));

        match dag_run.status {
            DagRunStatus::Success => self.notifications.send_dag_success(&dag, &dag_run),
            DagRunStatus::Failed => self.notifications.send_dag_failed(&dag, &dag_run),
            DagRunStatus::Canceled => self.notifications.send_dag_canceled(&dag, &dag_run),
            DagRunStatus::Pending | DagRunStatus::Running => {
                warn!(dag_run_id = id, status = %dag_run.status, "finished dag run is not terminal");
            }
        }
        Ok(())
    }

    // task run api

    /// Append a new PENDING attempt for the task of `task_run`.
    pub fn retry(&self, task_run: &TaskRun) -> Result<TaskRun> {
        let retried = self.runs.retry(task_run.dag_run_id, task_run.id)?;
        self.publish_task_run_status(&retried);
        Ok(retried)
    }

    pub fn start_task_run(&self, task_run: &TaskRun) -> Result<bool> {
        let updated = self.runs.start_task_run(task_run.id)?;
        if updated {
            self.publish_task_run(task_run.dag_run_id, task_run.id)?;
        }
        Ok(updated)
    }

    pub fn mark_task_run_success(&self, task_run: &TaskRun, result: OperationResult) -> Result<bool> {
        let updated = self.runs.mark_task_run_success(task_run.id, result)?;
        if updated {
            self.publish_task_run(task_run.dag_run_id, task_run.id)?;
        }
        Ok(updated)
    }

    pub fn mark_task_run_failed(&self, task_run: &TaskRun, result: OperationResult) -> Result<bool> {
        let updated = self.runs.mark_task_run_failed(task_run.id, result.clone())?;
        if updated {
            let (dag_run, finished) = self.publish_task_run(task_run.dag_run_id, task_run.id)?;
            let dag = self.load_dag(dag_run.dag_id)?;
            self.notifications
                .send_task_failed(&dag, &dag_run, &finished, &result);
        }
        Ok(updated)
    }

    pub fn mark_task_run_canceled(
        &self,
        task_run: &TaskRun,
        result: Option<OperationResult>,
    ) -> Result<bool> {
        let updated = self.runs.mark_task_run_canceled(task_run.id, result)?;
        if updated {
            self.publish_task_run(task_run.dag_run_id, task_run.id)?;
        }
        Ok(updated)
    }

    /// Forward one line of operation output to the run's subscribers.
    pub fn publish_output_line(&self, dag_run_id: DagRunId, task_run_id: TaskRunId, line: &str) {
        self.publish(
            dag_run_id,
            DagRunEvent::TaskRunNewOutputLine {
                dag_run_id,
                task_run_id,
                line: line.to_string(),
            },
        );
    }

    fn load_dag_run(&self, id: DagRunId) -> Result<DagRun> {
        self.runs
            .find_dag_run(id)?
            .ok_or(TaskflowError::DagRunNotFound(id))
    }

    fn load_dag(&self, id: DagId) -> Result<Dag> {
        self.dags.find_dag(id)?.ok_or(TaskflowError::DagNotFound(id))
    }

    /// Reload a task run after a transition and publish its new status.
    fn publish_task_run(
        &self,
        dag_run_id: DagRunId,
        task_run_id: TaskRunId,
    ) -> Result<(DagRun, TaskRun)> {
        let dag_run = self.load_dag_run(dag_run_id)?;
        let task_run = dag_run
            .task_run(task_run_id)
            .cloned()
            .ok_or(TaskflowError::TaskRunNotFound(task_run_id))?;
        self.publish_task_run_status(&task_run);
        Ok((dag_run, task_run))
    }

    fn publish_task_run_status(&self, task_run: &TaskRun) {
        self.publish(
            task_run.dag_run_id,
            DagRunEvent::TaskRunStatusUpdated {
                dag_run_id: task_run.dag_run_id,
                task_run_id: task_run.id,
                status: task_run.status,
                start_date: task_run.start_date,
                finish_date: task_run.finish_date,
                operation_status: task_run.operation_result.as_ref().map(|r| r.status),
            },
        );
    }

    fn publish_dag_run_status(&self, dag_run: &DagRun) {
        self.publish(
            dag_run.id,
            DagRunEvent::DagRunStatusUpdated {
                dag_run_id: dag_run.id,
                status: dag_run.status,
                start_date: dag_run.start_date,
                finish_date: dag_run.finish_date,
            },
        );
    }

    fn publish(&self, dag_run_id: DagRunId, event: DagRunEvent) {
        debug!(dag_run_id, %event, "publishing event");
        self.events.publish(&dag_run_channel(dag_run_id), event);
    }
}
