// src/persistence/memory.rs

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use anyhow::anyhow;
use chrono::Utc;
use tracing::{debug, info};

use super::{DagPersistence, DagRunPersistence, DagSchedulePersistence};
use crate::dag::{Dag, DagRun, DagRunStatus, DagSchedule, TaskRun, TaskRunStatus};
use crate::errors::{Result, TaskflowError};
use crate::operation::OperationResult;
use crate::types::{DagId, DagRunId, TaskId, TaskRunId};

#[derive(Debug, Default)]
struct Store {
    next_dag_id: DagId,
    next_task_id: TaskId,
    next_dag_run_id: DagRunId,
    next_task_run_id: TaskRunId,

    dags: BTreeMap<DagId, Dag>,
    /// token -> id of its latest version.
    latest: BTreeMap<String, DagId>,

    dag_runs: BTreeMap<DagRunId, DagRun>,
    /// task run id -> owning dag run id.
    task_run_owner: HashMap<TaskRunId, DagRunId>,

    schedules: BTreeMap<String, DagSchedule>,
}

impl Store {
    fn next_dag_id(&mut self) -> DagId {
        self.next_dag_id += 1;
        self.next_dag_id
    }

    fn next_task_id(&mut self) -> TaskId {
        self.next_task_id += 1;
        self.next_task_id
    }

    fn next_dag_run_id(&mut self) -> DagRunId {
        self.next_dag_run_id += 1;
        self.next_dag_run_id
    }

    fn next_task_run_id(&mut self) -> TaskRunId {
        self.next_task_run_id += 1;
        self.next_task_run_id
    }

    fn insert_dag(&mut self, mut dag: Dag, version: u32) -> Dag {
        dag.id = self.next_dag_id();
        dag.version = version;
        for task in &mut dag.tasks {
            task.id = self.next_task_id();
            task.version = version;
        }

        self.latest.insert(dag.token.clone(), dag.id);
        self.dags.insert(dag.id, dag.clone());
        dag
    }

    fn update_schedule(&mut self, token: &str, apply: impl FnOnce(&mut DagSchedule)) -> bool {
        match self.schedules.get_mut(token) {
            Some(schedule) => {
                apply(schedule);
                true
            }
            None => false,
        }
    }

    fn pending_task_run(&mut self, dag_run_id: DagRunId, task_id: TaskId) -> TaskRun {
        let id = self.next_task_run_id();
        self.task_run_owner.insert(id, dag_run_id);
        TaskRun {
            id,
            dag_run_id,
            task_id,
            created_date: Utc::now(),
            start_date: None,
            finish_date: None,
            status: TaskRunStatus::Pending,
            operation_result: None,
        }
    }

    fn dag_run_cas(
        &mut self,
        id: DagRunId,
        expected: &[DagRunStatus],
        apply: impl FnOnce(&mut DagRun),
    ) -> bool {
        match self.dag_runs.get_mut(&id) {
            Some(run) if expected.contains(&run.status) => {
                apply(run);
                true
            }
            _ => false,
        }
    }

    fn task_run_cas(
        &mut self,
        id: TaskRunId,
        expected: &[TaskRunStatus],
        apply: impl FnOnce(&mut TaskRun),
    ) -> bool {
        let Some(dag_run_id) = self.task_run_owner.get(&id).copied() else {
            return false;
        };
        let task_run = self
            .dag_runs
            .get_mut(&dag_run_id)
            .and_then(|run| run.task_runs.iter_mut().find(|t| t.id == id));

        match task_run {
            Some(task_run) if expected.contains(&task_run.status) => {
                apply(task_run);
                true
            }
            _ => false,
        }
    }
}

/// Process-local store implementing every persistence interface.
///
/// Everything lives behind one mutex, so every write is atomic with respect
/// to every other.
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    store: Mutex<Store>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Store>> {
        self.store
            .lock()
            .map_err(|_| TaskflowError::Other(anyhow!("persistence store lock poisoned")))
    }

    fn finish_dag_run(&self, id: DagRunId, status: DagRunStatus) -> Result<bool> {
        let expected: &[DagRunStatus] = if status == DagRunStatus::Canceled {
            &[DagRunStatus::Pending, DagRunStatus::Running]
        } else {
            &[DagRunStatus::Running]
        };

        let updated = self.lock()?.dag_run_cas(id, expected, |run| {
            run.status = status;
            run.finish_date = Some(Utc::now());
        });
        debug!(dag_run_id = id, %status, updated, "finish dag run");
        Ok(updated)
    }

    fn finish_task_run(
        &self,
        id: TaskRunId,
        status: TaskRunStatus,
        result: Option<OperationResult>,
    ) -> Result<bool> {
        let expected: &[TaskRunStatus] = if status == TaskRunStatus::Canceled {
            &[TaskRunStatus::Pending, TaskRunStatus::Running]
        } else {
            &[TaskRunStatus::Running]
        };

        let updated = self.lock()?.task_run_cas(id, expected, |task_run| {
            task_run.status = status;
            task_run.finish_date = Some(Utc::now());
            task_run.operation_result = result;
        });
        debug!(task_run_id = id, %status, updated, "finish task run");
        Ok(updated)
    }
}

impl DagPersistence for InMemoryPersistence {
    fn create_dag(&self, dag: Dag) -> Result<Dag> {
        let mut store = self.lock()?;
        if store.latest.contains_key(&dag.token) {
            return Err(TaskflowError::DagAlreadyExists(dag.token));
        }

        store
            .schedules
            .entry(dag.token.clone())
            .or_insert_with(|| DagSchedule::disabled(dag.token.clone()));

        let dag = store.insert_dag(dag, 1);
        info!(dag = %dag.token, dag_id = dag.id, version = dag.version, "created dag");
        Ok(dag)
    }

    fn update_dag(&self, dag: Dag) -> Result<Dag> {
        let mut store = self.lock()?;
        let latest_version = store
            .latest
            .get(&dag.token)
            .and_then(|id| store.dags.get(id))
            .map(|d| d.version)
            .ok_or_else(|| TaskflowError::UnknownDagToken(dag.token.clone()))?;

        let dag = store.insert_dag(dag, latest_version + 1);
        info!(dag = %dag.token, dag_id = dag.id, version = dag.version, "updated dag");
        Ok(dag)
    }

    fn find_dag(&self, id: DagId) -> Result<Option<Dag>> {
        Ok(self.lock()?.dags.get(&id).cloned())
    }

    fn find_dag_by_token(&self, token: &str) -> Result<Option<Dag>> {
        let store = self.lock()?;
        Ok(store
            .latest
            .get(token)
            .and_then(|id| store.dags.get(id))
            .cloned())
    }

    fn find_latest_dags(&self) -> Result<Vec<Dag>> {
        let store = self.lock()?;
        Ok(store
            .latest
            .values()
            .filter_map(|id| store.dags.get(id))
            .cloned()
            .collect())
    }
}

impl DagRunPersistence for InMemoryPersistence {
    fn create_dag_run(&self, dag: &Dag) -> Result<DagRun> {
        let mut store = self.lock()?;
        if !store.dags.contains_key(&dag.id) {
            return Err(TaskflowError::DagNotFound(dag.id));
        }

        let id = store.next_dag_run_id();
        let task_runs = dag
            .tasks
            .iter()
            .map(|task| store.pending_task_run(id, task.id))
            .collect();

        let run = DagRun {
            id,
            dag_id: dag.id,
            created_date: Utc::now(),
            start_date: None,
            finish_date: None,
            status: DagRunStatus::Pending,
            task_runs,
        };
        store.dag_runs.insert(id, run.clone());

        info!(dag = %dag.token, version = dag.version, dag_run_id = id, "created dag run");
        Ok(run)
    }

    fn find_dag_run(&self, id: DagRunId) -> Result<Option<DagRun>> {
        Ok(self.lock()?.dag_runs.get(&id).cloned())
    }

    fn find_dag_runs(&self) -> Result<Vec<DagRun>> {
        Ok(self.lock()?.dag_runs.values().cloned().collect())
    }

    fn find_pending_dag_runs(&self) -> Result<Vec<DagRun>> {
        Ok(self
            .lock()?
            .dag_runs
            .values()
            .filter(|run| !run.status.is_terminal())
            .cloned()
            .collect())
    }

    fn find_pending_dag_runs_by_dag(&self, dag_id: DagId) -> Result<Vec<DagRun>> {
        Ok(self
            .lock()?
            .dag_runs
            .values()
            .filter(|run| run.dag_id == dag_id && !run.status.is_terminal())
            .cloned()
            .collect())
    }

    fn start_dag_run(&self, id: DagRunId) -> Result<bool> {
        let updated = self
            .lock()?
            .dag_run_cas(id, &[DagRunStatus::Pending], |run| {
                run.status = DagRunStatus::Running;
                run.start_date = Some(Utc::now());
            });
        debug!(dag_run_id = id, updated, "start dag run");
        Ok(updated)
    }

    fn mark_dag_run_success(&self, id: DagRunId) -> Result<bool> {
        self.finish_dag_run(id, DagRunStatus::Success)
    }

    fn mark_dag_run_failed(&self, id: DagRunId) -> Result<bool> {
        self.finish_dag_run(id, DagRunStatus::Failed)
    }

    fn mark_dag_run_canceled(&self, id: DagRunId) -> Result<bool> {
        self.finish_dag_run(id, DagRunStatus::Canceled)
    }

    fn retry(&self, dag_run_id: DagRunId, task_run_id: TaskRunId) -> Result<TaskRun> {
        let mut store = self.lock()?;
        let task_id = store
            .dag_runs
            .get(&dag_run_id)
            .ok_or(TaskflowError::DagRunNotFound(dag_run_id))?
            .task_run(task_run_id)
            .map(|t| t.task_id)
            .ok_or(TaskflowError::TaskRunNotFound(task_run_id))?;

        let task_run = store.pending_task_run(dag_run_id, task_id);
        store
            .dag_runs
            .get_mut(&dag_run_id)
            .ok_or(TaskflowError::DagRunNotFound(dag_run_id))?
            .task_runs
            .push(task_run.clone());

        info!(dag_run_id, previous = task_run_id, task_run_id = task_run.id, "retry task run");
        Ok(task_run)
    }

    fn start_task_run(&self, id: TaskRunId) -> Result<bool> {
        let updated = self
            .lock()?
            .task_run_cas(id, &[TaskRunStatus::Pending], |task_run| {
                task_run.status = TaskRunStatus::Running;
                task_run.start_date = Some(Utc::now());
            });
        debug!(task_run_id = id, updated, "start task run");
        Ok(updated)
    }

    fn mark_task_run_success(&self, id: TaskRunId, result: OperationResult) -> Result<bool> {
        self.finish_task_run(id, TaskRunStatus::Success, Some(result))
    }

    fn mark_task_run_failed(&self, id: TaskRunId, result: OperationResult) -> Result<bool> {
        self.finish_task_run(id, TaskRunStatus::Failed, Some(result))
    }

    fn mark_task_run_canceled(
        &self,
        id: TaskRunId,
        result: Option<OperationResult>,
    ) -> Result<bool> {
        self.finish_task_run(id, TaskRunStatus::Canceled, result)
    }
}

impl DagSchedulePersistence for InMemoryPersistence {
    fn find_dag_schedules(&self) -> Result<Vec<DagSchedule>> {
        let mut schedules: Vec<DagSchedule> = self.lock()?.schedules.values().cloned().collect();
        // Stable sort keeps the map's token order within each group.
        schedules.sort_by_key(|s| !s.enabled);
        Ok(schedules)
    }

    fn find_enabled_dag_schedules(&self) -> Result<Vec<DagSchedule>> {
        Ok(self
            .lock()?
            .schedules
            .values()
            .filter(|s| s.enabled)
            .cloned()
            .collect())
    }

    fn find_dag_schedule(&self, token: &str) -> Result<Option<DagSchedule>> {
        Ok(self.lock()?.schedules.get(token).cloned())
    }

    fn mark_dag_schedule_enabled(&self, token: &str) -> Result<bool> {
        let updated = self.lock()?.update_schedule(token, |s| s.enabled = true);
        debug!(dag = token, updated, "enable dag schedule");
        Ok(updated)
    }

    fn mark_dag_schedule_disabled(&self, token: &str) -> Result<bool> {
        let updated = self.lock()?.update_schedule(token, |s| s.enabled = false);
        debug!(dag = token, updated, "disable dag schedule");
        Ok(updated)
    }

    fn update_dag_schedule(&self, schedule: &DagSchedule) -> Result<bool> {
        let updated = self.lock()?.update_schedule(&schedule.token, |s| {
            s.enabled = schedule.enabled;
            s.cron_expression = schedule.cron_expression.clone();
        });
        debug!(dag = %schedule.token, updated, "update dag schedule");
        Ok(updated)
    }
}
