// src/executor/state.rs

use std::collections::HashMap;

use crate::dag::{Dag, DagRun, Task, TaskRun, TaskRunStatus};
use crate::errors::{Result, TaskflowError};
use crate::types::TaskId;

/// Read-only index over one `(Dag, DagRun)` pair, built once per decision.
///
/// Construction checks the invariants the scheduler relies on and fails with
/// [`TaskflowError::InvalidRunState`] instead of repairing anything:
/// - the dag has tasks and the run belongs to it;
/// - every task has at least one run and every run references a known task;
/// - per task, only the latest run may be PENDING, RUNNING or CANCELED;
/// - per task, every earlier run has finished no later than the next one
///   started.
#[derive(Debug)]
pub struct DagRunState<'a> {
    dag: &'a Dag,
    dag_run: &'a DagRun,
    task_by_token: HashMap<&'a str, &'a Task>,
    task_by_id: HashMap<TaskId, &'a Task>,
    /// Oldest first.
    runs_by_task: HashMap<TaskId, Vec<&'a TaskRun>>,
}

fn invalid(message: String) -> TaskflowError {
    TaskflowError::InvalidRunState(message)
}

impl<'a> DagRunState<'a> {
    pub fn new(dag: &'a Dag, dag_run: &'a DagRun) -> Result<Self> {
        if dag.tasks.is_empty() {
            return Err(invalid(format!("dag {} has no tasks", dag.id)));
        }
        if dag_run.dag_id != dag.id {
            return Err(invalid(format!(
                "dag run {} belongs to dag {}, not {}",
                dag_run.id, dag_run.dag_id, dag.id
            )));
        }

        let task_by_id: HashMap<TaskId, &Task> = dag.tasks.iter().map(|t| (t.id, t)).collect();
        let task_by_token: HashMap<&str, &Task> =
            dag.tasks.iter().map(|t| (t.token.as_str(), t)).collect();

        let mut runs_by_task: HashMap<TaskId, Vec<&TaskRun>> = HashMap::new();
        for task_run in &dag_run.task_runs {
            if !task_by_id.contains_key(&task_run.task_id) {
                return Err(invalid(format!(
                    "task run {} references unknown task {}",
                    task_run.id, task_run.task_id
                )));
            }
            runs_by_task.entry(task_run.task_id).or_default().push(task_run);
        }

        for task in &dag.tasks {
            let runs = runs_by_task
                .get_mut(&task.id)
                .ok_or_else(|| invalid(format!("task {} ({}) has no runs", task.id, task.token)))?;
            runs.sort_by_key(|r| r.id);
            check_history(task, runs)?;
        }

        Ok(Self {
            dag,
            dag_run,
            task_by_token,
            task_by_id,
            runs_by_task,
        })
    }

    pub fn dag(&self) -> &'a Dag {
        self.dag
    }

    pub fn dag_run(&self) -> &'a DagRun {
        self.dag_run
    }

    pub fn task(&self, id: TaskId) -> Option<&'a Task> {
        self.task_by_id.get(&id).copied()
    }

    pub fn task_by_token(&self, token: &str) -> Option<&'a Task> {
        self.task_by_token.get(token).copied()
    }

    /// Every run of a task, oldest first.
    pub fn task_runs(&self, task_id: TaskId) -> &[&'a TaskRun] {
        self.runs_by_task
            .get(&task_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn latest_task_run(&self, task_id: TaskId) -> Option<&'a TaskRun> {
        self.task_runs(task_id).last().copied()
    }

    /// `(task, latest run)` for every task, in declaration order.
    pub fn latest_task_runs(&self) -> impl Iterator<Item = (&'a Task, &'a TaskRun)> + '_ {
        self.dag
            .tasks
            .iter()
            .filter_map(|task| self.latest_task_run(task.id).map(|run| (task, run)))
    }

    pub fn failed_count(&self, task_id: TaskId) -> usize {
        self.task_runs(task_id)
            .iter()
            .filter(|r| r.status == TaskRunStatus::Failed)
            .count()
    }

    /// The task's FAILED attempts have used up its `retry` budget.
    pub fn is_out_of_retry(&self, task: &Task) -> bool {
        self.failed_count(task.id) >= task.retry as usize
    }

    pub fn has_failed_out_of_retry(&self) -> bool {
        self.dag.tasks.iter().any(|task| self.is_out_of_retry(task))
    }

    pub fn has_last_run_canceled(&self) -> bool {
        self.latest_task_runs()
            .any(|(_, run)| run.status == TaskRunStatus::Canceled)
    }

    pub fn has_unfinished(&self) -> bool {
        self.latest_task_runs()
            .any(|(_, run)| run.status.is_unfinished())
    }

    /// Latest run of the first task (declaration order) still PENDING or
    /// RUNNING.
    pub fn first_unfinished(&self) -> Option<&'a TaskRun> {
        self.latest_task_runs()
            .map(|(_, run)| run)
            .find(|run| run.status.is_unfinished())
    }

    /// Aggregate status of a task's dependencies: RUNNING if any dependency's
    /// latest run is RUNNING, else PENDING if any is PENDING, else SUCCESS.
    ///
    /// A FAILED or CANCELED dependency is an error: the decision function
    /// handles those before it ever asks.
    pub fn depends_status(&self, task: &Task) -> Result<TaskRunStatus> {
        let mut has_pending = false;
        let mut has_running = false;

        for token in &task.depends {
            let dep = self.task_by_token(token).ok_or_else(|| {
                invalid(format!("task {} depends on unknown token '{token}'", task.token))
            })?;
            let run = self
                .latest_task_run(dep.id)
                .ok_or_else(|| invalid(format!("task {} has no runs", dep.token)))?;

            match run.status {
                TaskRunStatus::Pending => has_pending = true,
                TaskRunStatus::Running => has_running = true,
                TaskRunStatus::Success => {}
                status @ (TaskRunStatus::Failed | TaskRunStatus::Canceled) => {
                    return Err(invalid(format!(
                        "dependency {} of task {} is {status}",
                        dep.token, task.token
                    )));
                }
            }
        }

        Ok(if has_running {
            TaskRunStatus::Running
        } else if has_pending {
            TaskRunStatus::Pending
        } else {
            TaskRunStatus::Success
        })
    }
}

fn check_history(task: &Task, runs: &[&TaskRun]) -> Result<()> {
    for pair in runs.windows(2) {
        let (prev, next) = (pair[0], pair[1]);

        if matches!(
            prev.status,
            TaskRunStatus::Pending | TaskRunStatus::Running | TaskRunStatus::Canceled
        ) {
            return Err(invalid(format!(
                "task {}: earlier run {} is {} while run {} exists",
                task.token, prev.id, prev.status, next.id
            )));
        }

        let prev_finish = prev.finish_date.ok_or_else(|| {
            invalid(format!(
                "task {}: earlier run {} has no finish date",
                task.token, prev.id
            ))
        })?;

        if let Some(next_start) = next.start_date {
            if prev_finish > next_start {
                return Err(invalid(format!(
                    "task {}: run {} started before run {} finished",
                    task.token, next.id, prev.id
                )));
            }
        }
    }
    Ok(())
}
