// src/executor/processor.rs

use tracing::{debug, info, warn};

use super::command::{Command, DagRunCommand, TaskRunCommand};
use super::state::DagRunState;
use crate::dag::{Dag, DagRun, DagRunStatus, TaskRunStatus};
use crate::errors::Result;

/// Pure scheduling decision: given a dag and the current state of one of
/// its runs, return the single next [`Command`].
///
/// No IO and no clock. The same input always yields the same command, which
/// is what makes a crashed or repeated tick safe to replay.
#[derive(Debug, Clone, Copy, Default)]
pub struct DagRunProcessor;

impl DagRunProcessor {
    pub fn new() -> Self {
        Self
    }

    pub fn process<'a>(&self, dag: &'a Dag, dag_run: &'a DagRun) -> Result<Command<'a>> {
        debug!(dag_run_id = dag_run.id, status = %dag_run.status, "processing dag run");

        match dag_run.status {
            DagRunStatus::Pending => Ok(Command::Run(DagRunCommand::Start(dag_run))),
            DagRunStatus::Running => {
                let state = DagRunState::new(dag, dag_run)?;
                self.process_running(&state)
            }
            DagRunStatus::Success | DagRunStatus::Failed | DagRunStatus::Canceled => {
                Ok(Command::Run(DagRunCommand::Complete(dag_run)))
            }
        }
    }

    fn process_running<'a>(&self, state: &DagRunState<'a>) -> Result<Command<'a>> {
        let dag_run = state.dag_run();

        if state.has_failed_out_of_retry() {
            warn!(dag_run_id = dag_run.id, "found failed task out of retry");
            return Ok(cancel_first_unfinished(state)
                .unwrap_or(Command::Run(DagRunCommand::Failed(dag_run))));
        }

        if state.has_last_run_canceled() {
            warn!(dag_run_id = dag_run.id, "found canceled task");
            return Ok(cancel_first_unfinished(state)
                .unwrap_or(Command::Run(DagRunCommand::Cancel(dag_run))));
        }

        // Out-of-budget failures were handled above, so a failed latest run
        // here is always under budget.
        if let Some((task, task_run)) = state
            .latest_task_runs()
            .find(|(_, run)| run.status == TaskRunStatus::Failed)
        {
            info!(
                dag_run_id = dag_run.id,
                task = %task.token,
                task_run_id = task_run.id,
                failed = state.failed_count(task.id),
                retry = task.retry,
                "retrying failed task run"
            );
            return Ok(Command::Task(TaskRunCommand::Retry(task_run)));
        }

        for (task, task_run) in state.latest_task_runs() {
            if task_run.status != TaskRunStatus::Pending {
                continue;
            }

            let depends = state.depends_status(task)?;
            if depends == TaskRunStatus::Success {
                info!(
                    dag_run_id = dag_run.id,
                    task = %task.token,
                    task_run_id = task_run.id,
                    "task run ready"
                );
                return Ok(Command::Task(TaskRunCommand::Execute(task_run)));
            }

            debug!(
                dag_run_id = dag_run.id,
                task = %task.token,
                depends = %depends,
                "awaiting dependencies"
            );
        }

        if state.has_unfinished() {
            debug!(dag_run_id = dag_run.id, "awaiting running tasks");
            Ok(Command::Run(DagRunCommand::Await(dag_run)))
        } else {
            info!(dag_run_id = dag_run.id, "all tasks succeeded");
            Ok(Command::Run(DagRunCommand::Success(dag_run)))
        }
    }
}

fn cancel_first_unfinished<'a>(state: &DagRunState<'a>) -> Option<Command<'a>> {
    let task_run = state.first_unfinished()?;
    info!(
        dag_run_id = task_run.dag_run_id,
        task_run_id = task_run.id,
        status = %task_run.status,
        "canceling unfinished task run"
    );
    Some(Command::Task(TaskRunCommand::Cancel(task_run)))
}
