// src/executor/task_run.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dag::{Dag, Task, TaskRun};
use crate::operation::{
    OperationContext, OperationError, OperationResult, OperationStatus, OutputSink,
};
use crate::service::DagService;
use crate::types::TaskRunId;

/// Internal handle for a task run being executed.
///
/// - `cancel` is the token handed to the operation.
/// - `handle` is the tokio task driving the operation and recording its
///   outcome.
struct ActiveTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// How an execution ended, before it is persisted.
#[derive(Debug)]
enum Outcome {
    Finished(OperationResult),
    Canceled,
}

struct Inner {
    service: Arc<DagService>,
    /// At most one entry per task run id.
    active: Mutex<HashMap<TaskRunId, ActiveTask>>,
}

impl Inner {
    fn active(&self) -> MutexGuard<'_, HashMap<TaskRunId, ActiveTask>> {
        // Entries are only inserted and removed; a poisoned map is still
        // consistent.
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Runs task runs' operations on their own tokio tasks.
///
/// Each outcome is persisted through the service and the owning dag run is
/// rescheduled. Clones share the same set of active executions.
#[derive(Clone)]
pub struct TaskRunExecutor {
    inner: Arc<Inner>,
}

impl fmt::Debug for TaskRunExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRunExecutor")
            .field("active", &self.active_count())
            .finish()
    }
}

impl TaskRunExecutor {
    pub fn new(service: Arc<DagService>) -> Self {
        Self {
            inner: Arc::new(Inner {
                service,
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Start executing `task_run` unless it is already being executed.
    pub fn schedule(&self, dag: &Dag, task_run: &TaskRun) {
        let mut active = self.inner.active();

        if active.contains_key(&task_run.id) {
            debug!(task_run_id = task_run.id, "task run already executing; ignoring");
            return;
        }

        let cancel = CancellationToken::new();
        let task = dag.task(task_run.task_id).cloned();
        let handle = tokio::spawn(execute(
            Arc::clone(&self.inner),
            task,
            task_run.clone(),
            cancel.clone(),
        ));

        active.insert(task_run.id, ActiveTask { cancel, handle });
    }

    /// Request cooperative cancellation. Returns false if the task run is
    /// not being executed.
    pub fn cancel(&self, task_run_id: TaskRunId) -> bool {
        match self.inner.active().get(&task_run_id) {
            Some(task) => {
                info!(
                    task_run_id,
                    finished = task.handle.is_finished(),
                    "requesting task run cancellation"
                );
                task.cancel.cancel();
                true
            }
            None => {
                info!(task_run_id, "task run not executing; nothing to cancel");
                false
            }
        }
    }

    pub fn is_tracked(&self, task_run_id: TaskRunId) -> bool {
        self.inner.active().contains_key(&task_run_id)
    }

    pub fn active_count(&self) -> usize {
        self.inner.active().len()
    }
}

async fn execute(inner: Arc<Inner>, task: Option<Task>, task_run: TaskRun, cancel: CancellationToken) {
    let outcome = match &task {
        Some(task) => run_operation(&inner.service, task, &task_run, cancel).await,
        None => {
            warn!(task_run_id = task_run.id, task_id = task_run.task_id, "task not found");
            Outcome::Finished(OperationResult::failed("task not found"))
        }
    };

    record(&inner.service, &task_run, outcome);

    inner.active().remove(&task_run.id);
    inner.service.scheduler().schedule(task_run.dag_run_id);
}

async fn run_operation(
    service: &Arc<DagService>,
    task: &Task,
    task_run: &TaskRun,
    cancel: CancellationToken,
) -> Outcome {
    let Some(operation) = service.operations().get(&task.operation) else {
        warn!(task = %task.token, operation = %task.operation, "operation not found");
        return Outcome::Finished(OperationResult::failed("operation not found"));
    };

    info!(
        task = %task.token,
        operation = %task.operation,
        task_run_id = task_run.id,
        "executing task run"
    );

    let sink: OutputSink = {
        let service = Arc::clone(service);
        let (dag_run_id, task_run_id) = (task_run.dag_run_id, task_run.id);
        Arc::new(move |line: &str| service.publish_output_line(dag_run_id, task_run_id, line))
    };
    let context = OperationContext::new(cancel, sink);
    let command = task.command.clone();

    // Own task so a panicking operation is reported like any other error.
    let joined = tokio::spawn(async move { operation.run(&command, context).await }).await;

    match joined {
        Ok(Ok(result)) => Outcome::Finished(result),
        Ok(Err(OperationError::Canceled)) => Outcome::Canceled,
        Ok(Err(e)) => {
            warn!(task = %task.token, error = %e, "operation failed with error");
            Outcome::Finished(OperationResult::failed(e.to_string()))
        }
        Err(e) => {
            error!(task = %task.token, error = %e, "operation panicked");
            Outcome::Finished(OperationResult::failed(format!("operation panicked: {e}")))
        }
    }
}

fn record(service: &DagService, task_run: &TaskRun, outcome: Outcome) {
    let id = task_run.id;
    let persisted = match outcome {
        Outcome::Finished(result) => {
            info!(task_run_id = id, status = %result.status, "task run finished");
            match result.status {
                OperationStatus::Success => service.mark_task_run_success(task_run, result),
                OperationStatus::Failed => service.mark_task_run_failed(task_run, result),
            }
        }
        Outcome::Canceled => {
            info!(task_run_id = id, "task run canceled");
            service.mark_task_run_canceled(task_run, None)
        }
    };

    match persisted {
        Ok(true) => {}
        Ok(false) => warn!(task_run_id = id, "task run outcome not recorded; state changed concurrently"),
        Err(e) => error!(task_run_id = id, error = %e, "failed to record task run outcome"),
    }
}
