// src/executor/dag_run.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::command::{Command, DagRunCommand, TaskRunCommand};
use super::processor::DagRunProcessor;
use super::state::DagRunState;
use super::task_run::TaskRunExecutor;
use super::{ExecutorMessage, ExecutorOptions, ScheduleHandle};
use crate::dag::{Dag, DagRun, TaskRun, TaskRunStatus};
use crate::errors::{Result, TaskflowError};
use crate::operation::OperationResult;
use crate::service::DagService;
use crate::types::{DagRunId, Serialization};

/// Failure text recorded for task runs found RUNNING at startup.
pub const RECOVERED_TASK_RUN_REASON: &str = "Detected as running task after start";

/// What a single tick did with a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A write happened (or was attempted); the run needs another look.
    Rescheduled,
    /// Nothing to do until something else reschedules the run.
    Idle,
    /// The run is terminal.
    Complete,
    NotFound,
}

impl TickOutcome {
    fn closes_lane(self) -> bool {
        matches!(self, TickOutcome::Complete | TickOutcome::NotFound)
    }
}

/// Loads runs, asks the processor for the next command and applies it.
///
/// Shared by the dispatch loop (global serialization) and the per-run lanes.
struct RunWorker {
    service: Arc<DagService>,
    task_executor: TaskRunExecutor,
    processor: DagRunProcessor,
    options: ExecutorOptions,
    handle: ScheduleHandle,
}

impl RunWorker {
    /// One tick: errors are logged and the tick abandoned, optionally
    /// rescheduling the run after the configured delay.
    fn drive(&self, id: DagRunId) -> TickOutcome {
        match self.tick(id) {
            Ok(TickOutcome::Rescheduled) => {
                self.handle.schedule(id);
                TickOutcome::Rescheduled
            }
            Ok(outcome) => outcome,
            Err(e) => {
                self.abandon(id, &e);
                TickOutcome::Idle
            }
        }
    }

    fn drive_cancel(&self, id: DagRunId) -> TickOutcome {
        match self.cancel(id) {
            Ok(TickOutcome::Rescheduled) => {
                self.handle.schedule(id);
                TickOutcome::Rescheduled
            }
            Ok(outcome) => outcome,
            Err(e) => {
                self.abandon(id, &e);
                TickOutcome::Idle
            }
        }
    }

    fn abandon(&self, id: DagRunId, e: &TaskflowError) {
        error!(dag_run_id = id, error = %e, "tick failed; abandoned");

        if let Some(delay) = self.options.tick_retry {
            let handle = self.handle.clone();
            debug!(dag_run_id = id, ?delay, "rescheduling abandoned tick");
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                handle.schedule(id);
            });
        }
    }

    fn load(&self, id: DagRunId) -> Result<Option<(Dag, DagRun)>> {
        let Some(dag_run) = self.service.find_dag_run(id)? else {
            return Ok(None);
        };
        let dag = self
            .service
            .find_dag(dag_run.dag_id)?
            .ok_or(TaskflowError::DagNotFound(dag_run.dag_id))?;
        Ok(Some((dag, dag_run)))
    }

    fn tick(&self, id: DagRunId) -> Result<TickOutcome> {
        let Some((dag, dag_run)) = self.load(id)? else {
            warn!(dag_run_id = id, "dag run not found");
            return Ok(TickOutcome::NotFound);
        };

        let command = self.processor.process(&dag, &dag_run)?;
        info!(dag = %dag.token, dag_run_id = id, %command, "applying command");

        self.apply(&dag, command)
    }

    fn apply(&self, dag: &Dag, command: Command<'_>) -> Result<TickOutcome> {
        match command {
            Command::Run(DagRunCommand::Start(run)) => {
                let updated = self.service.start_dag_run(run.id)?;
                self.log_cas(&command, updated);
                Ok(TickOutcome::Rescheduled)
            }
            Command::Run(DagRunCommand::Await(_)) => Ok(TickOutcome::Idle),
            Command::Run(DagRunCommand::Failed(run)) => {
                let updated = self.service.mark_dag_run_failed(run.id)?;
                self.log_cas(&command, updated);
                Ok(TickOutcome::Rescheduled)
            }
            Command::Run(DagRunCommand::Success(run)) => {
                let updated = self.service.mark_dag_run_success(run.id)?;
                self.log_cas(&command, updated);
                Ok(TickOutcome::Rescheduled)
            }
            Command::Run(DagRunCommand::Cancel(run)) => {
                let updated = self.service.mark_dag_run_canceled(run.id)?;
                self.log_cas(&command, updated);
                Ok(TickOutcome::Rescheduled)
            }
            Command::Run(DagRunCommand::Complete(_)) => Ok(TickOutcome::Complete),
            Command::Task(TaskRunCommand::Execute(task_run)) => {
                let updated = self.service.start_task_run(task_run)?;
                self.log_cas(&command, updated);
                if updated {
                    self.task_executor.schedule(dag, task_run);
                }
                Ok(TickOutcome::Rescheduled)
            }
            Command::Task(TaskRunCommand::Retry(task_run)) => {
                self.service.retry(task_run)?;
                Ok(TickOutcome::Rescheduled)
            }
            Command::Task(TaskRunCommand::Cancel(task_run)) => self.cancel_task_run(task_run),
        }
    }

    /// A tracked RUNNING task run is asked to stop; its completion
    /// reschedules the run. Anything else is marked CANCELED directly.
    fn cancel_task_run(&self, task_run: &TaskRun) -> Result<TickOutcome> {
        if task_run.status == TaskRunStatus::Running && self.task_executor.cancel(task_run.id) {
            return Ok(TickOutcome::Idle);
        }

        let updated = self.service.mark_task_run_canceled(task_run, None)?;
        if !updated {
            warn!(
                dag_run_id = task_run.dag_run_id,
                task_run_id = task_run.id,
                "task run changed before it could be canceled"
            );
        }
        Ok(TickOutcome::Rescheduled)
    }

    /// Cancel request from outside: cancel the first unfinished task run, or
    /// the run itself when nothing is in flight. The decision loop
    /// propagates the rest.
    fn cancel(&self, id: DagRunId) -> Result<TickOutcome> {
        let Some((dag, dag_run)) = self.load(id)? else {
            warn!(dag_run_id = id, "cancel requested for unknown dag run");
            return Ok(TickOutcome::NotFound);
        };

        if dag_run.status.is_terminal() {
            info!(dag_run_id = id, status = %dag_run.status, "dag run already finished; nothing to cancel");
            return Ok(TickOutcome::Complete);
        }

        let state = DagRunState::new(&dag, &dag_run)?;
        match state.first_unfinished() {
            Some(task_run) => {
                info!(dag_run_id = id, task_run_id = task_run.id, "canceling dag run via task run");
                self.cancel_task_run(task_run)
            }
            None => {
                let updated = self.service.mark_dag_run_canceled(id)?;
                if !updated {
                    warn!(dag_run_id = id, "dag run changed before it could be canceled");
                }
                Ok(TickOutcome::Rescheduled)
            }
        }
    }

    /// Unfinished runs found at startup: RUNNING task runs cannot still be
    /// executing, so they are failed, and every run is scheduled again.
    fn recover(&self) -> Result<()> {
        let pending = self.service.find_pending_dag_runs()?;
        if !pending.is_empty() {
            info!(runs = pending.len(), "recovering unfinished dag runs");
        }

        for dag_run in pending {
            for task_run in dag_run.running_task_runs() {
                warn!(
                    dag_run_id = dag_run.id,
                    task_run_id = task_run.id,
                    "task run was running before start; marking failed"
                );
                let result = OperationResult::failed(RECOVERED_TASK_RUN_REASON);
                if !self.service.mark_task_run_failed(task_run, result)? {
                    warn!(task_run_id = task_run.id, "recovered task run changed concurrently");
                }
            }
            self.handle.schedule(dag_run.id);
        }
        Ok(())
    }

    fn log_cas(&self, command: &Command<'_>, updated: bool) {
        if !updated {
            warn!(%command, "conditional update did not apply; state changed concurrently");
        }
    }
}

enum LaneMessage {
    Tick,
    Cancel,
}

struct Lane {
    tx: mpsc::UnboundedSender<LaneMessage>,
    generation: u64,
}

/// Drives dag runs to completion.
///
/// Decisions for one run are strictly sequential. With
/// [`Serialization::PerRun`] each active run has its own lane (a tokio task
/// fed by a channel) and unrelated runs progress concurrently; with
/// [`Serialization::Global`] every decision happens inline in the dispatch
/// loop.
pub struct DagRunExecutor {
    worker: Arc<RunWorker>,
    rx: mpsc::UnboundedReceiver<ExecutorMessage>,
    lanes: HashMap<DagRunId, Lane>,
    next_generation: u64,
}

impl fmt::Debug for DagRunExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DagRunExecutor")
            .field("options", &self.worker.options)
            .field("lanes", &self.lanes.len())
            .finish_non_exhaustive()
    }
}

impl DagRunExecutor {
    /// `rx` must be the receiving side of the channel whose handle the
    /// service and task executor use.
    pub fn new(
        service: Arc<DagService>,
        task_executor: TaskRunExecutor,
        options: ExecutorOptions,
        rx: mpsc::UnboundedReceiver<ExecutorMessage>,
    ) -> Self {
        let handle = service.scheduler().clone();
        Self {
            worker: Arc::new(RunWorker {
                service,
                task_executor,
                processor: DagRunProcessor::new(),
                options,
                handle,
            }),
            rx,
            lanes: HashMap::new(),
            next_generation: 0,
        }
    }

    pub fn handle(&self) -> ScheduleHandle {
        self.worker.handle.clone()
    }

    /// Main loop: recover unfinished runs, then dispatch messages until
    /// shutdown or until every handle is dropped.
    pub async fn run(mut self) -> Result<()> {
        info!(serialization = ?self.worker.options.serialization, "dag run executor started");

        if let Err(e) = self.worker.recover() {
            error!(error = %e, "crash recovery failed");
        }

        while let Some(message) = self.rx.recv().await {
            debug!(?message, "executor received message");

            match message {
                ExecutorMessage::Schedule(id) => self.dispatch(id, LaneMessage::Tick),
                ExecutorMessage::Cancel(id) => self.dispatch(id, LaneMessage::Cancel),
                ExecutorMessage::LaneClosed {
                    dag_run_id,
                    generation,
                } => self.close_lane(dag_run_id, generation),
                ExecutorMessage::Shutdown => {
                    info!("shutdown requested");
                    break;
                }
            }
        }

        // Dropping the senders lets every lane finish its current message
        // and exit.
        self.lanes.clear();
        info!("dag run executor stopped");
        Ok(())
    }

    fn dispatch(&mut self, id: DagRunId, message: LaneMessage) {
        if self.worker.options.serialization == Serialization::Global {
            match message {
                LaneMessage::Tick => self.worker.drive(id),
                LaneMessage::Cancel => self.worker.drive_cancel(id),
            };
            return;
        }

        let message = match self.lanes.get(&id) {
            Some(lane) => match lane.tx.send(message) {
                Ok(()) => return,
                // The lane already exited; start a fresh one below.
                Err(mpsc::error::SendError(message)) => message,
            },
            None => message,
        };

        self.spawn_lane(id, message);
    }

    fn spawn_lane(&mut self, id: DagRunId, first: LaneMessage) {
        self.next_generation += 1;
        let generation = self.next_generation;

        let (tx, rx) = mpsc::unbounded_channel();
        // Receiver is alive, so this cannot fail.
        let _ = tx.send(first);

        debug!(dag_run_id = id, generation, "starting run lane");
        tokio::spawn(run_lane(Arc::clone(&self.worker), id, generation, rx));

        self.lanes.insert(id, Lane { tx, generation });
    }

    fn close_lane(&mut self, id: DagRunId, generation: u64) {
        if self
            .lanes
            .get(&id)
            .is_some_and(|lane| lane.generation == generation)
        {
            debug!(dag_run_id = id, generation, "run lane closed");
            self.lanes.remove(&id);
        }
    }
}

async fn run_lane(
    worker: Arc<RunWorker>,
    id: DagRunId,
    generation: u64,
    mut rx: mpsc::UnboundedReceiver<LaneMessage>,
) {
    while let Some(message) = rx.recv().await {
        let outcome = match message {
            LaneMessage::Tick => worker.drive(id),
            LaneMessage::Cancel => worker.drive_cancel(id),
        };

        if outcome.closes_lane() {
            break;
        }
    }

    worker.handle.lane_closed(id, generation);
}
