// src/executor/mod.rs

//! Decision loop and task execution.
//!
//! - [`processor`] is the pure decision function `(Dag, DagRun) -> Command`,
//!   built on the [`state`] index and the [`command`] sum type.
//! - [`dag_run`] is the IO shell: it loads a run, asks the processor what to
//!   do, applies the command through the [`DagService`](crate::service::DagService)
//!   and reschedules.
//! - [`task_run`] runs operations on tokio tasks and reports their outcome.
//!
//! Everything that wants a run looked at sends its id through a
//! [`ScheduleHandle`].

pub mod command;
pub mod dag_run;
pub mod processor;
pub mod state;
pub mod task_run;

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::types::{DagRunId, Serialization};

pub use command::{Command, DagRunCommand, TaskRunCommand};
pub use dag_run::{DagRunExecutor, TickOutcome};
pub use processor::DagRunProcessor;
pub use state::DagRunState;
pub use task_run::TaskRunExecutor;

/// Run executor behaviour, from the `[config]` section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorOptions {
    pub serialization: Serialization,
    /// Reschedule a run this long after a tick failed with an error.
    pub tick_retry: Option<Duration>,
}

/// Messages accepted by the run executor's dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorMessage {
    /// Look at a run again.
    Schedule(DagRunId),
    /// Cancel a run.
    Cancel(DagRunId),
    /// A per-run lane exited.
    LaneClosed { dag_run_id: DagRunId, generation: u64 },
    /// Stop the dispatch loop.
    Shutdown,
}

/// Cheap, clonable sender into the run executor.
///
/// Sends never block and never fail loudly: once the executor has stopped,
/// requests are dropped with a debug log.
#[derive(Debug, Clone)]
pub struct ScheduleHandle {
    tx: mpsc::UnboundedSender<ExecutorMessage>,
}

impl ScheduleHandle {
    pub fn schedule(&self, dag_run_id: DagRunId) {
        self.send(ExecutorMessage::Schedule(dag_run_id));
    }

    pub fn cancel(&self, dag_run_id: DagRunId) {
        self.send(ExecutorMessage::Cancel(dag_run_id));
    }

    pub fn shutdown(&self) {
        self.send(ExecutorMessage::Shutdown);
    }

    pub(crate) fn lane_closed(&self, dag_run_id: DagRunId, generation: u64) {
        self.send(ExecutorMessage::LaneClosed {
            dag_run_id,
            generation,
        });
    }

    fn send(&self, message: ExecutorMessage) {
        if self.tx.send(message).is_err() {
            debug!(?message, "run executor stopped; message dropped");
        }
    }
}

/// Create the channel feeding a [`DagRunExecutor`].
pub fn schedule_channel() -> (ScheduleHandle, mpsc::UnboundedReceiver<ExecutorMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ScheduleHandle { tx }, rx)
}
