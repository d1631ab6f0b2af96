// src/executor/command.rs

//! The single next action for a dag run, as decided by
//! [`DagRunProcessor`](super::DagRunProcessor).
//!
//! Commands borrow the record they apply to; the run executor interprets them
//! with an exhaustive match.

use std::fmt;

use crate::dag::{DagRun, TaskRun};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command<'a> {
    Run(DagRunCommand<'a>),
    Task(TaskRunCommand<'a>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DagRunCommand<'a> {
    /// PENDING run: move it to RUNNING.
    Start(&'a DagRun),
    /// Tasks are in flight; nothing to do until one of them finishes.
    Await(&'a DagRun),
    Failed(&'a DagRun),
    Success(&'a DagRun),
    Cancel(&'a DagRun),
    /// The run is terminal; nothing left to do, ever.
    Complete(&'a DagRun),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TaskRunCommand<'a> {
    Execute(&'a TaskRun),
    Retry(&'a TaskRun),
    Cancel(&'a TaskRun),
}

impl<'a> Command<'a> {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Run(DagRunCommand::Start(_)) => "StartDagRun",
            Command::Run(DagRunCommand::Await(_)) => "Await",
            Command::Run(DagRunCommand::Failed(_)) => "FailedDagRun",
            Command::Run(DagRunCommand::Success(_)) => "SuccessDagRun",
            Command::Run(DagRunCommand::Cancel(_)) => "CancelDagRun",
            Command::Run(DagRunCommand::Complete(_)) => "CompleteDagRun",
            Command::Task(TaskRunCommand::Execute(_)) => "ExecuteTaskRun",
            Command::Task(TaskRunCommand::Retry(_)) => "RetryTaskRun",
            Command::Task(TaskRunCommand::Cancel(_)) => "CancelTaskRun",
        }
    }

    /// Task run the command targets, if it is a task-level command.
    pub fn task_run(&self) -> Option<&'a TaskRun> {
        match *self {
            Command::Task(
                TaskRunCommand::Execute(t) | TaskRunCommand::Retry(t) | TaskRunCommand::Cancel(t),
            ) => Some(t),
            Command::Run(_) => None,
        }
    }
}

impl fmt::Display for Command<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.task_run() {
            Some(task_run) => write!(f, "{}({})", self.name(), task_run.id),
            None => f.write_str(self.name()),
        }
    }
}
