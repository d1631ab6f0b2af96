// src/events.rs

//! Channel-keyed, fire-and-forget publication of run progress.
//!
//! Every persisted transition of a dag run publishes a [`DagRunEvent`] on the
//! run's channel (`dag/run/<id>`). Subscribers get an unbounded receiver; a
//! dropped receiver is pruned on the next publish and never affects other
//! subscribers or the publisher.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::dag::{DagRun, DagRunStatus, TaskRunStatus};
use crate::operation::OperationStatus;
use crate::types::{DagRunId, TaskRunId};

/// Channel on which the events of one dag run are published.
pub fn dag_run_channel(id: DagRunId) -> String {
    format!("dag/run/{id}")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DagRunEvent {
    /// Full snapshot, published when the run is created.
    DagRunUpdated(DagRun),

    DagRunStatusUpdated {
        dag_run_id: DagRunId,
        status: DagRunStatus,
        start_date: Option<DateTime<Utc>>,
        finish_date: Option<DateTime<Utc>>,
    },

    TaskRunStatusUpdated {
        dag_run_id: DagRunId,
        task_run_id: TaskRunId,
        status: TaskRunStatus,
        start_date: Option<DateTime<Utc>>,
        finish_date: Option<DateTime<Utc>>,
        operation_status: Option<OperationStatus>,
    },

    /// One line of operation output, in production order.
    TaskRunNewOutputLine {
        dag_run_id: DagRunId,
        task_run_id: TaskRunId,
        line: String,
    },
}

impl DagRunEvent {
    pub fn dag_run_id(&self) -> DagRunId {
        match self {
            DagRunEvent::DagRunUpdated(run) => run.id,
            DagRunEvent::DagRunStatusUpdated { dag_run_id, .. }
            | DagRunEvent::TaskRunStatusUpdated { dag_run_id, .. }
            | DagRunEvent::TaskRunNewOutputLine { dag_run_id, .. } => *dag_run_id,
        }
    }
}

impl fmt::Display for DagRunEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DagRunEvent::DagRunUpdated(run) => write!(
                f,
                "dag run {} {} ({} task runs)",
                run.id,
                run.status,
                run.task_runs.len()
            ),
            DagRunEvent::DagRunStatusUpdated {
                dag_run_id, status, ..
            } => write!(f, "dag run {dag_run_id} {status}"),
            DagRunEvent::TaskRunStatusUpdated {
                task_run_id,
                status,
                operation_status,
                ..
            } => match operation_status {
                Some(op) => write!(f, "task run {task_run_id} {status} (operation {op})"),
                None => write!(f, "task run {task_run_id} {status}"),
            },
            DagRunEvent::TaskRunNewOutputLine {
                task_run_id, line, ..
            } => write!(f, "[task run {task_run_id}] {line}"),
        }
    }
}

#[derive(Debug, Default)]
pub struct EventBus {
    channels: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<DagRunEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every event published on `channel` from now on, until the
    /// channel is removed.
    pub fn subscribe(&self, channel: &str) -> mpsc::UnboundedReceiver<DagRunEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        match self.channels.lock() {
            Ok(mut channels) => channels.entry(channel.to_string()).or_default().push(tx),
            // The sender is dropped, so the receiver reports a closed channel.
            Err(_) => warn!(channel, "event bus lock poisoned; subscription dropped"),
        }
        rx
    }

    pub fn publish(&self, channel: &str, event: DagRunEvent) {
        let Ok(mut channels) = self.channels.lock() else {
            warn!(channel, "event bus lock poisoned; event dropped");
            return;
        };

        if let Some(subscribers) = channels.get_mut(channel) {
            subscribers.retain(|tx| {
                let delivered = tx.send(event.clone()).is_ok();
                if !delivered {
                    debug!(channel, "pruning closed subscriber");
                }
                delivered
            });
        }
    }

    /// Drop the channel; every subscriber's stream ends.
    pub fn remove(&self, channel: &str) {
        if let Ok(mut channels) = self.channels.lock() {
            if channels.remove(channel).is_some() {
                debug!(channel, "removed event channel");
            }
        }
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .map(|channels| channels.get(channel).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}
