// src/notification.rs

//! Human-readable notifications about finished runs and failed tasks.

use std::fmt::{self, Write as _};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::dag::{Dag, DagRun, TaskRun};
use crate::errors::Result;
use crate::operation::OperationResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub body: String,
}

/// A delivery channel for notifications (log, mail, chat, ...).
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) -> Result<()> {
        info!(subject = %notification.subject, "notification\n{}", notification.body);
        Ok(())
    }
}

/// Renders run summaries and hands them to every configured notifier.
///
/// A notifier that fails is logged and skipped; the others still run.
#[derive(Clone)]
pub struct DagRunNotificationService {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl fmt::Debug for DagRunNotificationService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DagRunNotificationService")
            .field("notifiers", &self.notifiers.len())
            .finish()
    }
}

impl Default for DagRunNotificationService {
    fn default() -> Self {
        Self::new(vec![Arc::new(LogNotifier)])
    }
}

impl DagRunNotificationService {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    pub fn send_task_failed(
        &self,
        dag: &Dag,
        dag_run: &DagRun,
        task_run: &TaskRun,
        result: &OperationResult,
    ) {
        let mut body = String::new();
        render_operation_result(&mut body, result);
        render_task_run(&mut body, dag, task_run);
        render_dag_run(&mut body, dag, dag_run);

        self.send(Notification {
            subject: format!("Dag run {}: task run {} failed", dag_run.id, task_run.id),
            body,
        });
    }

    pub fn send_dag_failed(&self, dag: &Dag, dag_run: &DagRun) {
        self.send_dag_summary(dag, dag_run, "failed");
    }

    pub fn send_dag_canceled(&self, dag: &Dag, dag_run: &DagRun) {
        self.send_dag_summary(dag, dag_run, "canceled");
    }

    pub fn send_dag_success(&self, dag: &Dag, dag_run: &DagRun) {
        self.send_dag_summary(dag, dag_run, "success");
    }

    fn send_dag_summary(&self, dag: &Dag, dag_run: &DagRun, outcome: &str) {
        let mut body = String::new();
        render_dag_run(&mut body, dag, dag_run);
        for task_run in &dag_run.task_runs {
            body.push('\n');
            render_task_run(&mut body, dag, task_run);
        }

        self.send(Notification {
            subject: format!("Dag run {} {outcome}", dag_run.id),
            body,
        });
    }

    fn send(&self, notification: Notification) {
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(&notification) {
                warn!(subject = %notification.subject, error = %e, "notifier failed");
            }
        }
    }
}

fn date(value: Option<DateTime<Utc>>) -> String {
    value.map_or_else(|| "-".to_string(), |d| d.to_rfc3339())
}

// Writing into a String cannot fail.
fn render_dag_run(out: &mut String, dag: &Dag, dag_run: &DagRun) {
    let _ = writeln!(out, "Dag run:");
    let _ = writeln!(out, "id: {}", dag_run.id);
    let _ = writeln!(out, "dag: {}:{}", dag.token, dag.version);
    let _ = writeln!(out, "created: {}", dag_run.created_date.to_rfc3339());
    let _ = writeln!(out, "started: {}", date(dag_run.start_date));
    let _ = writeln!(out, "finished: {}", date(dag_run.finish_date));
    let _ = writeln!(out, "status: {}", dag_run.status);
}

fn render_task_run(out: &mut String, dag: &Dag, task_run: &TaskRun) {
    let task = dag
        .task(task_run.task_id)
        .map(|t| format!("{}:{}", t.token, t.version))
        .unwrap_or_else(|| format!("#{}", task_run.task_id));

    let _ = writeln!(out, "Task run:");
    let _ = writeln!(out, "id: {}", task_run.id);
    let _ = writeln!(out, "task: {task}");
    let _ = writeln!(out, "created: {}", task_run.created_date.to_rfc3339());
    let _ = writeln!(out, "started: {}", date(task_run.start_date));
    let _ = writeln!(out, "finished: {}", date(task_run.finish_date));
    let _ = writeln!(out, "status: {}", task_run.status);
}

fn render_operation_result(out: &mut String, result: &OperationResult) {
    let _ = writeln!(out, "Operation result:");
    let _ = writeln!(out, "status: {}", result.status);
    if !result.stdout.is_empty() {
        let _ = writeln!(out, "stdout:\n{}", result.stdout.trim_end());
    }
    if !result.stderr.is_empty() {
        let _ = writeln!(out, "stderr:\n{}", result.stderr.trim_end());
    }
    out.push('\n');
}
