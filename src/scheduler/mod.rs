// src/scheduler/mod.rs

//! Cron-based triggering of dag runs.
//!
//! Every enabled [`DagSchedule`] gets a timer task. When it fires, a new run
//! of the latest version of the token is created, unless that version still
//! has a PENDING or RUNNING run, and the timer is armed for the next firing.

pub mod expression;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dag::{DagRun, DagSchedule, ValidationErrors};
use crate::errors::{Result, TaskflowError};
use crate::persistence::DagSchedulePersistence;
use crate::service::DagService;

pub use expression::CronExpression;

/// Check a schedule before it is stored.
pub fn validate_schedule(schedule: &DagSchedule) -> ValidationErrors {
    let mut errors = ValidationErrors::new();

    if schedule.token.trim().is_empty() {
        errors.add("token", "required");
    }

    match schedule.cron_expression.as_deref().map(str::trim) {
        None | Some("") => errors.add("cron_expression", "required"),
        Some(expression) => {
            if let Err(e) = CronExpression::parse(expression) {
                errors.add("cron_expression", format!("invalid format: {e}"));
            }
        }
    }

    if errors.is_empty() {
        debug!(dag = %schedule.token, "dag schedule is valid");
    } else {
        warn!(dag = %schedule.token, errors = errors.len(), "dag schedule is invalid");
    }
    errors
}

struct Inner {
    service: Arc<DagService>,
    schedules: Arc<dyn DagSchedulePersistence>,
    /// token -> cancellation of its armed timer.
    timers: Mutex<HashMap<String, CancellationToken>>,
}

impl Inner {
    fn timers(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.timers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Keeps one timer per enabled schedule. Clones share the same timers.
#[derive(Clone)]
pub struct DagScheduler {
    inner: Arc<Inner>,
}

impl fmt::Debug for DagScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DagScheduler")
            .field("armed", &self.armed())
            .finish_non_exhaustive()
    }
}

impl DagScheduler {
    pub fn new(service: Arc<DagService>, schedules: Arc<dyn DagSchedulePersistence>) -> Self {
        Self {
            inner: Arc::new(Inner {
                service,
                schedules,
                timers: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn validate(&self, schedule: &DagSchedule) -> ValidationErrors {
        validate_schedule(schedule)
    }

    pub fn find_dag_schedules(&self) -> Result<Vec<DagSchedule>> {
        self.inner.schedules.find_dag_schedules()
    }

    pub fn find_dag_schedule(&self, token: &str) -> Result<Option<DagSchedule>> {
        self.inner.schedules.find_dag_schedule(token)
    }

    /// Validate and store a schedule, then re-arm the timers.
    ///
    /// `Ok(false)` when the token has no schedule, i.e. no dag.
    pub fn update(&self, schedule: &DagSchedule) -> Result<bool> {
        info!(dag = %schedule.token, enabled = schedule.enabled, cron = ?schedule.cron_expression, "update dag schedule");

        let errors = self.validate(schedule);
        if !errors.is_empty() {
            return Err(TaskflowError::InvalidSchedule(errors));
        }

        let updated = self.inner.schedules.update_dag_schedule(schedule)?;
        if updated {
            self.start()?;
        }
        Ok(updated)
    }

    pub fn enable(&self, token: &str) -> Result<bool> {
        info!(dag = token, "enable dag schedule");
        let updated = self.inner.schedules.mark_dag_schedule_enabled(token)?;
        if updated {
            self.start()?;
        }
        Ok(updated)
    }

    pub fn disable(&self, token: &str) -> Result<bool> {
        info!(dag = token, "disable dag schedule");
        let updated = self.inner.schedules.mark_dag_schedule_disabled(token)?;
        if updated {
            self.start()?;
        }
        Ok(updated)
    }

    /// Cancel every timer and arm one per enabled schedule.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let enabled = self.inner.schedules.find_enabled_dag_schedules()?;
        self.stop();

        for schedule in &enabled {
            self.arm(schedule);
        }
        debug!(armed = self.armed().len(), "dag schedules armed");
        Ok(())
    }

    /// Cancel every timer.
    pub fn stop(&self) {
        for (token, cancel) in self.inner.timers().drain() {
            debug!(dag = %token, "cancel dag schedule timer");
            cancel.cancel();
        }
    }

    /// Tokens with an armed timer, sorted.
    pub fn armed(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self.inner.timers().keys().cloned().collect();
        tokens.sort();
        tokens
    }

    /// Create a run of the latest version of `token` unless one is still
    /// unfinished. Returns the created run.
    pub fn trigger(&self, token: &str) -> Result<Option<DagRun>> {
        trigger(&self.inner.service, token)
    }

    fn arm(&self, schedule: &DagSchedule) {
        let Some(raw) = schedule.cron_expression.as_deref() else {
            warn!(dag = %schedule.token, "enabled dag schedule has no cron expression");
            return;
        };
        let expression = match CronExpression::parse(raw) {
            Ok(expression) => expression,
            Err(e) => {
                warn!(dag = %schedule.token, cron = raw, error = %e, "invalid cron expression; not scheduled");
                return;
            }
        };

        let cancel = CancellationToken::new();
        if let Some(previous) = self
            .inner
            .timers()
            .insert(schedule.token.clone(), cancel.clone())
        {
            previous.cancel();
        }

        tokio::spawn(run_timer(
            Arc::clone(&self.inner.service),
            schedule.token.clone(),
            expression,
            cancel,
        ));
    }
}

async fn run_timer(
    service: Arc<DagService>,
    token: String,
    expression: CronExpression,
    cancel: CancellationToken,
) {
    let mut after = Utc::now();
    loop {
        let Some(next) = expression.next_after(after) else {
            warn!(dag = %token, cron = %expression, "cron expression has no upcoming time");
            return;
        };
        let delay = (next - Utc::now()).to_std().unwrap_or_default();
        debug!(dag = %token, %next, ?delay, "dag run scheduled");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(dag = %token, "dag schedule timer stopped");
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        if let Err(e) = trigger(&service, &token) {
            warn!(dag = %token, error = %e, "error scheduling dag run");
        }

        // A timer that wakes early must not fire the same slot twice; one
        // that wakes late skips the slots it missed.
        after = next.max(Utc::now());
    }
}

fn trigger(service: &DagService, token: &str) -> Result<Option<DagRun>> {
    let Some(dag) = service.find_dag_by_token(token)? else {
        warn!(dag = token, "scheduled dag not found");
        return Ok(None);
    };

    if !service.find_pending_dag_runs_by_dag(dag.id)?.is_empty() {
        info!(dag = token, version = dag.version, "pending dag run exists; skipping");
        return Ok(None);
    }

    let dag_run = service.create_dag_run(&dag)?;
    info!(dag = token, version = dag.version, dag_run_id = dag_run.id, "scheduled dag run created");
    Ok(Some(dag_run))
}
