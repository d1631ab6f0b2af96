// src/runtime.rs

//! Composition root: wires persistence, operations, events, notifications,
//! the dag service, both executors and the cron scheduler together.

use std::fmt;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::{Result, TaskflowError};
use crate::events::EventBus;
use crate::executor::{
    DagRunExecutor, ExecutorOptions, ScheduleHandle, TaskRunExecutor, schedule_channel,
};
use crate::notification::{DagRunNotificationService, LogNotifier, Notifier};
use crate::operation::OperationRegistry;
use crate::persistence::{
    DagPersistence, DagRunPersistence, DagSchedulePersistence, InMemoryPersistence,
};
use crate::scheduler::DagScheduler;
use crate::service::DagService;

pub struct RuntimeBuilder {
    operations: OperationRegistry,
    options: ExecutorOptions,
    notifiers: Vec<Arc<dyn Notifier>>,
    dags: Option<Arc<dyn DagPersistence>>,
    runs: Option<Arc<dyn DagRunPersistence>>,
    schedules: Option<Arc<dyn DagSchedulePersistence>>,
}

impl RuntimeBuilder {
    pub fn options(mut self, options: ExecutorOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the default log notifier. May be called repeatedly.
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    /// Use one store for dags, runs and schedules, e.g. one left behind by a
    /// previous runtime.
    pub fn persistence<P>(mut self, persistence: Arc<P>) -> Self
    where
        P: DagPersistence + DagRunPersistence + DagSchedulePersistence + 'static,
    {
        self.dags = Some(persistence.clone() as Arc<dyn DagPersistence>);
        self.runs = Some(persistence.clone() as Arc<dyn DagRunPersistence>);
        self.schedules = Some(persistence as Arc<dyn DagSchedulePersistence>);
        self
    }

    pub fn dag_persistence(mut self, dags: Arc<dyn DagPersistence>) -> Self {
        self.dags = Some(dags);
        self
    }

    pub fn dag_run_persistence(mut self, runs: Arc<dyn DagRunPersistence>) -> Self {
        self.runs = Some(runs);
        self
    }

    pub fn schedule_persistence(mut self, schedules: Arc<dyn DagSchedulePersistence>) -> Self {
        self.schedules = Some(schedules);
        self
    }

    /// Build everything without starting the run executor, so callers can
    /// create runs and subscribe to their events first.
    ///
    /// Stores that were not provided share one [`InMemoryPersistence`].
    pub fn build(self) -> Runtime {
        let fallback = Arc::new(InMemoryPersistence::new());
        let dags = self
            .dags
            .unwrap_or_else(|| fallback.clone() as Arc<dyn DagPersistence>);
        let runs = self
            .runs
            .unwrap_or_else(|| fallback.clone() as Arc<dyn DagRunPersistence>);
        let schedules = self
            .schedules
            .unwrap_or_else(|| fallback as Arc<dyn DagSchedulePersistence>);

        let notifiers = if self.notifiers.is_empty() {
            vec![Arc::new(LogNotifier) as Arc<dyn Notifier>]
        } else {
            self.notifiers
        };

        let (handle, rx) = schedule_channel();
        let service = Arc::new(DagService::new(
            dags,
            runs,
            Arc::new(self.operations),
            DagRunNotificationService::new(notifiers),
            Arc::new(EventBus::new()),
            handle.clone(),
        ));

        let task_executor = TaskRunExecutor::new(Arc::clone(&service));
        let executor = DagRunExecutor::new(
            Arc::clone(&service),
            task_executor.clone(),
            self.options,
            rx,
        );

        let scheduler = DagScheduler::new(Arc::clone(&service), schedules);

        Runtime {
            service,
            scheduler,
            task_executor,
            handle,
            executor: Some(executor),
            join: None,
        }
    }
}

/// A running (or ready to run) engine instance.
pub struct Runtime {
    service: Arc<DagService>,
    scheduler: DagScheduler,
    task_executor: TaskRunExecutor,
    handle: ScheduleHandle,
    executor: Option<DagRunExecutor>,
    join: Option<JoinHandle<Result<()>>>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("service", &self.service)
            .field("scheduler", &self.scheduler)
            .field("task_executor", &self.task_executor)
            .field("started", &self.join.is_some())
            .finish_non_exhaustive()
    }
}

impl Runtime {
    pub fn builder(operations: OperationRegistry) -> RuntimeBuilder {
        RuntimeBuilder {
            operations,
            options: ExecutorOptions::default(),
            notifiers: Vec::new(),
            dags: None,
            runs: None,
            schedules: None,
        }
    }

    pub fn service(&self) -> &Arc<DagService> {
        &self.service
    }

    pub fn scheduler(&self) -> &DagScheduler {
        &self.scheduler
    }

    pub fn task_executor(&self) -> &TaskRunExecutor {
        &self.task_executor
    }

    pub fn handle(&self) -> ScheduleHandle {
        self.handle.clone()
    }

    /// Spawn the run executor loop and arm the enabled dag schedules. Must be
    /// called inside a tokio runtime; later calls are no-ops.
    pub fn start(&mut self) {
        let Some(executor) = self.executor.take() else {
            debug!("runtime already started");
            return;
        };
        info!("starting runtime");
        self.join = Some(tokio::spawn(executor.run()));

        if let Err(e) = self.scheduler.start() {
            warn!(error = %e, "failed to arm dag schedules");
        }
    }

    /// Stop the schedule timers and the run executor loop, and wait for the
    /// loop to exit.
    pub async fn shutdown(self) -> Result<()> {
        self.scheduler.stop();
        self.handle.shutdown();

        match self.join {
            Some(join) => join
                .await
                .map_err(|e| TaskflowError::Other(anyhow::anyhow!("executor task failed: {e}")))?,
            None => {
                warn!("runtime shut down before it was started");
                Ok(())
            }
        }
    }
}
