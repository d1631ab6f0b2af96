// tests/processor_property.rs
//
// Drives the decision function against an in-memory model of the executor
// for random acyclic dags and random failure scripts.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::Duration;
use proptest::prelude::*;
use taskflow::dag::{Dag, DagRun, DagRunStatus, TaskRun, TaskRunStatus};
use taskflow::executor::{Command, DagRunCommand, DagRunProcessor, TaskRunCommand};
use taskflow::types::{TaskId, TaskRunId};
use taskflow_test_utils::builders::{DagBuilder, DagRunBuilder, base_time};

/// One generated task: dependency indices (all lower), retry budget and how
/// many leading attempts fail.
#[derive(Debug, Clone)]
struct TaskPlan {
    depends: Vec<usize>,
    retry: u32,
    failures: u32,
}

// Acyclic by construction: task i only depends on tasks 0..i.
fn dag_strategy(max_tasks: usize) -> impl Strategy<Value = Vec<TaskPlan>> {
    (1..=max_tasks).prop_flat_map(|num_tasks| {
        proptest::collection::vec(
            (
                proptest::collection::vec(any::<usize>(), 0..4),
                1..4u32,
                0..3u32,
            ),
            num_tasks,
        )
        .prop_map(|raw| {
            raw.into_iter()
                .enumerate()
                .map(|(i, (deps, retry, failures))| {
                    let depends: HashSet<usize> = if i == 0 {
                        HashSet::new()
                    } else {
                        deps.into_iter().map(|d| d % i).collect()
                    };
                    TaskPlan {
                        depends: depends.into_iter().collect(),
                        retry,
                        failures,
                    }
                })
                .collect()
        })
    })
}

fn build_dag(plans: &[TaskPlan]) -> Dag {
    let mut builder = DagBuilder::new("generated");
    for (i, plan) in plans.iter().enumerate() {
        let deps: Vec<String> = plan.depends.iter().map(|d| format!("t{d}")).collect();
        let deps: Vec<&str> = deps.iter().map(String::as_str).collect();
        builder = builder.task_with_retry(&format!("t{i}"), &deps, plan.retry);
    }
    builder.build()
}

/// Owned form of a decision, so the run can be mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Start,
    Execute(TaskRunId),
    Retry(TaskRunId),
    CancelTask(TaskRunId),
    Await,
    Finish(DagRunStatus),
    Complete,
}

impl From<Command<'_>> for Action {
    fn from(command: Command<'_>) -> Self {
        match command {
            Command::Run(DagRunCommand::Start(_)) => Action::Start,
            Command::Run(DagRunCommand::Await(_)) => Action::Await,
            Command::Run(DagRunCommand::Failed(_)) => Action::Finish(DagRunStatus::Failed),
            Command::Run(DagRunCommand::Success(_)) => Action::Finish(DagRunStatus::Success),
            Command::Run(DagRunCommand::Cancel(_)) => Action::Finish(DagRunStatus::Canceled),
            Command::Run(DagRunCommand::Complete(_)) => Action::Complete,
            Command::Task(TaskRunCommand::Execute(tr)) => Action::Execute(tr.id),
            Command::Task(TaskRunCommand::Retry(tr)) => Action::Retry(tr.id),
            Command::Task(TaskRunCommand::Cancel(tr)) => Action::CancelTask(tr.id),
        }
    }
}

/// Minimal stand-in for persistence plus the task executor.
struct Model {
    run: DagRun,
    running: VecDeque<TaskRunId>,
    failures: HashMap<TaskId, u32>,
    clock: i64,
    next_id: TaskRunId,
}

impl Model {
    fn now(&mut self) -> chrono::DateTime<chrono::Utc> {
        self.clock += 1;
        base_time() + Duration::seconds(self.clock)
    }

    fn task_run_mut(&mut self, id: TaskRunId) -> &mut TaskRun {
        self.run
            .task_runs
            .iter_mut()
            .find(|tr| tr.id == id)
            .unwrap_or_else(|| panic!("unknown task run {id}"))
    }

    fn attempts_failed(&self, task_id: TaskId) -> u32 {
        self.run
            .task_runs
            .iter()
            .filter(|tr| tr.task_id == task_id && tr.status == TaskRunStatus::Failed)
            .count() as u32
    }

    /// Let the oldest running task run finish per its failure script.
    fn finish_one(&mut self) -> bool {
        let Some(id) = self.running.pop_front() else {
            return false;
        };
        let task_id = self.task_run_mut(id).task_id;
        let status = if self.attempts_failed(task_id) < self.failures[&task_id] {
            TaskRunStatus::Failed
        } else {
            TaskRunStatus::Success
        };
        let now = self.now();
        let tr = self.task_run_mut(id);
        tr.status = status;
        tr.finish_date = Some(now);
        true
    }
}

fn latest_status(run: &DagRun, task_id: TaskId) -> Option<TaskRunStatus> {
    run.task_runs
        .iter()
        .filter(|tr| tr.task_id == task_id)
        .max_by_key(|tr| tr.id)
        .map(|tr| tr.status)
}

proptest! {
    #[test]
    fn random_dags_always_reach_the_expected_terminal_status(plans in dag_strategy(8)) {
        let dag = build_dag(&plans);
        let run = DagRunBuilder::new(&dag)
            .status(DagRunStatus::Pending)
            .all_pending()
            .build();

        let failures = dag
            .tasks
            .iter()
            .zip(&plans)
            .map(|(task, plan)| (task.id, plan.failures))
            .collect();
        let next_id = run.task_runs.len() as TaskRunId + 1;
        let mut model = Model {
            run,
            running: VecDeque::new(),
            failures,
            clock: 0,
            next_id,
        };

        let processor = DagRunProcessor::new();
        let mut steps = 0;

        loop {
            steps += 1;
            prop_assert!(steps < 1_000, "no terminal status after {} steps", steps);

            let action = Action::from(
                processor
                    .process(&dag, &model.run)
                    .map_err(|e| TestCaseError::fail(e.to_string()))?,
            );

            match action {
                Action::Start => {
                    model.run.status = DagRunStatus::Running;
                    model.run.start_date = Some(model.now());
                }
                Action::Execute(id) => {
                    let task_id = model.task_run_mut(id).task_id;
                    let task = dag.task(task_id).ok_or_else(|| TestCaseError::fail("unknown task"))?;
                    for dep in &task.depends {
                        let dep_id = dag.task_by_token(dep).map(|t| t.id).unwrap_or_default();
                        prop_assert_eq!(latest_status(&model.run, dep_id), Some(TaskRunStatus::Success));
                    }

                    let now = model.now();
                    let tr = model.task_run_mut(id);
                    prop_assert_eq!(tr.status, TaskRunStatus::Pending);
                    tr.status = TaskRunStatus::Running;
                    tr.start_date = Some(now);
                    model.running.push_back(id);
                }
                Action::Await => {
                    prop_assert!(model.finish_one(), "await with nothing running");
                }
                Action::Retry(id) => {
                    let task_id = model.task_run_mut(id).task_id;
                    let new_id = model.next_id;
                    model.next_id += 1;
                    let created = model.now();
                    model.run.task_runs.push(TaskRun {
                        id: new_id,
                        dag_run_id: model.run.id,
                        task_id,
                        created_date: created,
                        start_date: None,
                        finish_date: None,
                        status: TaskRunStatus::Pending,
                        operation_result: None,
                    });
                }
                Action::CancelTask(id) => {
                    model.running.retain(|r| *r != id);
                    let now = model.now();
                    let tr = model.task_run_mut(id);
                    prop_assert!(tr.status.is_unfinished());
                    tr.status = TaskRunStatus::Canceled;
                    tr.finish_date = Some(now);
                }
                Action::Finish(status) => {
                    model.run.status = status;
                    model.run.finish_date = Some(model.now());
                }
                Action::Complete => break,
            }
        }

        let expected = if plans.iter().all(|s| s.failures < s.retry) {
            DagRunStatus::Success
        } else {
            DagRunStatus::Failed
        };
        prop_assert_eq!(model.run.status, expected);
        prop_assert!(model.run.task_runs.iter().all(|tr| !tr.status.is_unfinished()));

        if expected == DagRunStatus::Success {
            for task in &dag.tasks {
                prop_assert_eq!(latest_status(&model.run, task.id), Some(TaskRunStatus::Success));
            }
        }
    }
}
