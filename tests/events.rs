// tests/events.rs

use std::error::Error;
use std::sync::Arc;

use taskflow::dag::{DagRunStatus, TaskRunStatus};
use taskflow::errors::{Result as TaskflowResult, TaskflowError};
use taskflow::events::{DagRunEvent, EventBus, dag_run_channel};
use taskflow::notification::{DagRunNotificationService, Notification, Notifier};
use taskflow::operation::OperationResult;
use taskflow_test_utils::RecordingNotifier;
use taskflow_test_utils::builders::{DagBuilder, DagRunBuilder};

type TestResult = std::result::Result<(), Box<dyn Error>>;

fn status_event(id: u64, status: DagRunStatus) -> DagRunEvent {
    DagRunEvent::DagRunStatusUpdated {
        dag_run_id: id,
        status,
        start_date: None,
        finish_date: None,
    }
}

#[test]
fn channel_names_are_per_run() {
    assert_eq!(dag_run_channel(7), "dag/run/7");
    assert_ne!(dag_run_channel(1), dag_run_channel(11));
}

#[tokio::test]
async fn every_subscriber_gets_events_in_publish_order() -> TestResult {
    let bus = EventBus::new();
    let channel = dag_run_channel(1);
    let mut first = bus.subscribe(&channel);
    let mut second = bus.subscribe(&channel);
    let mut other = bus.subscribe(&dag_run_channel(2));

    bus.publish(&channel, status_event(1, DagRunStatus::Running));
    bus.publish(
        &channel,
        DagRunEvent::TaskRunNewOutputLine {
            dag_run_id: 1,
            task_run_id: 3,
            line: "hello".to_string(),
        },
    );

    for rx in [&mut first, &mut second] {
        assert_eq!(rx.recv().await, Some(status_event(1, DagRunStatus::Running)));
        let line = rx.recv().await.ok_or("missing output line")?;
        assert_eq!(line.to_string(), "[task run 3] hello");
    }
    assert!(other.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn dropped_subscribers_are_pruned_without_affecting_others() {
    let bus = EventBus::new();
    let channel = dag_run_channel(1);
    let dropped = bus.subscribe(&channel);
    let mut kept = bus.subscribe(&channel);
    assert_eq!(bus.subscriber_count(&channel), 2);

    drop(dropped);
    bus.publish(&channel, status_event(1, DagRunStatus::Running));

    assert_eq!(bus.subscriber_count(&channel), 1);
    assert_eq!(kept.recv().await, Some(status_event(1, DagRunStatus::Running)));
}

#[tokio::test]
async fn removing_a_channel_ends_its_streams() {
    let bus = EventBus::new();
    let channel = dag_run_channel(4);
    let mut rx = bus.subscribe(&channel);

    bus.publish(&channel, status_event(4, DagRunStatus::Success));
    bus.remove(&channel);
    // Published after removal: nobody is listening any more.
    bus.publish(&channel, status_event(4, DagRunStatus::Failed));

    assert_eq!(rx.recv().await, Some(status_event(4, DagRunStatus::Success)));
    assert_eq!(rx.recv().await, None);
    assert_eq!(bus.subscriber_count(&channel), 0);
}

#[test]
fn publishing_without_subscribers_is_a_no_op() {
    let bus = EventBus::new();
    bus.publish(&dag_run_channel(9), status_event(9, DagRunStatus::Running));
    assert_eq!(bus.subscriber_count(&dag_run_channel(9)), 0);
}

#[test]
fn events_serialize_with_a_type_tag() -> TestResult {
    let event = DagRunEvent::TaskRunStatusUpdated {
        dag_run_id: 1,
        task_run_id: 2,
        status: TaskRunStatus::Failed,
        start_date: None,
        finish_date: None,
        operation_status: None,
    };

    let rendered = toml::to_string(&event)?;
    assert!(rendered.contains("type = \"task_run_status_updated\""), "{rendered}");
    assert!(rendered.contains("status = \"FAILED\""), "{rendered}");
    assert_eq!(event.dag_run_id(), 1);
    assert_eq!(event.to_string(), "task run 2 FAILED");
    Ok(())
}

struct BrokenNotifier;

impl Notifier for BrokenNotifier {
    fn notify(&self, _notification: &Notification) -> TaskflowResult<()> {
        Err(TaskflowError::ConfigError("smtp unreachable".to_string()))
    }
}

#[test]
fn task_failure_notification_renders_run_details() {
    let dag = DagBuilder::new("nightly").task("extract", &[]).task("load", &["extract"]).build();
    let run = DagRunBuilder::new(&dag)
        .task_run("extract", TaskRunStatus::Failed)
        .task_run("load", TaskRunStatus::Pending)
        .build();

    let recorder = RecordingNotifier::new();
    let service = DagRunNotificationService::new(vec![
        Arc::new(BrokenNotifier),
        Arc::new(recorder.clone()),
    ]);

    let result = OperationResult::failed("connection refused");
    service.send_task_failed(&dag, &run, &run.task_runs[0], &result);

    // The failing notifier does not stop delivery to the next one.
    let received = recorder.notifications();
    assert_eq!(received.len(), 1);

    let notification = &received[0];
    assert_eq!(notification.subject, "Dag run 1: task run 1 failed");
    for needle in [
        "Operation result:",
        "status: FAILED",
        "connection refused",
        "Task run:",
        "task: extract:1",
        "Dag run:",
        "dag: nightly:1",
        "status: RUNNING",
    ] {
        assert!(notification.body.contains(needle), "missing {needle:?} in\n{}", notification.body);
    }
}

#[test]
fn dag_summary_lists_every_task_run() {
    let dag = DagBuilder::new("nightly").task("extract", &[]).task("load", &["extract"]).build();
    let run = DagRunBuilder::new(&dag)
        .status(DagRunStatus::Success)
        .task_run("extract", TaskRunStatus::Success)
        .task_run("load", TaskRunStatus::Success)
        .build();

    let recorder = RecordingNotifier::new();
    let service = DagRunNotificationService::new(vec![Arc::new(recorder.clone())]);

    service.send_dag_success(&dag, &run);
    service.send_dag_failed(&dag, &run);
    service.send_dag_canceled(&dag, &run);

    assert_eq!(
        recorder.subjects(),
        vec!["Dag run 1 success", "Dag run 1 failed", "Dag run 1 canceled"]
    );

    let body = &recorder.notifications()[0].body;
    assert_eq!(body.matches("Task run:").count(), 2);
    assert!(body.contains("task: load:1"));
    assert!(!body.contains("finished: -\nstatus: SUCCESS"));
}
