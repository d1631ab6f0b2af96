use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use taskflow::errors::Result;
use taskflow::notification::{Notification, Notifier};
use taskflow::operation::{
    BoxFuture, Operation, OperationCommand, OperationContext, OperationError, OperationResult,
    SchemaField,
};
use tracing::debug;

/// Id the fake operation registers under.
pub const FAKE_OPERATION: &str = "fake";

/// Config key identifying which task invoked the fake operation.
pub const FAKE_LABEL: &str = "label";

/// What one invocation of the fake operation does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeOutcome {
    Success,
    Failed,
    /// Return a non-cancellation error.
    Error(String),
    /// Wait until cancelled, then report cancellation.
    BlockUntilCanceled,
    Panic,
}

#[derive(Default)]
struct Shared {
    scripts: HashMap<String, VecDeque<FakeOutcome>>,
    calls: Vec<String>,
    canceled: HashSet<String>,
}

/// Operation whose behaviour is scripted per label.
///
/// - each invocation pops the next scripted outcome for its label, falling
///   back to [`FakeOutcome::Success`];
/// - every invocation is recorded, in order, and emits one output line.
#[derive(Clone, Default)]
pub struct FakeOperation {
    shared: Arc<Mutex<Shared>>,
    reference: toml::Table,
}

impl FakeOperation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outcomes for successive invocations of the task labelled `label`.
    pub fn script(self, label: &str, outcomes: impl IntoIterator<Item = FakeOutcome>) -> Self {
        self.shared
            .lock()
            .unwrap()
            .scripts
            .entry(label.to_string())
            .or_default()
            .extend(outcomes);
        self
    }

    /// Labels in invocation order.
    pub fn calls(&self) -> Vec<String> {
        self.shared.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self, label: &str) -> usize {
        self.calls().iter().filter(|c| *c == label).count()
    }

    /// Labels whose invocation observed cancellation.
    pub fn canceled(&self) -> HashSet<String> {
        self.shared.lock().unwrap().canceled.clone()
    }

    fn next_outcome(&self, label: &str) -> FakeOutcome {
        let mut shared = self.shared.lock().unwrap();
        shared.calls.push(label.to_string());
        shared
            .scripts
            .get_mut(label)
            .and_then(VecDeque::pop_front)
            .unwrap_or(FakeOutcome::Success)
    }
}

impl Operation for FakeOperation {
    fn id(&self) -> &str {
        FAKE_OPERATION
    }

    fn reference(&self) -> &toml::Table {
        &self.reference
    }

    fn schema(&self) -> &[SchemaField] {
        &[]
    }

    fn run<'a>(
        &'a self,
        command: &'a OperationCommand,
        context: OperationContext,
    ) -> BoxFuture<'a, std::result::Result<OperationResult, OperationError>> {
        Box::pin(async move {
            let label = command
                .config
                .get(FAKE_LABEL)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();

            let outcome = self.next_outcome(&label);
            debug!(%label, ?outcome, "fake operation invoked");

            context.emit_line(&format!("{label} started"));

            match outcome {
                FakeOutcome::Success => Ok(OperationResult::success(format!("{label} ok"))),
                FakeOutcome::Failed => Ok(OperationResult::failed(format!("{label} failed"))),
                FakeOutcome::Error(message) => {
                    Err(OperationError::Config(message))
                }
                FakeOutcome::BlockUntilCanceled => {
                    context.cancelled().await;
                    self.shared.lock().unwrap().canceled.insert(label);
                    Err(OperationError::Canceled)
                }
                FakeOutcome::Panic => panic!("fake operation panic for {label}"),
            }
        })
    }
}

/// Notifier that keeps every notification it receives.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    received: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subjects(&self) -> Vec<String> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.subject.clone())
            .collect()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.received.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) -> Result<()> {
        self.received.lock().unwrap().push(notification.clone());
        Ok(())
    }
}
