// src/dag/mod.rs

//! Workflow model and definition handling.
//!
//! - [`model`] holds the persisted types: dags, tasks and their runs.
//! - [`definition`] is the user-facing, not yet validated form of a dag.
//! - [`validate`] checks definitions and reports problems per field path.
//! - [`graph`] is an adjacency view over task tokens (cycles, ordering).
//! - [`schedule`] is the cron trigger attached to a dag token.

pub mod definition;
pub mod graph;
pub mod model;
pub mod schedule;
pub mod validate;

pub use definition::{CommandDefinition, DagDefinition, TaskDefinition};
pub use graph::DagGraph;
pub use model::{Dag, DagRun, DagRunStatus, Task, TaskRun, TaskRunStatus};
pub use schedule::DagSchedule;
pub use validate::{ValidationErrors, validate_dag};
