// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::dag::ValidationErrors;
use crate::types::{DagId, DagRunId, TaskRunId};

#[derive(Error, Debug)]
pub enum TaskflowError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid DAG:\n{0}")]
    InvalidDag(ValidationErrors),

    #[error("Invalid dag schedule:\n{0}")]
    InvalidSchedule(ValidationErrors),

    #[error("Dag not found: {0}")]
    DagNotFound(DagId),

    #[error("Dag token already exists: {0}")]
    DagAlreadyExists(String),

    #[error("Unknown dag token: {0}")]
    UnknownDagToken(String),

    #[error("Dag run not found: {0}")]
    DagRunNotFound(DagRunId),

    #[error("Task run not found: {0}")]
    TaskRunNotFound(TaskRunId),

    /// Persisted run state breaks an invariant the scheduler relies on.
    #[error("Invalid dag run state: {0}")]
    InvalidRunState(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, TaskflowError>;
