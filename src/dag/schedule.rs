// src/dag/schedule.rs

use serde::{Deserialize, Serialize};

/// Cron trigger for the latest version of a dag token.
///
/// Every persisted token gets a disabled schedule without an expression;
/// enabling it only has an effect once an expression is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagSchedule {
    pub token: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub cron_expression: Option<String>,
}

impl DagSchedule {
    pub fn new(token: impl Into<String>, enabled: bool, cron_expression: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            enabled,
            cron_expression: Some(cron_expression.into()),
        }
    }

    /// Placeholder stored alongside a newly created dag.
    pub fn disabled(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            enabled: false,
            cron_expression: None,
        }
    }
}
