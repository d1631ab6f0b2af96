// src/scheduler/expression.rs

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

/// Parsed cron expression.
///
/// Accepts the classic five fields (`min hour day month weekday`) as well as
/// the six or seven field form with leading seconds and optional year.
/// Times are evaluated in UTC.
#[derive(Debug, Clone)]
pub struct CronExpression {
    source: String,
    schedule: Schedule,
}

impl CronExpression {
    pub fn parse(expression: &str) -> Result<Self, String> {
        let source = expression.trim();
        let fields = source.split_whitespace().count();

        let normalized = match fields {
            0 => return Err("empty cron expression".to_string()),
            5 => format!("0 {source}"),
            6 | 7 => source.to_string(),
            n => return Err(format!("expected 5 to 7 fields, got {n}")),
        };

        let schedule = Schedule::from_str(&normalized).map_err(|e| e.to_string())?;
        Ok(Self {
            source: source.to_string(),
            schedule,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// First firing strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }
}

impl FromStr for CronExpression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
