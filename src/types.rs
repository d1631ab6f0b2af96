// src/types.rs

use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

pub type DagId = u64;
pub type TaskId = u64;
pub type DagRunId = u64;
pub type TaskRunId = u64;

/// How decisions of different dag runs are serialized.
///
/// - `PerRun`: each dag run gets its own sequential lane; unrelated runs are
///   processed concurrently (default).
/// - `Global`: every decision of every run goes through one sequential loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Serialization {
    #[default]
    PerRun,
    Global,
}

impl FromStr for Serialization {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "per_run" => Ok(Serialization::PerRun),
            "global" => Ok(Serialization::Global),
            other => Err(format!(
                "invalid serialization: {other} (expected \"per_run\" or \"global\")"
            )),
        }
    }
}

/// Parse a simple duration string like `"3s"`, `"250ms"`, `"1m"`, `"2h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the boundary between digits and suffix.
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    let secs = |factor: u64| {
        value
            .checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration out of range: {s}"))
    };

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => secs(60),
        "h" => secs(60 * 60),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}
