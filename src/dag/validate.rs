// src/dag/validate.rs

use std::collections::HashSet;
use std::fmt;

use tracing::{debug, warn};

use super::definition::{DagDefinition, TaskDefinition};
use super::graph::DagGraph;
use crate::operation::{FieldKind, OperationRegistry};
use crate::types::parse_duration;

/// Validation problems keyed by the path of the offending field
/// (`token`, `tasks`, `tasks[2].depends[0]`, `tasks[1].command.config.script`).
///
/// Entries keep the order in which they were found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: Vec<(String, String)>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push((path.into(), message.into()));
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.errors.iter().map(|(p, m)| (p.as_str(), m.as_str()))
    }

    /// Messages recorded for one path.
    pub fn messages_for<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.iter()
            .filter(move |(p, _)| *p == path)
            .map(|(_, m)| m)
    }

    /// True if `path` has a message starting with `prefix`.
    pub fn contains(&self, path: &str, prefix: &str) -> bool {
        self.messages_for(path).any(|m| m.starts_with(prefix))
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (path, message)) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{path}: {message}")?;
        }
        Ok(())
    }
}

/// Check a candidate definition and collect every problem found.
///
/// An empty result means the definition can be turned into a [`Dag`](super::Dag).
pub fn validate_dag(def: &DagDefinition, operations: &OperationRegistry) -> ValidationErrors {
    let mut errors = ValidationErrors::new();

    if is_blank(def.token.as_deref()) {
        errors.add("token", "required");
    }

    if def.tasks.is_empty() {
        errors.add("tasks", "required");
    } else {
        validate_unique_tokens(def, &mut errors);
        validate_acyclic(def, &mut errors);

        let tokens: HashSet<&str> = def
            .tasks
            .iter()
            .filter_map(|t| t.token.as_deref())
            .collect();

        for (i, task) in def.tasks.iter().enumerate() {
            validate_task(&format!("tasks[{i}]"), task, &tokens, operations, &mut errors);
        }
    }

    if errors.is_empty() {
        debug!(dag = ?def.token, tasks = def.tasks.len(), "dag definition is valid");
    } else {
        warn!(dag = ?def.token, errors = errors.len(), "dag definition is invalid");
    }

    errors
}

fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

fn validate_unique_tokens(def: &DagDefinition, errors: &mut ValidationErrors) {
    let mut seen = HashSet::new();
    let mut reported = HashSet::new();

    for token in def.tasks.iter().filter_map(|t| t.token.as_deref()) {
        if !seen.insert(token) && reported.insert(token) {
            errors.add("tasks", format!("contains not unique token '{token}'"));
        }
    }
}

fn validate_acyclic(def: &DagDefinition, errors: &mut ValidationErrors) {
    let graph = DagGraph::new(
        def.tasks
            .iter()
            .filter_map(|t| t.token.clone().map(|token| (token, t.depends.clone())))
            .collect(),
    );

    if let Some((from, to)) = graph.first_back_edge() {
        errors.add(
            "tasks",
            format!("invalid dag: cycle found ({from} -> {to})"),
        );
    }
}

fn validate_task(
    path: &str,
    task: &TaskDefinition,
    tokens: &HashSet<&str>,
    operations: &OperationRegistry,
    errors: &mut ValidationErrors,
) {
    let own_token = task.token.as_deref();
    if is_blank(own_token) {
        errors.add(format!("{path}.token"), "required");
    }

    if task.retry < 1 {
        errors.add(format!("{path}.retry"), "must be at least 1");
    }

    for (j, dep) in task.depends.iter().enumerate() {
        let dep_path = format!("{path}.depends[{j}]");
        if dep.trim().is_empty() {
            errors.add(dep_path, "empty token");
        } else if Some(dep.as_str()) == own_token {
            errors.add(dep_path, "self-loop detected");
        } else if !tokens.contains(dep.as_str()) {
            errors.add(dep_path, format!("undefined token '{dep}'"));
        }
    }

    let operation = match task.operation.as_deref() {
        Some(op) if !op.trim().is_empty() => match operations.get(op) {
            Some(found) => Some(found),
            None => {
                errors.add(
                    format!("{path}.operation"),
                    format!("unexpected operation '{op}'"),
                );
                None
            }
        },
        _ => {
            errors.add(format!("{path}.operation"), "required");
            None
        }
    };

    let Some(command) = &task.command else {
        errors.add(format!("{path}.command"), "required");
        return;
    };

    if command.environment.is_none() {
        errors.add(format!("{path}.command.environment"), "required");
    }

    let Some(config) = &command.config else {
        errors.add(format!("{path}.command.config"), "required");
        return;
    };

    // Schema check against the merged config: the operation's reference
    // config may supply a required key.
    if let Some(operation) = operation {
        let op_id = operation.id();
        let reference = operation.reference();

        for field in operation.schema() {
            let field_path = format!("{path}.command.config.{}", field.name);
            match config.get(field.name).or_else(|| reference.get(field.name)) {
                None if field.required => {
                    errors.add(field_path, format!("required by operation '{op_id}'"));
                }
                None => {}
                Some(value) => {
                    if let Some(problem) = check_kind(field.kind, value) {
                        errors.add(field_path, problem);
                    }
                }
            }
        }
    }
}

fn check_kind(kind: FieldKind, value: &toml::Value) -> Option<String> {
    match (kind, value) {
        (FieldKind::String, toml::Value::String(_)) => None,
        (FieldKind::Integer, toml::Value::Integer(_)) => None,
        (FieldKind::Boolean, toml::Value::Boolean(_)) => None,
        (FieldKind::Duration, toml::Value::String(s)) => parse_duration(s).err(),
        (kind, other) => Some(format!(
            "expected {}, got {}",
            kind_name(kind),
            other.type_str()
        )),
    }
}

fn kind_name(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::String => "string",
        FieldKind::Duration => "duration string",
        FieldKind::Integer => "integer",
        FieldKind::Boolean => "boolean",
    }
}
