// tests/validation.rs

use std::error::Error;

use taskflow::config::OperationSection;
use taskflow::dag::{CommandDefinition, DagDefinition, DagGraph, TaskDefinition, validate_dag};
use taskflow::operation::OperationRegistry;
use taskflow_test_utils::builders::{DagDefinitionBuilder, TaskDefinitionBuilder};

type TestResult = Result<(), Box<dyn Error>>;

fn registry() -> OperationRegistry {
    OperationRegistry::with_builtins(&OperationSection::default())
}

fn shell(token: &str) -> TaskDefinitionBuilder {
    TaskDefinitionBuilder::new(token, "shell").config("script", "echo ok")
}

#[test]
fn valid_definition_converts_into_dag() -> TestResult {
    let def = DagDefinitionBuilder::new("pipeline")
        .task(shell("fetch").retry(3).env("MODE", "full"))
        .task(shell("build").depends("fetch").config("timeout", "10m"))
        .task(TaskDefinitionBuilder::dummy("report", "success").depends("build"))
        .build();

    let errors = validate_dag(&def, &registry());
    assert!(errors.is_valid(), "unexpected errors:\n{errors}");

    let dag = def.into_dag(&registry()).map_err(|e| e.to_string())?;
    assert_eq!(dag.token, "pipeline");
    assert_eq!((dag.id, dag.version), (0, 0));

    let tokens: Vec<&str> = dag.tasks.iter().map(|t| t.token.as_str()).collect();
    assert_eq!(tokens, ["fetch", "build", "report"]);

    let fetch = dag.task_by_token("fetch").ok_or("fetch")?;
    assert_eq!(fetch.retry, 3);
    assert_eq!(fetch.operation, "shell");
    assert_eq!(
        fetch.command.environment.get("MODE").map(String::as_str),
        Some("full")
    );

    let build = dag.task_by_token("build").ok_or("build")?;
    assert!(build.depends.contains("fetch"));
    assert_eq!(
        build.command.config.get("timeout").and_then(|v| v.as_str()),
        Some("10m")
    );
    Ok(())
}

#[test]
fn missing_token_and_tasks_are_reported() {
    let errors = validate_dag(&DagDefinition::default(), &registry());

    assert!(errors.contains("token", "required"));
    assert!(errors.contains("tasks", "required"));
    assert_eq!(errors.len(), 2);
}

#[test]
fn blank_dag_token_is_required() {
    let mut def = DagDefinitionBuilder::new("dag").task(shell("a")).build();
    def.token = Some("   ".to_string());

    let errors = validate_dag(&def, &registry());
    assert!(errors.contains("token", "required"));
}

#[test]
fn duplicate_tokens_are_reported_once() {
    let def = DagDefinitionBuilder::new("dag")
        .task(shell("a"))
        .task(shell("a"))
        .task(shell("a"))
        .build();

    let errors = validate_dag(&def, &registry());
    let messages: Vec<&str> = errors.messages_for("tasks").collect();
    assert_eq!(messages, ["contains not unique token 'a'"]);
}

#[test]
fn cycles_are_reported() {
    let def = DagDefinitionBuilder::new("dag")
        .task(shell("a").depends("c"))
        .task(shell("b").depends("a"))
        .task(shell("c").depends("b"))
        .build();

    let errors = validate_dag(&def, &registry());
    assert!(
        errors.contains("tasks", "invalid dag: cycle found ("),
        "errors:\n{errors}"
    );
    assert_eq!(errors.len(), 1);
}

#[test]
fn dependency_problems_are_reported_per_index() {
    let def = DagDefinitionBuilder::new("dag")
        .task(shell("a"))
        .task(shell("b").depends("").depends("b").depends("zzz").depends("a"))
        .build();

    let errors = validate_dag(&def, &registry());
    assert!(errors.contains("tasks[1].depends[0]", "empty token"));
    assert!(errors.contains("tasks[1].depends[1]", "self-loop detected"));
    assert!(errors.contains("tasks[1].depends[2]", "undefined token 'zzz'"));
    assert_eq!(errors.messages_for("tasks[1].depends[3]").count(), 0);
}

#[test]
fn missing_task_token_is_required() {
    let mut task = shell("x").build();
    task.token = None;
    let def = DagDefinition {
        token: Some("dag".to_string()),
        tasks: vec![task],
    };

    let errors = validate_dag(&def, &registry());
    assert!(errors.contains("tasks[0].token", "required"));
}

#[test]
fn operation_must_be_present_and_registered() {
    let mut missing = shell("a").build();
    missing.operation = None;

    let def = DagDefinition {
        token: Some("dag".to_string()),
        tasks: vec![
            missing,
            TaskDefinitionBuilder::new("b", "teleport").build(),
        ],
    };

    let errors = validate_dag(&def, &registry());
    assert!(errors.contains("tasks[0].operation", "required"));
    assert!(errors.contains("tasks[1].operation", "unexpected operation 'teleport'"));
}

#[test]
fn command_parts_are_required() {
    let def = DagDefinition {
        token: Some("dag".to_string()),
        tasks: vec![
            TaskDefinition {
                token: Some("no-command".to_string()),
                operation: Some("dummy".to_string()),
                ..TaskDefinition::default()
            },
            TaskDefinition {
                token: Some("empty-command".to_string()),
                operation: Some("dummy".to_string()),
                command: Some(CommandDefinition::default()),
                ..TaskDefinition::default()
            },
        ],
    };

    let errors = validate_dag(&def, &registry());
    assert!(errors.contains("tasks[0].command", "required"));
    assert!(errors.contains("tasks[1].command.environment", "required"));
    assert!(errors.contains("tasks[1].command.config", "required"));
}

#[test]
fn operation_schema_is_enforced() {
    let def = DagDefinitionBuilder::new("dag")
        .task(TaskDefinitionBuilder::new("no-script", "shell"))
        .task(shell("bad-timeout").config("timeout", "soon"))
        .task(shell("int-timeout").config("timeout", 30_i64))
        .task(shell("bad-dir").config("directory", false))
        .build();

    let errors = validate_dag(&def, &registry());
    assert!(errors.contains("tasks[0].command.config.script", "required by operation 'shell'"));
    assert_eq!(errors.messages_for("tasks[1].command.config.timeout").count(), 1);
    assert!(errors.contains("tasks[2].command.config.timeout", "expected duration string, got integer"));
    assert!(errors.contains("tasks[3].command.config.directory", "expected string, got boolean"));
}

#[test]
fn out_of_range_duration_is_a_validation_error() {
    let def = DagDefinitionBuilder::new("dag")
        .task(shell("huge").config("timeout", "18446744073709551615h"))
        .task(shell("minutes").config("timeout", "18446744073709551615m"))
        .build();

    let errors = validate_dag(&def, &registry());
    assert!(errors.contains("tasks[0].command.config.timeout", "duration out of range"));
    assert!(errors.contains("tasks[1].command.config.timeout", "duration out of range"));
}

#[test]
fn retry_budget_must_allow_one_attempt() {
    let def = DagDefinitionBuilder::new("dag")
        .task(shell("never").retry(0))
        .task(shell("once").retry(1))
        .build();

    let errors = validate_dag(&def, &registry());
    assert!(errors.contains("tasks[0].retry", "must be at least 1"));
    assert_eq!(errors.messages_for("tasks[1].retry").count(), 0);
    assert_eq!(errors.len(), 1);
}

#[test]
fn reference_config_satisfies_required_keys() {
    let mut section = OperationSection::default();
    section
        .shell
        .insert("script".to_string(), toml::Value::String("make".to_string()));
    let registry = OperationRegistry::with_builtins(&section);

    let def = DagDefinitionBuilder::new("dag")
        .task(TaskDefinitionBuilder::new("build", "shell"))
        .build();

    let errors = validate_dag(&def, &registry);
    assert!(errors.is_valid(), "unexpected errors:\n{errors}");
}

#[test]
fn every_problem_is_collected_in_one_pass() {
    let def = DagDefinitionBuilder::new("dag")
        .task(TaskDefinitionBuilder::new("a", "teleport").depends("ghost"))
        .task(TaskDefinitionBuilder::new("a", "shell"))
        .build();

    let errors = validate_dag(&def, &registry());
    assert!(errors.contains("tasks", "contains not unique token 'a'"));
    assert!(errors.contains("tasks[0].depends[0]", "undefined token 'ghost'"));
    assert!(errors.contains("tasks[0].operation", "unexpected operation"));
    assert!(errors.contains("tasks[1].command.config.script", "required"));

    let rendered = errors.to_string();
    assert!(rendered.contains("tasks[0].operation: unexpected operation 'teleport'"));
    assert_eq!(rendered.lines().count(), errors.len());
}

#[test]
fn invalid_definition_does_not_convert() {
    let def = DagDefinitionBuilder::new("dag")
        .task(shell("a").depends("missing"))
        .build();

    let errors = def.into_dag(&registry()).err();
    assert!(errors.is_some_and(|e| e.contains("tasks[0].depends[0]", "undefined token")));
}

#[test]
fn graph_orders_tasks_after_their_dependencies() -> TestResult {
    let owned = |deps: &[&str]| deps.iter().map(|d| d.to_string()).collect::<Vec<_>>();
    let graph = DagGraph::new(vec![
        ("load".to_string(), owned(&["transform", "extract"])),
        ("transform".to_string(), owned(&["extract"])),
        ("extract".to_string(), owned(&[])),
        ("audit".to_string(), owned(&["ghost", "audit"])),
    ]);

    assert_eq!(graph.tasks().collect::<Vec<_>>(), ["load", "transform", "extract", "audit"]);
    assert_eq!(graph.dependencies_of("load"), ["transform", "extract"]);
    assert!(graph.dependencies_of("ghost").is_empty());
    assert!(graph.first_back_edge().is_none(), "unknown and self deps are not edges");

    let order = graph.topological_order()?;
    let position = |token: &str| order.iter().position(|t| t == token);
    assert_eq!(order.len(), 4);
    assert!(position("extract") < position("transform"));
    assert!(position("transform") < position("load"));

    let cyclic = DagGraph::new(vec![
        ("a".to_string(), owned(&["b"])),
        ("b".to_string(), owned(&["a"])),
    ]);
    assert!(cyclic.first_back_edge().is_some());
    assert!(cyclic.topological_order().is_err());
    Ok(())
}
