// tests/graph_build.rs

mod common;
use crate::common::init_tracing;

use parci::dag::{TaskGraph, TaskStatus};
use parci::errors::GraphError;
use parci_test_utils::builders::{GraphBuilder, TaskDefBuilder, diamond};

#[test]
fn builds_diamond_and_reports_edges() {
    init_tracing();
    let graph = diamond().build();

    assert_eq!(graph.len(), 4);
    assert_eq!(
        graph.task_names().collect::<Vec<_>>(),
        vec!["A", "B", "C", "D"]
    );
    assert_eq!(graph.dependencies_of("D"), vec!["B", "C"]);
    assert_eq!(graph.dependents_of("A"), vec!["B", "C"]);
    assert_eq!(graph.downstream_of("A"), vec!["B", "C", "D"]);
    assert!(graph.downstream_of("D").is_empty());
    assert!(graph.downstream_of("nope").is_empty());
}

#[test]
fn duplicate_names_are_rejected() {
    let err = GraphBuilder::new()
        .task(TaskDefBuilder::new("A"))
        .task(TaskDefBuilder::new("A"))
        .defs();
    let err = TaskGraph::build(err).unwrap_err();
    assert!(matches!(err, GraphError::DuplicateTask(name) if name == "A"));
}

#[test]
fn unknown_dependency_names_both_tasks() {
    let defs = GraphBuilder::new()
        .task(TaskDefBuilder::new("A").after("ghost"))
        .defs();
    match TaskGraph::build(defs).unwrap_err() {
        GraphError::UnknownDependency { task, dependency } => {
            assert_eq!(task, "A");
            assert_eq!(dependency, "ghost");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn cycle_is_reported_with_its_path() {
    let defs = GraphBuilder::new()
        .task(TaskDefBuilder::new("A").after("C"))
        .task(TaskDefBuilder::new("B").after("A"))
        .task(TaskDefBuilder::new("C").after("B"))
        .defs();

    let GraphError::CycleDetected { path } = TaskGraph::build(defs).unwrap_err() else {
        panic!("expected a cycle");
    };
    assert_eq!(path.first(), path.last());
    assert_eq!(path.len(), 4);
    for name in ["A", "B", "C"] {
        assert!(path.iter().any(|p| p == name), "{name} missing from {path:?}");
    }
}

#[test]
fn self_dependency_is_a_cycle() {
    let defs = GraphBuilder::new()
        .task(TaskDefBuilder::new("A").after("A"))
        .defs();
    let GraphError::CycleDetected { path } = TaskGraph::build(defs).unwrap_err() else {
        panic!("expected a cycle");
    };
    assert_eq!(path, vec!["A".to_string(), "A".to_string()]);
}

#[test]
fn invalid_task_name_is_rejected() {
    let defs = GraphBuilder::new()
        .task(TaskDefBuilder::new("has space"))
        .defs();
    assert!(matches!(
        TaskGraph::build(defs).unwrap_err(),
        GraphError::InvalidTaskName(_)
    ));
}

#[test]
fn input_from_non_ancestor_is_rejected() {
    let defs = GraphBuilder::new()
        .task(TaskDefBuilder::new("A").output("v"))
        .task(TaskDefBuilder::new("B").input("A.v"))
        .defs();
    match TaskGraph::build(defs).unwrap_err() {
        GraphError::UnreachableInput { task, input } => {
            assert_eq!(task, "B");
            assert_eq!(input, "A.v");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn input_of_undeclared_output_is_rejected() {
    let defs = GraphBuilder::new()
        .task(TaskDefBuilder::new("A"))
        .task(TaskDefBuilder::new("B").after("A").input("A.v"))
        .defs();
    assert!(matches!(
        TaskGraph::build(defs).unwrap_err(),
        GraphError::UnreachableInput { .. }
    ));
}

#[test]
fn transitive_ancestor_output_is_reachable() {
    GraphBuilder::new()
        .task(TaskDefBuilder::new("A").output("v"))
        .task(TaskDefBuilder::new("B").after("A"))
        .task(TaskDefBuilder::new("C").after("B").input("A.v"))
        .build();
}

#[test]
fn ready_set_requires_all_dependencies_succeeded() {
    let graph = diamond().build();
    use TaskStatus::*;

    assert_eq!(graph.ready_set(&[Pending, Pending, Pending, Pending]), vec!["A"]);
    assert_eq!(
        graph.ready_set(&[Succeeded, Pending, Pending, Pending]),
        vec!["B", "C"]
    );
    assert!(graph.ready_set(&[Succeeded, Succeeded, Failed, Pending]).is_empty());
    assert_eq!(
        graph.ready_set(&[Succeeded, Succeeded, Succeeded, Pending]),
        vec!["D"]
    );
    // Running tasks are not ready again.
    assert!(graph.ready_set(&[Running, Pending, Pending, Pending]).is_empty());
}

#[test]
fn select_keeps_targets_and_their_ancestors() {
    let graph = diamond().build();
    let sub = graph.select(&["B"]).unwrap();
    assert_eq!(sub.task_names().collect::<Vec<_>>(), vec!["A", "B"]);

    assert!(matches!(
        graph.select(&["nope"]).unwrap_err(),
        GraphError::UnknownTarget(_)
    ));
}

#[test]
fn levels_group_tasks_into_waves() {
    let graph = diamond().build();
    assert_eq!(
        graph.levels(),
        vec![
            vec!["A".to_string()],
            vec!["B".to_string(), "C".to_string()],
            vec!["D".to_string()],
        ]
    );
}

#[test]
fn empty_graph_is_valid() {
    let graph = TaskGraph::build(Vec::new()).unwrap();
    assert!(graph.is_empty());
    assert!(graph.levels().is_empty());
}
