use std::collections::{HashSet, VecDeque};

use parci::dag::{RunStatus, TaskGraph, TaskStatus};
use parci::errors::GraphError;
use parci::engine::{
    AttemptOutcome, AttemptReport, CoreRun, Dispatch, EngineOptions, RuntimeEvent,
};
use parci::types::FailurePolicy;
use parci_test_utils::builders::{GraphBuilder, TaskDefBuilder};
use proptest::prelude::*;

// Strategy to generate a valid DAG.
// We ensure acyclicity by only allowing task N to depend on tasks 0..N-1.
fn dag_strategy(max_tasks: usize) -> impl Strategy<Value = TaskGraph> {
    (1..=max_tasks).prop_flat_map(|num_tasks| {
        proptest::collection::vec(
            proptest::collection::vec(any::<usize>(), 0..num_tasks),
            num_tasks,
        )
        .prop_map(move |raw_deps| {
            let mut builder = GraphBuilder::new();
            for (i, potential_deps) in raw_deps.into_iter().enumerate() {
                let mut task = TaskDefBuilder::new(&format!("task_{i}"));
                let mut valid_deps = HashSet::new();
                for dep_idx in potential_deps {
                    if i > 0 {
                        valid_deps.insert(dep_idx % i);
                    }
                }
                for dep_idx in valid_deps {
                    task = task.after(&format!("task_{dep_idx}"));
                }
                builder = builder.task(task);
            }
            builder.build()
        })
    })
}

fn policy_strategy() -> impl Strategy<Value = FailurePolicy> {
    prop_oneof![
        Just(FailurePolicy::FailFast),
        Just(FailurePolicy::IsolateBranch)
    ]
}

/// Drive a core to completion, completing dispatched attempts in FIFO order.
/// Checks the concurrency bound and dependency order after every step.
fn drive(
    graph: TaskGraph,
    concurrency: usize,
    policy: FailurePolicy,
    failing: &HashSet<String>,
) -> (CoreRun, Vec<String>) {
    let mut core = CoreRun::new(
        graph,
        EngineOptions {
            concurrency,
            default_policy: policy,
            policy_override: None,
        },
        Vec::new(),
    );
    let mut queue: VecDeque<Dispatch> = VecDeque::new();
    let mut started = Vec::new();

    let step = core.start();
    queue.extend(step.dispatches().cloned());
    let mut keep_running = step.keep_running;

    let mut guard = 0;
    while keep_running {
        guard += 1;
        assert!(guard < 1_000, "run did not terminate");
        assert!(core.running_count() <= concurrency.max(1));

        let dispatch = queue.pop_front().expect("running tasks but nothing dispatched");
        for dep in core.graph().dependencies_of(&dispatch.task) {
            assert_eq!(core.status_of(dep), Some(TaskStatus::Succeeded));
        }
        started.push(dispatch.task.clone());

        let outcome = if failing.contains(&dispatch.task) {
            AttemptOutcome::Failed {
                exit_code: Some(1),
                error: "exit 1".into(),
            }
        } else {
            AttemptOutcome::Succeeded {
                outputs: Default::default(),
            }
        };
        let step = core.step(RuntimeEvent::AttemptFinished(AttemptReport::new(
            dispatch.task,
            dispatch.attempt,
            outcome,
        )));
        queue.extend(step.dispatches().cloned());
        keep_running = step.keep_running;
    }
    assert!(queue.is_empty());
    (core, started)
}

proptest! {
    #[test]
    fn acyclic_graphs_drain_through_ready_set(graph in dag_strategy(12)) {
        let mut statuses = vec![TaskStatus::Pending; graph.len()];
        let mut order = Vec::new();
        loop {
            let ready = graph.ready_set(&statuses);
            if ready.is_empty() {
                break;
            }
            // Run the first ready task only, like a concurrency of one.
            let idx = graph.index_of(&ready[0]).unwrap();
            for dep in graph.dependencies_of(&ready[0]) {
                prop_assert!(order.iter().any(|o: &String| o == dep));
            }
            statuses[idx] = TaskStatus::Succeeded;
            order.push(ready[0].clone());
        }
        prop_assert_eq!(order.len(), graph.len());
    }

    #[test]
    fn injected_back_edge_is_reported_as_a_cycle(
        graph in dag_strategy(10),
        pick in any::<prop::sample::Index>(),
    ) {
        // Pick a task with a dependency and make that dependency depend on
        // it: a guaranteed cycle.
        let with_deps: Vec<String> = graph
            .task_names()
            .filter(|n| !graph.dependencies_of(n).is_empty())
            .map(str::to_string)
            .collect();
        prop_assume!(!with_deps.is_empty());
        let task = pick.get(&with_deps).clone();
        let dep = graph.dependencies_of(&task)[0].to_string();

        let mut defs = graph.tasks().to_vec();
        for def in defs.iter_mut() {
            if def.name == dep {
                def.depends_on.push(task.clone());
            }
        }

        match TaskGraph::build(defs) {
            Err(GraphError::CycleDetected { path }) => {
                prop_assert!(path.len() >= 3);
                prop_assert_eq!(path.first(), path.last());
                // Consecutive entries follow "depends on" edges.
                let rebuilt = graph.clone();
                for pair in path.windows(2) {
                    let (from, to) = (&pair[0], &pair[1]);
                    let closes_cycle = *from == dep && *to == task;
                    prop_assert!(
                        closes_cycle || rebuilt.dependencies_of(from).contains(&to.as_str()),
                        "{} -> {} is not an edge", from, to
                    );
                }
            }
            other => prop_assert!(false, "expected a cycle, got {:?}", other.map(|g| g.len())),
        }
    }

    #[test]
    fn every_run_terminates_with_all_tasks_terminal(
        graph in dag_strategy(10),
        concurrency in 1usize..5,
        policy in policy_strategy(),
        failing in proptest::collection::vec(0..10usize, 0..4),
    ) {
        let failing: HashSet<String> = failing.iter().map(|i| format!("task_{i}")).collect();
        let names: Vec<String> = graph.task_names().map(str::to_string).collect();
        let (core, started) = drive(graph, concurrency, policy, &failing);

        prop_assert!(core.is_finished());
        for s in core.statuses() {
            prop_assert!(s.is_terminal());
        }

        // Each task runs at most once without retries.
        let unique: HashSet<&String> = started.iter().collect();
        prop_assert_eq!(unique.len(), started.len());

        let any_failed = names.iter().any(|n| core.status_of(n) == Some(TaskStatus::Failed));
        let expected = if any_failed { RunStatus::Failed } else { RunStatus::Succeeded };
        prop_assert_eq!(core.run_status(), expected);
    }

    #[test]
    fn nothing_downstream_of_a_failure_runs(
        graph in dag_strategy(10),
        concurrency in 1usize..5,
        failing in proptest::collection::vec(0..10usize, 1..4),
    ) {
        let failing: HashSet<String> = failing.iter().map(|i| format!("task_{i}")).collect();
        let failed_and_downstream: Vec<(String, Vec<String>)> = failing
            .iter()
            .filter(|f| graph.index_of(f).is_some())
            .map(|f| (f.clone(), graph.downstream_of(f)))
            .collect();

        let (core, started) = drive(graph, concurrency, FailurePolicy::IsolateBranch, &failing);

        for (failed, downstream) in failed_and_downstream {
            if core.status_of(&failed) != Some(TaskStatus::Failed) {
                continue;
            }
            for d in downstream {
                prop_assert!(!started.contains(&d), "{} ran after {} failed", d, failed);
                prop_assert_eq!(core.status_of(&d), Some(TaskStatus::Skipped));
            }
        }
    }

    #[test]
    fn isolate_branch_without_failures_runs_everything(
        graph in dag_strategy(12),
        concurrency in 1usize..6,
    ) {
        let len = graph.len();
        let (core, started) = drive(graph, concurrency, FailurePolicy::IsolateBranch, &HashSet::new());
        prop_assert_eq!(started.len(), len);
        prop_assert_eq!(core.run_status(), RunStatus::Succeeded);
    }
}
