// src/dag/graph.rs

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use petgraph::graphmap::DiGraphMap;
use petgraph::visit::{Control, DfsEvent, depth_first_search};
use regex::Regex;
use tracing::debug;

use crate::dag::status::TaskStatus;
use crate::dag::task::TaskDef;
use crate::engine::TaskName;
use crate::errors::GraphError;
use crate::params::ParamScope;

static TASK_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("task name pattern is valid"));

/// Validated, immutable task graph.
///
/// Tasks keep their declaration order; every index-based API below uses
/// that order, which is also the tie-break when several tasks are ready at
/// once.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    tasks: Vec<TaskDef>,
    index: HashMap<TaskName, usize>,
    /// Direct dependencies, by index.
    deps: Vec<Vec<usize>>,
    /// Direct dependents, by index.
    dependents: Vec<Vec<usize>>,
}

impl TaskGraph {
    /// Validate a list of task declarations and build the graph.
    ///
    /// Fails on duplicate names, unknown dependencies, dependency cycles
    /// (reported with the full cycle path) and inputs that read outputs no
    /// ancestor declares.
    pub fn build(defs: Vec<TaskDef>) -> Result<Self, GraphError> {
        let mut index = HashMap::with_capacity(defs.len());

        for (i, def) in defs.iter().enumerate() {
            if !TASK_NAME.is_match(&def.name) {
                return Err(GraphError::InvalidTaskName(def.name.clone()));
            }
            if index.insert(def.name.clone(), i).is_some() {
                return Err(GraphError::DuplicateTask(def.name.clone()));
            }
        }

        let mut deps = vec![Vec::new(); defs.len()];
        let mut dependents = vec![Vec::new(); defs.len()];

        for (i, def) in defs.iter().enumerate() {
            for dep in def.depends_on.iter() {
                let Some(&j) = index.get(dep) else {
                    return Err(GraphError::UnknownDependency {
                        task: def.name.clone(),
                        dependency: dep.clone(),
                    });
                };
                if j == i {
                    return Err(GraphError::CycleDetected {
                        path: vec![def.name.clone(), def.name.clone()],
                    });
                }
                if !deps[i].contains(&j) {
                    deps[i].push(j);
                    dependents[j].push(i);
                }
            }
        }

        if let Some(path) = find_cycle(&deps) {
            let path = path.into_iter().map(|i| defs[i].name.clone()).collect();
            return Err(GraphError::CycleDetected { path });
        }

        let graph = Self {
            tasks: defs,
            index,
            deps,
            dependents,
        };
        graph.validate_inputs()?;

        debug!(tasks = graph.tasks.len(), "task graph built");
        Ok(graph)
    }

    /// Every `producer.output` input must name an ancestor that declares
    /// that output, so the value exists by the time the consumer runs.
    fn validate_inputs(&self) -> Result<(), GraphError> {
        for (i, def) in self.tasks.iter().enumerate() {
            for input in def.inputs.iter() {
                let ParamScope::Task(producer) = &input.reference.scope else {
                    continue;
                };
                let reachable = self
                    .index
                    .get(producer)
                    .filter(|&&p| self.ancestors(i).contains(&p))
                    .map(|&p| self.tasks[p].declares_output(&input.reference.name))
                    .unwrap_or(false);
                if !reachable {
                    return Err(GraphError::UnreachableInput {
                        task: def.name.clone(),
                        input: input.reference.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Task names in declaration order.
    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|t| t.name.as_str())
    }

    pub fn tasks(&self) -> &[TaskDef] {
        &self.tasks
    }

    pub fn task(&self, name: &str) -> Option<&TaskDef> {
        self.index.get(name).map(|&i| &self.tasks[i])
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Immediate dependencies of a task.
    pub fn dependencies_of(&self, name: &str) -> Vec<&str> {
        self.index_of(name)
            .map(|i| self.names_of(&self.deps[i]))
            .unwrap_or_default()
    }

    /// Immediate dependents of a task.
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        self.index_of(name)
            .map(|i| self.names_of(&self.dependents[i]))
            .unwrap_or_default()
    }

    fn names_of(&self, indices: &[usize]) -> Vec<&str> {
        indices.iter().map(|&i| self.tasks[i].name.as_str()).collect()
    }

    /// Names of tasks that are `Pending` and whose every dependency has
    /// `Succeeded`, in declaration order.
    ///
    /// `statuses` is indexed by declaration order.
    pub fn ready_set(&self, statuses: &[TaskStatus]) -> Vec<TaskName> {
        self.ready_indices(statuses)
            .into_iter()
            .map(|i| self.tasks[i].name.clone())
            .collect()
    }

    pub(crate) fn ready_indices(&self, statuses: &[TaskStatus]) -> Vec<usize> {
        (0..self.tasks.len())
            .filter(|&i| statuses.get(i) == Some(&TaskStatus::Pending))
            .filter(|&i| {
                self.deps[i]
                    .iter()
                    .all(|&d| statuses.get(d) == Some(&TaskStatus::Succeeded))
            })
            .collect()
    }

    /// Transitive dependents of `name`, in declaration order, excluding the
    /// task itself. Unknown names yield an empty list.
    pub fn downstream_of(&self, name: &str) -> Vec<TaskName> {
        match self.index_of(name) {
            Some(i) => self
                .downstream_indices(i)
                .into_iter()
                .map(|d| self.tasks[d].name.clone())
                .collect(),
            None => Vec::new(),
        }
    }

    pub(crate) fn downstream_indices(&self, idx: usize) -> Vec<usize> {
        closure(idx, &self.dependents)
    }

    pub(crate) fn ancestors(&self, idx: usize) -> Vec<usize> {
        closure(idx, &self.deps)
    }

    /// Sub-graph made of `targets` plus everything they transitively depend
    /// on. Declaration order is preserved.
    pub fn select<S: AsRef<str>>(&self, targets: &[S]) -> Result<TaskGraph, GraphError> {
        let mut keep: HashSet<usize> = HashSet::new();
        for target in targets {
            let target = target.as_ref();
            let Some(i) = self.index_of(target) else {
                return Err(GraphError::UnknownTarget(target.to_string()));
            };
            keep.insert(i);
            keep.extend(self.ancestors(i));
        }

        let defs = self
            .tasks
            .iter()
            .enumerate()
            .filter(|(i, _)| keep.contains(i))
            .map(|(_, def)| def.clone())
            .collect();
        TaskGraph::build(defs)
    }

    /// Execution waves assuming every task succeeds: each wave holds the
    /// tasks that become ready once all previous waves are done.
    pub fn levels(&self) -> Vec<Vec<TaskName>> {
        let mut statuses = vec![TaskStatus::Pending; self.tasks.len()];
        let mut levels = Vec::new();
        loop {
            let ready = self.ready_indices(&statuses);
            if ready.is_empty() {
                break;
            }
            for &i in &ready {
                statuses[i] = TaskStatus::Succeeded;
            }
            levels.push(ready.iter().map(|&i| self.tasks[i].name.clone()).collect());
        }
        levels
    }
}

/// Every node reachable from `start` along `edges`, sorted, excluding `start`.
fn closure(start: usize, edges: &[Vec<usize>]) -> Vec<usize> {
    let mut stack: Vec<usize> = edges[start].clone();
    let mut seen: HashSet<usize> = HashSet::new();

    while let Some(n) = stack.pop() {
        if seen.insert(n) {
            stack.extend(edges[n].iter().copied());
        }
    }

    seen.remove(&start);
    let mut out: Vec<usize> = seen.into_iter().collect();
    out.sort_unstable();
    out
}

/// Depth-first search over "depends on" edges, tracking the in-progress
/// path. The first back-edge closes a cycle; the returned path starts and
/// ends on the same node.
fn find_cycle(deps: &[Vec<usize>]) -> Option<Vec<usize>> {
    let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();
    for i in 0..deps.len() {
        graph.add_node(i);
    }
    for (i, ds) in deps.iter().enumerate() {
        for &d in ds {
            graph.add_edge(i, d, ());
        }
    }

    let mut in_progress: Vec<usize> = Vec::new();
    let result = depth_first_search(&graph, graph.nodes(), |event| match event {
        DfsEvent::Discover(n, _) => {
            in_progress.push(n);
            Control::Continue
        }
        DfsEvent::Finish(_, _) => {
            in_progress.pop();
            Control::Continue
        }
        DfsEvent::BackEdge(from, to) => Control::Break((from, to)),
        _ => Control::Continue,
    });

    let Control::Break((_, to)) = result else {
        return None;
    };
    let start = in_progress.iter().position(|&n| n == to)?;
    let mut path = in_progress[start..].to_vec();
    path.push(to);
    Some(path)
}
