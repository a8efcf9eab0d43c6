#![allow(dead_code)]

use std::time::Duration;

use parci::dag::{CommandSpec, ContainerSpec, InputDecl, RetryPolicy, TaskDef, TaskGraph};
use parci::params::ParamRef;
use parci::types::FailurePolicy;

/// Builder for `TaskDef` to simplify test setup.
pub struct TaskDefBuilder {
    task: TaskDef,
}

impl TaskDefBuilder {
    /// Task running `true` on the host.
    pub fn new(name: &str) -> Self {
        Self {
            task: TaskDef::new(name, CommandSpec::Shell("true".to_string())),
        }
    }

    pub fn cmd(mut self, script: &str) -> Self {
        self.task.command = CommandSpec::Shell(script.to_string());
        self
    }

    pub fn argv(mut self, argv: &[&str]) -> Self {
        self.task.command = CommandSpec::Argv(argv.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.depends_on.push(dep.to_string());
        self
    }

    pub fn image(mut self, image: &str) -> Self {
        self.task.container = Some(ContainerSpec::new(image));
        self
    }

    /// Plain input, written `name` or `producer.name`.
    pub fn input(mut self, reference: &str) -> Self {
        self.task.inputs.push(InputDecl::plain(parse_ref(reference)));
        self
    }

    pub fn secret_input(mut self, reference: &str) -> Self {
        self.task.inputs.push(InputDecl::secret(parse_ref(reference)));
        self
    }

    pub fn input_as(mut self, reference: &str, env: &str) -> Self {
        let mut decl = InputDecl::plain(parse_ref(reference));
        decl.env = Some(env.to_string());
        self.task.inputs.push(decl);
        self
    }

    pub fn output(mut self, name: &str) -> Self {
        self.task.outputs.push(name.to_string());
        self
    }

    pub fn retry(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.task.retry = RetryPolicy::new(max_attempts, backoff);
        self
    }

    pub fn on_failure(mut self, policy: FailurePolicy) -> Self {
        self.task.on_failure = Some(policy);
        self
    }

    pub fn build(self) -> TaskDef {
        self.task
    }
}

fn parse_ref(reference: &str) -> ParamRef {
    reference
        .parse()
        .unwrap_or_else(|e| panic!("bad parameter reference in test: {e}"))
}

/// Builder for `TaskGraph`.
#[derive(Default)]
pub struct GraphBuilder {
    tasks: Vec<TaskDef>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task(mut self, task: TaskDefBuilder) -> Self {
        self.tasks.push(task.build());
        self
    }

    pub fn defs(self) -> Vec<TaskDef> {
        self.tasks
    }

    pub fn build(self) -> TaskGraph {
        TaskGraph::build(self.tasks).expect("Failed to build valid graph from builder")
    }
}

/// `A → B, A → C, B → D, C → D`.
pub fn diamond() -> GraphBuilder {
    GraphBuilder::new()
        .task(TaskDefBuilder::new("A").output("version"))
        .task(TaskDefBuilder::new("B").after("A").input("A.version"))
        .task(TaskDefBuilder::new("C").after("A"))
        .task(TaskDefBuilder::new("D").after("B").after("C"))
}
