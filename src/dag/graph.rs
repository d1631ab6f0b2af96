// src/dag/graph.rs

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use petgraph::visit::{Control, DfsEvent, depth_first_search};

use super::model::Dag;

/// Adjacency view over task tokens, in declaration order.
///
/// Dependencies on unknown tokens and self-dependencies are kept in
/// `dependencies_of` for reporting but never become graph edges; validation
/// reports them separately.
#[derive(Debug, Clone)]
pub struct DagGraph {
    order: Vec<String>,
    deps: HashMap<String, Vec<String>>,
}

impl DagGraph {
    /// Build from `(token, depends)` pairs in declaration order.
    pub fn new(tasks: Vec<(String, Vec<String>)>) -> Self {
        let mut order = Vec::with_capacity(tasks.len());
        let mut deps: HashMap<String, Vec<String>> = HashMap::new();

        for (token, task_deps) in tasks {
            if !deps.contains_key(&token) {
                order.push(token.clone());
            }
            deps.entry(token).or_default().extend(task_deps);
        }

        Self { order, deps }
    }

    pub fn from_dag(dag: &Dag) -> Self {
        Self::new(
            dag.tasks
                .iter()
                .map(|t| (t.token.clone(), t.depends.iter().cloned().collect()))
                .collect(),
        )
    }

    /// All task tokens in declaration order.
    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    /// Immediate dependencies of a task.
    pub fn dependencies_of(&self, token: &str) -> &[String] {
        self.deps.get(token).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First edge that closes a cycle, as `(from, to)` where `to` depends on
    /// `from`, found by depth-first search from each task in declaration
    /// order.
    pub fn first_back_edge(&self) -> Option<(String, String)> {
        let graph = self.edge_graph();

        depth_first_search(&graph, self.tasks(), |event| {
            if let DfsEvent::BackEdge(from, to) = event {
                return Control::Break((from.to_string(), to.to_string()));
            }
            Control::Continue
        })
        .break_value()
    }

    /// Tokens ordered so that every task follows all of its dependencies.
    ///
    /// Fails with a token involved in a cycle.
    pub fn topological_order(&self) -> Result<Vec<String>, String> {
        let graph = self.edge_graph();

        toposort(&graph, None)
            .map(|order| order.into_iter().map(str::to_string).collect())
            .map_err(|cycle| cycle.node_id().to_string())
    }

    /// Edge direction: dep -> task, so a topological order runs deps first.
    fn edge_graph(&self) -> DiGraphMap<&str, ()> {
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

        for token in &self.order {
            graph.add_node(token.as_str());
        }

        for token in &self.order {
            for dep in self.dependencies_of(token) {
                if dep != token && self.deps.contains_key(dep) {
                    graph.add_edge(dep.as_str(), token.as_str(), ());
                }
            }
        }

        graph
    }
}
