//! Directed dependency graph with compile-time cycle detection.
//!
//! The graph is built once per container-generation pass from the full
//! [ComponentMeta](crate::component_meta::ComponentMeta) set and discarded
//! afterwards. Adjacency preserves insertion order so diagnostics and the
//! resulting initialization order stay deterministic across runs.

use crate::error::GraphError;
use fxhash::FxHashMap;
use indexmap::{IndexMap, IndexSet};
use std::fmt::Write;

/// Directed graph of component-to-component dependencies. An edge `from -> to`
/// means `from` depends on `to`.
#[derive(Default, Clone, Debug)]
pub struct DependencyGraph {
    adjacency: IndexMap<String, IndexSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensures a node exists, even with no outgoing edges. Idempotent.
    pub fn add_component(&mut self, name: impl Into<String>) {
        self.adjacency.entry(name.into()).or_default();
    }

    /// Adds a directed dependency edge, creating both endpoints as needed.
    /// Idempotent.
    pub fn add_dependency(&mut self, from: impl Into<String>, to: impl Into<String>) {
        let to = to.into();
        self.adjacency.entry(to.clone()).or_default();
        self.adjacency.entry(from.into()).or_default().insert(to);
    }

    /// All known components, in insertion order.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.adjacency.keys().map(String::as_str)
    }

    /// Dependencies of one component, in insertion order.
    pub fn dependencies_of(&self, component: &str) -> impl Iterator<Item = &str> {
        self.adjacency
            .get(component)
            .into_iter()
            .flat_map(|deps| deps.iter().map(String::as_str))
    }

    /// Searches for a dependency cycle, returning the first one found as an
    /// explicit walk whose first and last elements are equal, e.g.
    /// `[A, B, C, A]`. Returns `None` for acyclic graphs.
    pub fn detect_cycle(&self) -> Option<Vec<String>> {
        let mut visited = IndexSet::new();
        let mut recursion_stack = IndexSet::new();
        let mut parent: FxHashMap<&str, &str> = FxHashMap::default();

        for component in self.adjacency.keys() {
            if !visited.contains(component.as_str()) {
                if let Some(cycle) =
                    self.dfs(component, &mut visited, &mut recursion_stack, &mut parent)
                {
                    return Some(cycle);
                }
            }
        }

        None
    }

    fn dfs<'a>(
        &'a self,
        current: &'a str,
        visited: &mut IndexSet<&'a str>,
        recursion_stack: &mut IndexSet<&'a str>,
        parent: &mut FxHashMap<&'a str, &'a str>,
    ) -> Option<Vec<String>> {
        visited.insert(current);
        recursion_stack.insert(current);

        for dependency in self.dependencies_of(current) {
            if !visited.contains(dependency) {
                parent.insert(dependency, current);
                if let Some(cycle) = self.dfs(dependency, visited, recursion_stack, parent) {
                    return Some(cycle);
                }
            } else if recursion_stack.contains(dependency) {
                return Some(build_cycle_path(current, dependency, parent));
            }
        }

        recursion_stack.swap_remove(current);
        None
    }

    /// Returns the components ordered so that every dependency precedes its
    /// dependents. Fails with the formatted cycle path if one exists.
    pub fn topological_sort(&self) -> Result<Vec<String>, GraphError> {
        if let Some(cycle) = self.detect_cycle() {
            let formatted_cycle = format_cycle(&cycle);
            return Err(GraphError::CircularDependency {
                cycle,
                formatted_cycle,
            });
        }

        let mut visited = IndexSet::new();
        let mut order = Vec::with_capacity(self.adjacency.len());

        for component in self.adjacency.keys() {
            if !visited.contains(component.as_str()) {
                self.post_order(component, &mut visited, &mut order);
            }
        }

        Ok(order)
    }

    /// Iterative post-order DFS: a node is appended only once all its
    /// dependencies are, so the result lists dependencies first.
    fn post_order<'a>(
        &'a self,
        start: &'a str,
        visited: &mut IndexSet<&'a str>,
        order: &mut Vec<String>,
    ) {
        let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
        visited.insert(start);

        while let Some((current, next_child)) = stack.pop() {
            let deps = &self.adjacency[current];
            if let Some(dependency) = deps.get_index(next_child) {
                stack.push((current, next_child + 1));
                if visited.insert(dependency.as_str()) {
                    stack.push((dependency, 0));
                }
            } else {
                order.push(current.to_string());
            }
        }
    }

    /// Renders the graph in DOT format for diagnostics.
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph dependencies {\n");
        for (component, deps) in &self.adjacency {
            if deps.is_empty() {
                let _ = writeln!(dot, "  \"{}\";", simple_name(component));
            }
            for dependency in deps {
                let _ = writeln!(
                    dot,
                    "  \"{}\" -> \"{}\";",
                    simple_name(component),
                    simple_name(dependency)
                );
            }
        }
        dot.push_str("}\n");
        dot
    }
}

fn build_cycle_path(current: &str, cycle_start: &str, parent: &FxHashMap<&str, &str>) -> Vec<String> {
    let mut path = vec![current.to_string()];

    let mut node = current;
    while node != cycle_start {
        match parent.get(node) {
            Some(previous) => {
                node = previous;
                path.push(node.to_string());
            }
            None => break,
        }
    }

    path.reverse();
    path.push(cycle_start.to_string());
    path
}

/// Formats a cycle path as arrow-joined simple names, e.g. `A -> B -> A`.
pub fn format_cycle(cycle: &[String]) -> String {
    cycle
        .iter()
        .map(|name| simple_name(name))
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn simple_name(class_name: &str) -> &str {
    class_name
        .rsplit_once('.')
        .map(|(_, simple)| simple)
        .unwrap_or(class_name)
}
