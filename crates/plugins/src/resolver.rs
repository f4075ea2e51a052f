//! Dependency ordering for plugin batches (Kahn's algorithm).
//!
//! Only dependencies between members of the same batch constrain the order.
//! A dependency on a plugin outside the batch is left for the manager to
//! check against the registry at load time.

use std::collections::{BTreeSet, HashMap};

use crate::{
    descriptor::PluginDescriptor,
    error::{PluginError, PluginResult},
};

#[derive(Debug)]
struct DependencyGraph {
    /// dependency -> dependents
    edges: Vec<Vec<usize>>,
    /// dependent -> dependencies (within the batch)
    requires: Vec<Vec<usize>>,
    in_degree: Vec<usize>,
}

impl DependencyGraph {
    fn build(descriptors: &[PluginDescriptor]) -> Self {
        let size = descriptors.len();
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(size);
        for (i, d) in descriptors.iter().enumerate() {
            index.entry(d.name.as_str()).or_insert(i);
        }

        let mut graph = Self {
            edges: vec![Vec::new(); size],
            requires: vec![Vec::new(); size],
            in_degree: vec![0; size],
        };
        for (to, d) in descriptors.iter().enumerate() {
            for dep in &d.dependencies {
                if let Some(&from) = index.get(dep.as_str()) {
                    graph.add_edge(from, to);
                }
            }
        }
        graph
    }

    fn add_edge(&mut self, from: usize, to: usize) {
        if from != to && !self.edges[from].contains(&to) {
            self.edges[from].push(to);
            self.requires[to].push(from);
            self.in_degree[to] += 1;
        }
    }

    /// Topological order, lowest input index first among ready nodes.
    /// `Err` carries the nodes that could not be ordered.
    fn order(&self) -> Result<Vec<usize>, BTreeSet<usize>> {
        let mut in_degree = self.in_degree.clone();
        let mut ready: BTreeSet<usize> = (0..in_degree.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(in_degree.len());

        while let Some(node) = ready.pop_first() {
            order.push(node);
            for &next in &self.edges[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.insert(next);
                }
            }
        }

        if order.len() == in_degree.len() {
            Ok(order)
        } else {
            Err((0..in_degree.len()).filter(|&i| in_degree[i] > 0).collect())
        }
    }

    /// Walk dependency edges from the first stuck node until one repeats.
    /// Every stuck node has at least one stuck dependency, so this
    /// terminates on a cycle.
    fn find_cycle(&self, stuck: &BTreeSet<usize>) -> Vec<usize> {
        let Some(&start) = stuck.first() else {
            return Vec::new();
        };
        let mut path = vec![start];
        let mut current = start;
        loop {
            let Some(&next) = self.requires[current].iter().find(|&&d| stuck.contains(&d)) else {
                return path;
            };
            if let Some(pos) = path.iter().position(|&n| n == next) {
                let mut cycle = path.split_off(pos);
                cycle.push(next);
                return cycle;
            }
            path.push(next);
            current = next;
        }
    }
}

/// Indices of `descriptors` in an order where every plugin comes after the
/// batch members it depends on. Ties keep input order.
///
/// Fails fast with [`PluginError::DependencyCycle`] naming the cycle.
pub fn load_order(descriptors: &[PluginDescriptor]) -> PluginResult<Vec<usize>> {
    let graph = DependencyGraph::build(descriptors);
    graph.order().map_err(|stuck| {
        // a -> b reads "a needs b".
        PluginError::DependencyCycle {
            members: graph
                .find_cycle(&stuck)
                .into_iter()
                .map(|i| descriptors[i].name.clone())
                .collect(),
        }
    })
}

/// Reverse of [`load_order`]: dependents before their dependencies.
/// Falls back to reverse input order if the set is cyclic.
pub fn shutdown_order(descriptors: &[PluginDescriptor]) -> Vec<usize> {
    let mut order = load_order(descriptors).unwrap_or_else(|_| (0..descriptors.len()).collect());
    order.reverse();
    order
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::descriptor::PluginCategory, semver::Version};

    fn plugin(name: &str, deps: &[&str]) -> PluginDescriptor {
        deps.iter().fold(
            PluginDescriptor::new(name, Version::new(1, 0, 0), PluginCategory::Middleware),
            |d, dep| d.depends_on(*dep),
        )
    }

    fn names(descriptors: &[PluginDescriptor], order: &[usize]) -> Vec<String> {
        order.iter().map(|&i| descriptors[i].name.clone()).collect()
    }

    #[test]
    fn dependencies_come_first() {
        let batch = vec![
            plugin("c", &["b"]),
            plugin("b", &["a"]),
            plugin("a", &[]),
            plugin("d", &[]),
        ];
        let order = load_order(&batch).unwrap();
        assert_eq!(names(&batch, &order), ["a", "b", "c", "d"]);
    }

    #[test]
    fn independent_plugins_keep_input_order() {
        let batch = vec![plugin("z", &[]), plugin("y", &[]), plugin("x", &[])];
        assert_eq!(load_order(&batch).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn external_dependencies_do_not_constrain() {
        let batch = vec![plugin("b", &["already-loaded"]), plugin("a", &[])];
        assert_eq!(load_order(&batch).unwrap(), vec![0, 1]);
    }

    #[test]
    fn cycle_is_reported_with_its_members() {
        let batch = vec![
            plugin("root", &[]),
            plugin("a", &["b"]),
            plugin("b", &["c"]),
            plugin("c", &["a"]),
            plugin("tail", &["c"]),
        ];
        let err = load_order(&batch).unwrap_err();
        let PluginError::DependencyCycle { members } = &err else {
            panic!("expected a cycle, got {err}");
        };
        assert_eq!(members.first(), members.last());
        assert_eq!(members.len(), 4);
        for name in ["a", "b", "c"] {
            assert!(members.iter().any(|m| m == name));
        }
        assert!(!members.iter().any(|m| m == "tail" || m == "root"));
    }

    #[test]
    fn two_node_cycle() {
        let batch = vec![plugin("a", &["b"]), plugin("b", &["a"])];
        let err = load_order(&batch).unwrap_err();
        assert_eq!(err.to_string(), "dependency cycle detected: a -> b -> a");
    }

    #[test]
    fn shutdown_reverses_load_order() {
        let batch = vec![plugin("app", &["db"]), plugin("db", &[])];
        assert_eq!(names(&batch, &shutdown_order(&batch)), ["app", "db"]);
    }
}
