//! Service dependency graph
//!
//! An edge `a -> b` means "a depends on b". Update order is a depth-first
//! post-order (dependencies first) over the closure of the requested
//! services, visiting roots and siblings in name order so the result is
//! stable across runs.

use crate::error::{ComposeError, Result};
use crate::model::ComposeFile;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph from every service's `depends_on`
    pub fn from_compose(compose: &ComposeFile) -> Self {
        let mut graph = Self::new();
        for (name, def) in &compose.services {
            graph.add_service(name);
            for dependency in def.dependencies() {
                graph.add_dependency(name, dependency);
            }
        }
        graph
    }

    pub fn add_service(&mut self, service: &str) {
        self.edges.entry(service.to_string()).or_default();
    }

    /// Record that `service` depends on `dependency`
    pub fn add_dependency(&mut self, service: &str, dependency: &str) {
        self.add_service(dependency);
        self.edges
            .entry(service.to_string())
            .or_default()
            .insert(dependency.to_string());
    }

    pub fn contains(&self, service: &str) -> bool {
        self.edges.contains_key(service)
    }

    /// Direct dependencies of a service
    pub fn dependencies(&self, service: &str) -> impl Iterator<Item = &str> {
        self.edges
            .get(service)
            .into_iter()
            .flat_map(|deps| deps.iter().map(String::as_str))
    }

    /// Services that directly depend on `service`, in name order
    pub fn dependents(&self, service: &str) -> Vec<String> {
        self.edges
            .iter()
            .filter(|(_, deps)| deps.contains(service))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Dependencies-first order over `selected` and everything it depends on
    pub fn update_order<S: AsRef<str>>(&self, selected: &[S]) -> Result<Vec<String>> {
        let roots: BTreeSet<&str> = selected.iter().map(|s| s.as_ref()).collect();

        let mut order = Vec::new();
        let mut done = BTreeSet::new();
        let mut visiting = BTreeSet::new();
        for root in roots {
            self.visit(root, &mut visiting, &mut done, &mut order)?;
        }
        Ok(order)
    }

    /// Fail if any cycle exists anywhere in the graph
    pub fn validate(&self) -> Result<()> {
        let all: Vec<&str> = self.edges.keys().map(String::as_str).collect();
        self.update_order(&all).map(|_| ())
    }

    fn visit<'a>(
        &'a self,
        service: &'a str,
        visiting: &mut BTreeSet<&'a str>,
        done: &mut BTreeSet<&'a str>,
        order: &mut Vec<String>,
    ) -> Result<()> {
        if done.contains(service) {
            return Ok(());
        }
        if !visiting.insert(service) {
            return Err(ComposeError::CircularDependency {
                service: service.to_string(),
            });
        }

        for dependency in self.dependencies(service) {
            self.visit(dependency, visiting, done, order)?;
        }

        visiting.remove(service);
        done.insert(service);
        order.push(service.to_string());
        Ok(())
    }
}
