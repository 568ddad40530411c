//! Deletion order for orphaned resources.
//!
//! Orphans form a graph through the `depends_on` edges recorded when they
//! were last applied. Dependents must go before the resources they read
//! from, so the deletion order is the reverse of a topological sort.

use std::collections::{BTreeMap, HashMap};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use super::plan::PriorResource;
use super::types::ScopeError;

pub fn prune_order(orphans: &[String], prior: &BTreeMap<String, PriorResource>) -> Result<Vec<String>, ScopeError> {
  let mut graph: DiGraph<&str, ()> = DiGraph::new();
  let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();

  for name in orphans {
    let idx = graph.add_node(name.as_str());
    nodes.insert(name.as_str(), idx);
  }

  for name in orphans {
    let dependent = nodes[name.as_str()];
    let Some(resource) = prior.get(name) else {
      continue;
    };
    for dep in &resource.depends_on {
      // Dependencies that are still declared are not being deleted.
      if let Some(&dependency) = nodes.get(dep.as_str()) {
        graph.add_edge(dependency, dependent, ());
      }
    }
  }

  let sorted = toposort(&graph, None).map_err(|_| ScopeError::Cycle)?;
  Ok(sorted.into_iter().rev().map(|idx| graph[idx].to_string()).collect())
}
