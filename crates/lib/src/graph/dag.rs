//! Ordering over the node dependency graph.
//!
//! Edges run from a dependency to its dependent.

use std::collections::{HashMap, HashSet};

use petgraph::Direction;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};

use crate::node::NodeName;

pub type NodeGraph = DiGraph<NodeName, ()>;

/// Nodes in dependency order, plus the same nodes grouped into waves whose
/// members only depend on earlier waves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
  pub order: Vec<NodeName>,
  pub waves: Vec<Vec<NodeName>>,
}

impl Schedule {
  pub fn len(&self) -> usize {
    self.order.len()
  }

  pub fn is_empty(&self) -> bool {
    self.order.is_empty()
  }

  /// Position of a node in `order`.
  pub fn position(&self, name: &NodeName) -> Option<usize> {
    self.order.iter().position(|n| n == name)
  }
}

/// Compute the topological order and parallel waves.
///
/// Returns the members of one cycle when the graph is not acyclic.
pub fn schedule(graph: &NodeGraph) -> Result<Schedule, Vec<NodeName>> {
  let sorted = toposort(graph, None).map_err(|_| find_cycle(graph))?;
  let order = sorted.into_iter().map(|idx| graph[idx].clone()).collect();
  let waves = waves(graph)?;
  Ok(Schedule { order, waves })
}

/// Kahn-style levels: a node's wave is one past its deepest dependency.
fn waves(graph: &NodeGraph) -> Result<Vec<Vec<NodeName>>, Vec<NodeName>> {
  let mut in_degree: HashMap<NodeIndex, usize> = HashMap::new();
  let mut node_level: HashMap<NodeIndex, usize> = HashMap::new();

  for idx in graph.node_indices() {
    in_degree.insert(idx, graph.neighbors_directed(idx, Direction::Incoming).count());
  }

  let mut current_level = 0;
  let mut remaining: HashSet<NodeIndex> = graph.node_indices().collect();

  while !remaining.is_empty() {
    let ready: Vec<NodeIndex> = remaining.iter().filter(|&&idx| in_degree[&idx] == 0).copied().collect();

    if ready.is_empty() {
      return Err(find_cycle(graph));
    }

    for &idx in &ready {
      node_level.insert(idx, current_level);
      remaining.remove(&idx);

      for neighbor in graph.neighbors_directed(idx, Direction::Outgoing) {
        if let Some(deg) = in_degree.get_mut(&neighbor) {
          *deg = deg.saturating_sub(1);
        }
      }
    }

    current_level += 1;
  }

  let levels = node_level.values().copied().max().map_or(0, |max| max + 1);
  let mut waves: Vec<Vec<NodeName>> = vec![Vec::new(); levels];
  for (idx, level) in node_level {
    waves[level].push(graph[idx].clone());
  }
  for wave in &mut waves {
    wave.sort();
  }
  Ok(waves)
}

/// Members of one strongly connected component with more than one node,
/// sorted by name.
pub fn find_cycle(graph: &NodeGraph) -> Vec<NodeName> {
  let mut cycle = tarjan_scc(graph)
    .into_iter()
    .find(|scc| scc.len() > 1 || scc.iter().any(|&idx| graph.contains_edge(idx, idx)))
    .map(|scc| scc.into_iter().map(|idx| graph[idx].clone()).collect::<Vec<_>>())
    .unwrap_or_default();
  cycle.sort();
  cycle
}

#[cfg(test)]
mod tests {
  use super::*;

  fn graph(nodes: &[&str], edges: &[(&str, &str)]) -> NodeGraph {
    let mut g = NodeGraph::new();
    let mut idx = HashMap::new();
    for n in nodes {
      idx.insert(*n, g.add_node(NodeName::new(*n)));
    }
    for (from, to) in edges {
      g.add_edge(idx[from], idx[to], ());
    }
    g
  }

  fn names(list: &[&str]) -> Vec<NodeName> {
    list.iter().map(|n| NodeName::new(*n)).collect()
  }

  #[test]
  fn empty_graph() {
    let s = schedule(&NodeGraph::new()).unwrap();
    assert!(s.is_empty());
    assert!(s.waves.is_empty());
  }

  #[test]
  fn linear_chain() {
    let s = schedule(&graph(&["a", "b", "c"], &[("a", "b"), ("b", "c")])).unwrap();
    assert_eq!(s.order, names(&["a", "b", "c"]));
    assert_eq!(s.waves, vec![names(&["a"]), names(&["b"]), names(&["c"])]);
  }

  #[test]
  fn diamond() {
    //     a
    //    / \
    //   b   c
    //    \ /
    //     d
    let s = schedule(&graph(
      &["a", "b", "c", "d"],
      &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
    ))
    .unwrap();

    assert_eq!(s.waves, vec![names(&["a"]), names(&["b", "c"]), names(&["d"])]);
    let pos = |n: &str| s.position(&NodeName::new(n)).unwrap();
    assert!(pos("a") < pos("b"));
    assert!(pos("a") < pos("c"));
    assert!(pos("b") < pos("d"));
    assert!(pos("c") < pos("d"));
  }

  #[test]
  fn independent_nodes_share_a_wave() {
    let s = schedule(&graph(&["z", "y", "x"], &[])).unwrap();
    assert_eq!(s.waves, vec![names(&["x", "y", "z"])]);
  }

  #[test]
  fn cycle_reports_members() {
    let err = schedule(&graph(&["a", "b", "c", "d"], &[("a", "b"), ("b", "c"), ("c", "b"), ("c", "d")])).unwrap_err();
    assert_eq!(err, names(&["b", "c"]));
  }
}
