//! The build graph.
//!
//! A [`BuildGraph`] is validated data: every dependency resolves, every
//! referenced source is declared, there are no cycles, and nodes that would
//! touch the same in-source tree are ordered. Scheduling and execution only
//! ever see a graph that passed these checks.

pub mod dag;

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use petgraph::Direction;
use petgraph::algo::has_path_connecting;
use petgraph::graph::NodeIndex;
use thiserror::Error;
use tracing::debug;

use crate::layout::{ArtifactTree, LayoutError};
use crate::node::{BuildDirMode, BuildNode, InstallTarget, NodeName};
use crate::platform::Arch;
use crate::source::{SourceId, SourceSpec};
use crate::util::path::overlaps;

pub use dag::{NodeGraph, Schedule};

/// Errors in a graph definition, raised before anything runs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DefinitionError {
  #[error("node '{0}' is defined more than once")]
  DuplicateNode(NodeName),

  #[error("source '{0}' is defined more than once")]
  DuplicateSource(SourceId),

  #[error("source '{source_id}' is invalid: {reason}")]
  InvalidSource { source_id: SourceId, reason: String },

  #[error("node '{node}' references undefined source '{source_id}'")]
  UnknownSource { node: NodeName, source_id: SourceId },

  #[error("node '{node}' depends on undefined node '{dep}'")]
  UnknownDependency { node: NodeName, dep: NodeName },

  #[error("no node named '{0}'")]
  UnknownNode(NodeName),

  #[error("node '{node}' is invalid: {reason}")]
  InvalidNode { node: NodeName, reason: String },

  #[error("dependency cycle between: {}", format_names(.nodes))]
  Cycle { nodes: Vec<NodeName> },

  /// Two unordered nodes would build inside the same source directory.
  #[error("nodes '{first}' and '{second}' share source '{source_id}' and one builds in-source; order them")]
  SharedInSourceTree {
    source_id: SourceId,
    first: NodeName,
    second: NodeName,
  },

  /// Two unordered out-of-source nodes would share one build directory.
  #[error("nodes '{first}' and '{second}' both build source '{source_id}' for {arch} out-of-source; order them")]
  SharedBuildDir {
    source_id: SourceId,
    arch: String,
    first: NodeName,
    second: NodeName,
  },

  /// Two nodes that may run concurrently install into overlapping paths.
  #[error("nodes '{first}' and '{second}' may run concurrently but both install into {}", .path.display())]
  ConcurrencyConflict {
    first: NodeName,
    second: NodeName,
    path: PathBuf,
  },

  #[error("node '{node}': {error}")]
  Layout { node: NodeName, error: LayoutError },
}

/// Architectures whose out-of-source build directory a node uses.
fn build_arches(node: &BuildNode) -> BTreeSet<Option<Arch>> {
  node.sub_builds.iter().map(|sub| node.arch_for(sub)).collect()
}

fn format_names(names: &[NodeName]) -> String {
  names.iter().map(|n| n.as_str()).collect::<Vec<_>>().join(", ")
}

/// Validated DAG of build nodes and the sources they reference.
#[derive(Debug, Clone)]
pub struct BuildGraph {
  graph: NodeGraph,
  indices: HashMap<NodeName, NodeIndex>,
  nodes: BTreeMap<NodeName, Arc<BuildNode>>,
  sources: BTreeMap<SourceId, SourceSpec>,
}

impl BuildGraph {
  /// Build and validate a graph.
  ///
  /// # Errors
  ///
  /// Any [`DefinitionError`] except `ConcurrencyConflict`, which depends on
  /// the artifact layout and is checked by [`BuildGraph::check_install_conflicts`].
  pub fn new(
    sources: impl IntoIterator<Item = SourceSpec>,
    nodes: impl IntoIterator<Item = BuildNode>,
  ) -> Result<Self, DefinitionError> {
    let mut source_map = BTreeMap::new();
    for spec in sources {
      if source_map.contains_key(&spec.id) {
        return Err(DefinitionError::DuplicateSource(spec.id));
      }
      spec.validate().map_err(|reason| DefinitionError::InvalidSource {
        source_id: spec.id.clone(),
        reason,
      })?;
      source_map.insert(spec.id.clone(), spec);
    }

    let mut graph = NodeGraph::new();
    let mut indices = HashMap::new();
    let mut node_map = BTreeMap::new();

    for node in nodes {
      if node_map.contains_key(&node.name) {
        return Err(DefinitionError::DuplicateNode(node.name));
      }
      node.validate().map_err(|reason| DefinitionError::InvalidNode {
        node: node.name.clone(),
        reason,
      })?;
      if !source_map.contains_key(&node.source) {
        return Err(DefinitionError::UnknownSource {
          node: node.name.clone(),
          source_id: node.source.clone(),
        });
      }
      indices.insert(node.name.clone(), graph.add_node(node.name.clone()));
      node_map.insert(node.name.clone(), Arc::new(node));
    }

    for node in node_map.values() {
      let dependent = indices[&node.name];
      for dep in &node.deps {
        let Some(&dep_idx) = indices.get(dep) else {
          return Err(DefinitionError::UnknownDependency {
            node: node.name.clone(),
            dep: dep.clone(),
          });
        };
        graph.add_edge(dep_idx, dependent, ());
      }
    }

    let built = Self {
      graph,
      indices,
      nodes: node_map,
      sources: source_map,
    };

    built.schedule()?;
    built.check_work_dir_sharing()?;

    debug!(nodes = built.nodes.len(), sources = built.sources.len(), "build graph validated");
    Ok(built)
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  pub fn node(&self, name: &NodeName) -> Option<&Arc<BuildNode>> {
    self.nodes.get(name)
  }

  /// Nodes sorted by name.
  pub fn nodes(&self) -> impl Iterator<Item = &Arc<BuildNode>> {
    self.nodes.values()
  }

  pub fn source(&self, id: &SourceId) -> Option<&SourceSpec> {
    self.sources.get(id)
  }

  pub fn sources(&self) -> impl Iterator<Item = &SourceSpec> {
    self.sources.values()
  }

  /// Topological order and parallel waves.
  pub fn schedule(&self) -> Result<Schedule, DefinitionError> {
    dag::schedule(&self.graph).map_err(|nodes| DefinitionError::Cycle { nodes })
  }

  /// Direct dependencies of a node, sorted.
  pub fn dependencies(&self, name: &NodeName) -> Vec<NodeName> {
    self.neighbors(name, Direction::Incoming)
  }

  /// Nodes that depend directly on `name`, sorted.
  pub fn dependents(&self, name: &NodeName) -> Vec<NodeName> {
    self.neighbors(name, Direction::Outgoing)
  }

  fn neighbors(&self, name: &NodeName, direction: Direction) -> Vec<NodeName> {
    let Some(&idx) = self.indices.get(name) else {
      return Vec::new();
    };
    let mut names: Vec<NodeName> = self
      .graph
      .neighbors_directed(idx, direction)
      .map(|n| self.graph[n].clone())
      .collect();
    names.sort();
    names.dedup();
    names
  }

  /// Every node reachable from `name` through dependent edges.
  pub fn transitive_dependents(&self, name: &NodeName) -> BTreeSet<NodeName> {
    self.reachable(name, Direction::Outgoing)
  }

  /// Every node `name` depends on, directly or not.
  pub fn transitive_dependencies(&self, name: &NodeName) -> BTreeSet<NodeName> {
    self.reachable(name, Direction::Incoming)
  }

  fn reachable(&self, name: &NodeName, direction: Direction) -> BTreeSet<NodeName> {
    let mut seen = BTreeSet::new();
    let Some(&start) = self.indices.get(name) else {
      return seen;
    };
    let mut queue = VecDeque::from([start]);
    while let Some(idx) = queue.pop_front() {
      for next in self.graph.neighbors_directed(idx, direction) {
        if seen.insert(self.graph[next].clone()) {
          queue.push_back(next);
        }
      }
    }
    seen
  }

  /// True when one node must finish before the other starts.
  pub fn is_ordered(&self, a: &NodeName, b: &NodeName) -> bool {
    match (self.indices.get(a), self.indices.get(b)) {
      (Some(&ia), Some(&ib)) => {
        has_path_connecting(&self.graph, ia, ib, None) || has_path_connecting(&self.graph, ib, ia, None)
      }
      _ => false,
    }
  }

  /// The sub-graph of `targets` and everything they depend on.
  pub fn restrict_to(&self, targets: &[NodeName]) -> Result<BuildGraph, DefinitionError> {
    let mut keep = BTreeSet::new();
    for target in targets {
      if !self.nodes.contains_key(target) {
        return Err(DefinitionError::UnknownNode(target.clone()));
      }
      keep.insert(target.clone());
      keep.extend(self.transitive_dependencies(target));
    }

    let nodes: Vec<BuildNode> = keep.iter().map(|name| self.nodes[name].as_ref().clone()).collect();
    let used: BTreeSet<&SourceId> = nodes.iter().map(|n| &n.source).collect();
    let sources: Vec<SourceSpec> = self
      .sources
      .values()
      .filter(|spec| used.contains(&spec.id))
      .cloned()
      .collect();
    BuildGraph::new(sources, nodes)
  }

  /// Unordered nodes on one source must not share a working directory:
  /// the source tree itself when either builds in-source, or the
  /// (source, architecture) build directory otherwise.
  fn check_work_dir_sharing(&self) -> Result<(), DefinitionError> {
    let mut by_source: BTreeMap<&SourceId, Vec<&BuildNode>> = BTreeMap::new();
    for node in self.nodes.values() {
      by_source.entry(&node.source).or_default().push(node);
    }

    for (source_id, nodes) in by_source {
      for (i, a) in nodes.iter().enumerate() {
        for b in &nodes[i + 1..] {
          if self.is_ordered(&a.name, &b.name) {
            continue;
          }
          if a.build_dir == BuildDirMode::InSource || b.build_dir == BuildDirMode::InSource {
            return Err(DefinitionError::SharedInSourceTree {
              source_id: source_id.clone(),
              first: a.name.clone(),
              second: b.name.clone(),
            });
          }
          let b_arches = build_arches(b);
          if let Some(arch) = build_arches(a).into_iter().find(|arch| b_arches.contains(arch)) {
            return Err(DefinitionError::SharedBuildDir {
              source_id: source_id.clone(),
              arch: arch.map(|known| known.as_str()).unwrap_or("host").to_string(),
              first: a.name.clone(),
              second: b.name.clone(),
            });
          }
        }
      }
    }
    Ok(())
  }

  /// Refuse graphs where two concurrently schedulable nodes install into
  /// overlapping paths.
  ///
  /// Sysroot prefixes are merge targets: distinct sources may share them.
  /// Every other overlap, and any overlap between nodes built from the same
  /// source, needs the nodes to be ordered.
  pub fn check_install_conflicts(&self, tree: &ArtifactTree) -> Result<(), DefinitionError> {
    let mut installs: Vec<(&BuildNode, PathBuf, &InstallTarget)> = Vec::new();
    for node in self.nodes.values() {
      for sub_build in &node.sub_builds {
        let prefix = tree
          .sub_build_prefix(node, sub_build)
          .map_err(|error| DefinitionError::Layout {
            node: node.name.clone(),
            error,
          })?;
        installs.push((node, prefix, &sub_build.target));
      }
    }

    for (i, (node_a, path_a, target_a)) in installs.iter().enumerate() {
      for (node_b, path_b, target_b) in &installs[i + 1..] {
        if node_a.name == node_b.name || !overlaps(path_a, path_b) {
          continue;
        }
        let exclusive = !target_a.is_shared() || !target_b.is_shared() || node_a.source == node_b.source;
        if exclusive && !self.is_ordered(&node_a.name, &node_b.name) {
          return Err(DefinitionError::ConcurrencyConflict {
            first: node_a.name.clone(),
            second: node_b.name.clone(),
            path: path_a.clone().min(path_b.clone()),
          });
        }
      }
    }
    Ok(())
  }
}
