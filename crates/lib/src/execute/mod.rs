//! Graph execution.
//!
//! This module provides the [`Engine`], which runs a validated
//! [`BuildGraph`]. It handles:
//! - Dependency ordering: a node starts once all its dependencies completed
//! - Bounded parallelism across independent nodes
//! - Failure propagation: dependents of a failed node are skipped, unrelated
//!   nodes run to completion
//! - Cancellation: running stages are terminated and nothing new starts

pub mod claims;
pub mod process;
mod stage;
pub mod types;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::graph::BuildGraph;
use crate::layout::ArtifactTree;
use crate::node::NodeName;
use crate::profile::EnvOverride;
use crate::source::SourceCache;

use claims::InstallClaims;
use stage::{NodeContext, NodeOutcome, run_node};

pub use process::{Invocation, ProcessError, ProcessExecutor, ProcessOutput, ShellExecutor};
pub use types::{BuildReport, CapturedOutput, ExecuteConfig, ExecuteError, NodeFailure};

/// Runs build graphs against an artifact tree and a source cache.
pub struct Engine {
  tree: ArtifactTree,
  cache: Arc<SourceCache>,
  executor: Option<Arc<dyn ProcessExecutor>>,
  config: ExecuteConfig,
  overrides: Vec<EnvOverride>,
}

impl Engine {
  pub fn new(tree: ArtifactTree, cache: Arc<SourceCache>) -> Self {
    Self {
      tree,
      cache,
      executor: None,
      config: ExecuteConfig::default(),
      overrides: Vec::new(),
    }
  }

  pub fn with_config(mut self, config: ExecuteConfig) -> Self {
    self.config = config;
    self
  }

  /// Replace the default shell executor.
  pub fn with_executor(mut self, executor: Arc<dyn ProcessExecutor>) -> Self {
    self.executor = Some(executor);
    self
  }

  /// Environment overrides applied on top of every profile.
  pub fn with_overrides(mut self, overrides: Vec<EnvOverride>) -> Self {
    self.overrides = overrides;
    self
  }

  pub fn tree(&self) -> &ArtifactTree {
    &self.tree
  }

  /// Run every node of `graph`.
  ///
  /// Definition problems (cycles, overlapping installs between unordered
  /// nodes) are returned as `Err` before any node starts. Node failures do
  /// not abort the run; they are recorded in the returned [`BuildReport`].
  pub async fn run(&self, graph: &BuildGraph, cancel: &CancellationToken) -> Result<BuildReport, ExecuteError> {
    let started = Instant::now();
    let schedule = graph.schedule()?;
    graph.check_install_conflicts(&self.tree)?;

    let parallelism = self.config.parallelism.max(1);
    info!(
      nodes = graph.len(),
      waves = schedule.waves.len(),
      parallelism,
      "starting build"
    );

    let executor = self
      .executor
      .clone()
      .unwrap_or_else(|| {
        Arc::new(ShellExecutor::new(self.config.shell.clone()).with_output_limit(self.config.output_limit))
      });
    let ctx = Arc::new(NodeContext {
      tree: self.tree.clone(),
      cache: self.cache.clone(),
      executor,
      config: self.config.clone(),
      overrides: self.overrides.clone(),
      claims: Arc::new(InstallClaims::default()),
    });

    // Ready nodes are started in schedule order.
    let position: HashMap<NodeName, usize> = schedule
      .order
      .iter()
      .enumerate()
      .map(|(i, name)| (name.clone(), i))
      .collect();
    let mut pending: HashMap<NodeName, usize> = graph.nodes().map(|n| (n.name.clone(), n.deps.len())).collect();
    let mut ready: BTreeMap<usize, NodeName> = pending
      .iter()
      .filter(|(_, count)| **count == 0)
      .map(|(name, _)| (position[name], name.clone()))
      .collect();

    let mut report = BuildReport::default();
    let mut join_set = JoinSet::new();
    let mut running: HashMap<tokio::task::Id, NodeName> = HashMap::new();

    loop {
      while !cancel.is_cancelled() && join_set.len() < parallelism {
        let Some((_, name)) = ready.pop_first() else {
          break;
        };
        let (Some(node), Some(spec)) = (
          graph.node(&name).cloned(),
          graph.node(&name).and_then(|n| graph.source(&n.source)).cloned(),
        ) else {
          continue;
        };

        debug!(node = %name, "starting node");
        let ctx = ctx.clone();
        let cancel = cancel.clone();
        let handle = join_set.spawn(async move { run_node(&ctx, &node, &spec, &cancel).await });
        running.insert(handle.id(), name);
      }

      let Some(joined) = join_set.join_next_with_id().await else {
        break;
      };
      let id = match &joined {
        Ok((id, _)) => *id,
        Err(join_error) => join_error.id(),
      };
      let Some(name) = running.remove(&id) else {
        continue;
      };
      let result = joined.map(|(_, result)| result).unwrap_or_else(|join_error| {
        Err(NodeFailure::before_stages(ExecuteError::Aborted {
          node: name.clone(),
          message: join_error.to_string(),
        }))
      });

      match result {
        Ok(outcome) => {
          match outcome {
            NodeOutcome::Completed => {
              info!(node = %name, "node complete");
              report.completed.push(name.clone());
            }
            NodeOutcome::UpToDate => report.up_to_date.push(name.clone()),
          }
          for dependent in graph.dependents(&name) {
            if let Some(count) = pending.get_mut(&dependent) {
              *count = count.saturating_sub(1);
              if *count == 0 {
                ready.insert(position[&dependent], dependent);
              }
            }
          }
        }
        Err(failure) if matches!(failure.error, ExecuteError::Cancelled) => {
          warn!(node = %name, "node cancelled");
          report.cancelled.push(name);
        }
        Err(failure) => {
          error!(node = %name, stage = ?failure.stage, error = %failure.error, "node failed");
          for dependent in graph.transitive_dependents(&name) {
            if !report.skipped.contains_key(&dependent) {
              warn!(node = %dependent, failed_dep = %name, "skipping node due to failed dependency");
              report.skipped.insert(dependent, name.clone());
            }
          }
          report.failed.insert(name, failure);
        }
      }
    }

    // Whatever never got to run was stopped by cancellation.
    let accounted: BTreeSet<&NodeName> = report
      .completed
      .iter()
      .chain(&report.up_to_date)
      .chain(report.failed.keys())
      .chain(report.skipped.keys())
      .chain(&report.cancelled)
      .collect();
    let unrun: Vec<NodeName> = schedule
      .order
      .iter()
      .filter(|name| !accounted.contains(name))
      .cloned()
      .collect();
    report.cancelled.extend(unrun);

    report.elapsed = started.elapsed();
    info!(
      completed = report.completed.len(),
      up_to_date = report.up_to_date.len(),
      failed = report.failed.len(),
      skipped = report.skipped.len(),
      cancelled = report.cancelled.len(),
      "build finished"
    );

    Ok(report)
  }
}
