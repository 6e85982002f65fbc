//! Types for graph execution.
//!
//! This module defines the error types, report types, and configuration
//! for running a build graph.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::consts::DEFAULT_OUTPUT_LIMIT;
use crate::graph::DefinitionError;
use crate::inspect::{InspectError, RunPathFinding};
use crate::layout::LayoutError;
use crate::node::{NodeName, StageKind};
use crate::profile::ProfileError;
use crate::source::SourceError;

/// Errors that can occur while running a graph or one of its nodes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecuteError {
  #[error(transparent)]
  Definition(#[from] DefinitionError),

  /// Source resolution failed; includes integrity failures.
  #[error(transparent)]
  Source(#[from] SourceError),

  #[error(transparent)]
  Profile(#[from] ProfileError),

  #[error(transparent)]
  Layout(#[from] LayoutError),

  #[error(transparent)]
  Inspect(#[from] InspectError),

  /// A stage command exited unsuccessfully.
  #[error("node '{node}' failed in {stage} stage (sub-build '{sub_build}') with exit status {}", format_status(.exit_status))]
  StageFailure {
    node: NodeName,
    stage: StageKind,
    sub_build: String,
    exit_status: Option<i32>,
  },

  #[error("node '{node}' could not start {stage} stage: {message}")]
  Spawn {
    node: NodeName,
    stage: StageKind,
    message: String,
  },

  /// Installed binaries carry run-paths that do not stay inside the tree.
  #[error("node '{node}' installed {} file(s) with non-relative run-paths", .findings.len())]
  RunPathLeak {
    node: NodeName,
    findings: Vec<RunPathFinding>,
  },

  /// Another running node holds an overlapping install path.
  #[error("node '{node}' install path {} overlaps '{holder}', which is still running", .path.display())]
  ConcurrencyConflict {
    node: NodeName,
    holder: NodeName,
    path: PathBuf,
  },

  #[error("io error at '{path}': {message}")]
  Io { path: PathBuf, message: String },

  /// The task running a node panicked or was aborted.
  #[error("node '{node}' task aborted: {message}")]
  Aborted { node: NodeName, message: String },

  #[error("cancelled")]
  Cancelled,
}

impl ExecuteError {
  pub(crate) fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
    ExecuteError::Io {
      path: path.into(),
      message: err.to_string(),
    }
  }
}

fn format_status(status: &Option<i32>) -> String {
  match status {
    Some(code) => code.to_string(),
    None => "signal".to_string(),
  }
}

/// Output of the stage that failed, tail-truncated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
  pub stdout: String,
  pub stderr: String,
}

/// Why a node did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFailure {
  pub error: ExecuteError,
  /// The stage that was running, `None` if the node failed before any stage.
  pub stage: Option<StageKind>,
  pub sub_build: Option<String>,
  pub output: Option<CapturedOutput>,
}

impl NodeFailure {
  pub fn before_stages(error: impl Into<ExecuteError>) -> Self {
    Self {
      error: error.into(),
      stage: None,
      sub_build: None,
      output: None,
    }
  }
}

/// Result of running a graph.
#[derive(Debug, Default)]
pub struct BuildReport {
  /// Nodes whose stages all succeeded, in completion order.
  pub completed: Vec<NodeName>,

  /// Nodes not run because a completion marker was already present.
  pub up_to_date: Vec<NodeName>,

  /// Nodes that failed.
  pub failed: BTreeMap<NodeName, NodeFailure>,

  /// Nodes never started because a dependency failed.
  /// Maps skipped node -> the failed node that caused the skip.
  pub skipped: BTreeMap<NodeName, NodeName>,

  /// Nodes interrupted or never started because the run was cancelled.
  pub cancelled: Vec<NodeName>,

  pub elapsed: Duration,
}

impl BuildReport {
  /// Returns true if every node completed or was already up to date.
  pub fn is_success(&self) -> bool {
    self.failed.is_empty() && self.skipped.is_empty() && self.cancelled.is_empty()
  }

  /// Returns the total number of nodes accounted for.
  pub fn total(&self) -> usize {
    self.completed.len() + self.up_to_date.len() + self.failed.len() + self.skipped.len() + self.cancelled.len()
  }
}

/// Configuration for graph execution.
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  /// Maximum number of nodes running at once.
  pub parallelism: usize,

  /// Value exported as `JOBS` for stage commands to fan out with.
  pub jobs: usize,

  /// Shell to run stage commands with. Defaults to `/bin/sh`.
  pub shell: Option<String>,

  /// Skip nodes whose completion marker is present.
  pub skip_complete: bool,

  /// Bytes of stdout/stderr kept for a failed stage.
  pub output_limit: usize,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    let cpus = num_cpus();
    Self {
      parallelism: cpus,
      jobs: cpus,
      shell: None,
      skip_complete: false,
      output_limit: DEFAULT_OUTPUT_LIMIT,
    }
  }
}

/// Get the number of CPUs for default parallelism.
fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}
