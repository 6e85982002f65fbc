use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

use crate::graph::DefinitionError;
use crate::node::{BuildDirMode, InstallTarget, ProfileKind, Stage};
use crate::platform::Arch;
use crate::source::SourceOrigin;

#[derive(Debug, Error)]
pub enum RecipeError {
  #[error("failed to read recipe {path}: {message}")]
  Read { path: PathBuf, message: String },

  #[error("invalid recipe {origin}: {message}")]
  Parse { origin: String, message: String },

  #[error("node '{node}' has variables for unknown architecture '{arch}'")]
  UnknownArch { node: String, arch: String },

  #[error("node '{node}' expands to several architectures but its name has no {{arch}} placeholder")]
  MissingArchPlaceholder { node: String },

  #[error("node '{node}' installs per architecture but lists no arches")]
  NoArches { node: String },

  #[error(transparent)]
  Definition(#[from] DefinitionError),
}

/// A build graph described as data.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Recipe {
  #[serde(default)]
  pub layout: LayoutSection,
  #[serde(default)]
  pub sources: BTreeMap<String, SourceEntry>,
  #[serde(default)]
  pub nodes: Vec<NodeEntry>,
}

/// Optional artifact locations; command-line flags and environment win.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayoutSection {
  pub install_root: Option<PathBuf>,
  pub build_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceEntry {
  #[serde(flatten)]
  pub origin: SourceOrigin,
  pub unpack_dir: Option<String>,
}

/// One `[[nodes]]` table, possibly standing for one node per architecture.
///
/// `name`, `deps`, stage commands and variable values may use `{arch}` and
/// `{triple}`. With `install_per_arch` the entry becomes a single node with
/// one sub-build per architecture instead.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeEntry {
  pub name: String,
  pub source: String,
  #[serde(default)]
  pub arches: Vec<Arch>,
  #[serde(default)]
  pub profile: ProfileKind,
  #[serde(default)]
  pub build_dir: BuildDirMode,
  pub install: InstallTarget,
  #[serde(default)]
  pub install_per_arch: bool,
  #[serde(default)]
  pub deps: Vec<String>,
  pub stages: Vec<Stage>,
  #[serde(default)]
  pub vars: BTreeMap<String, String>,
  #[serde(default)]
  pub arch_vars: BTreeMap<String, BTreeMap<String, String>>,
  #[serde(default)]
  pub check_run_paths: bool,
  #[serde(default)]
  pub run_path_origins: Vec<String>,
}
