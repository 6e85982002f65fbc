//! Build node definitions.
//!
//! A [`BuildNode`] is plain data: a source reference, an ordered stage list
//! and one or more sub-builds. Nodes are never mutated once a graph has been
//! built from them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::platform::Arch;
use crate::source::SourceId;

/// Unique name of a node within a graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeName(pub String);

impl NodeName {
  pub fn new(name: impl Into<String>) -> Self {
    Self(name.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for NodeName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl From<&str> for NodeName {
  fn from(s: &str) -> Self {
    Self(s.to_string())
  }
}

/// Phase of a node's work. Stages of a node run in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
  Configure,
  Build,
  Install,
}

impl StageKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      StageKind::Configure => "configure",
      StageKind::Build => "build",
      StageKind::Install => "install",
    }
  }
}

impl fmt::Display for StageKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A shell command run for one phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
  pub kind: StageKind,
  pub command: String,
  /// Run only for the first sub-build (e.g. bootstrapping a shared tool).
  #[serde(default)]
  pub once: bool,
}

impl Stage {
  pub fn new(kind: StageKind, command: impl Into<String>) -> Self {
    Self {
      kind,
      command: command.into(),
      once: false,
    }
  }
}

/// Where a node's stages run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildDirMode {
  /// Inside the resolved source directory. Only one node may use a source
  /// this way unless the graph orders them.
  InSource,
  /// In a scratch directory keyed by (source, architecture).
  #[default]
  OutOfSource,
}

/// Install destination of a sub-build within the artifact tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum InstallTarget {
  /// The shared cross-toolchain, `toolchain/{triple}` when an architecture
  /// is known.
  Toolchain,
  /// The architecture's sysroot. Several nodes merge into it.
  Sysroot,
  /// A self-contained runtime tree, `{component}/{version}/{arch}`.
  Runtime { component: String, version: String },
}

impl InstallTarget {
  /// True when the prefix may be shared by several nodes' installs.
  pub fn is_shared(&self) -> bool {
    matches!(self, InstallTarget::Sysroot)
  }
}

/// One pass of a node's stage list against a specific prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubBuild {
  pub label: String,
  pub target: InstallTarget,
  /// Overrides the node's architecture for this pass.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub arch: Option<Arch>,
  /// Extra variables applied after the profile.
  #[serde(default)]
  pub env: BTreeMap<String, String>,
}

impl SubBuild {
  pub fn new(label: impl Into<String>, target: InstallTarget) -> Self {
    Self {
      label: label.into(),
      target,
      arch: None,
      env: BTreeMap::new(),
    }
  }
}

/// Which environment profile a node's stages run under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileKind {
  /// The build machine's own compiler.
  Host,
  /// The cross-toolchain for the node's architecture.
  #[default]
  Target,
  /// `Target` plus relative run-path linker flags.
  Runtime,
}

/// A unit of work in the build graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildNode {
  pub name: NodeName,
  pub source: SourceId,
  pub arch: Option<Arch>,
  pub profile: ProfileKind,
  pub stages: Vec<Stage>,
  pub build_dir: BuildDirMode,
  pub sub_builds: Vec<SubBuild>,
  pub deps: BTreeSet<NodeName>,
  /// Inspect installed ELF files for non-relative run-paths after install.
  pub check_run_paths: bool,
  /// Install-prefix subdirectories whose binaries need run-paths, for
  /// runtime profiles.
  pub run_path_origins: Vec<String>,
}

impl BuildNode {
  /// A node with no stages, no sub-builds and no dependencies.
  pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
    Self {
      name: NodeName::new(name),
      source: SourceId::new(source),
      arch: None,
      profile: ProfileKind::Target,
      stages: Vec::new(),
      build_dir: BuildDirMode::OutOfSource,
      sub_builds: Vec::new(),
      deps: BTreeSet::new(),
      check_run_paths: false,
      run_path_origins: Vec::new(),
    }
  }

  pub fn arch(mut self, arch: Arch) -> Self {
    self.arch = Some(arch);
    self
  }

  pub fn profile(mut self, profile: ProfileKind) -> Self {
    self.profile = profile;
    self
  }

  pub fn stage(mut self, kind: StageKind, command: impl Into<String>) -> Self {
    self.stages.push(Stage::new(kind, command));
    self
  }

  pub fn in_source(mut self) -> Self {
    self.build_dir = BuildDirMode::InSource;
    self
  }

  /// Add a sub-build labelled `default` installing to `target`.
  pub fn installs(mut self, target: InstallTarget) -> Self {
    self.sub_builds.push(SubBuild::new("default", target));
    self
  }

  pub fn sub_build(mut self, sub_build: SubBuild) -> Self {
    self.sub_builds.push(sub_build);
    self
  }

  pub fn depends_on(mut self, dep: impl Into<String>) -> Self {
    self.deps.insert(NodeName::new(dep));
    self
  }

  pub fn check_run_paths(mut self, check: bool) -> Self {
    self.check_run_paths = check;
    self
  }

  /// Architecture a sub-build installs for.
  pub fn arch_for(&self, sub_build: &SubBuild) -> Option<Arch> {
    sub_build.arch.or(self.arch)
  }

  /// Check the node's internal consistency.
  ///
  /// Returns a human readable reason on failure.
  pub fn validate(&self) -> Result<(), String> {
    if self.name.as_str().is_empty() {
      return Err("node name is empty".to_string());
    }
    if self.stages.is_empty() {
      return Err("node has no stages".to_string());
    }
    if let Some(pair) = self.stages.windows(2).find(|w| w[0].kind > w[1].kind) {
      return Err(format!("stage '{}' is declared after '{}'", pair[1].kind, pair[0].kind));
    }
    if self.sub_builds.is_empty() {
      return Err("node has no sub-builds".to_string());
    }

    let mut labels = BTreeSet::new();
    for sub_build in &self.sub_builds {
      if !labels.insert(sub_build.label.as_str()) {
        return Err(format!("duplicate sub-build label '{}'", sub_build.label));
      }
      let needs_arch = !matches!(sub_build.target, InstallTarget::Toolchain) || self.profile != ProfileKind::Host;
      if needs_arch && self.arch_for(sub_build).is_none() {
        return Err(format!("sub-build '{}' needs a target architecture", sub_build.label));
      }
    }

    if self.deps.contains(&self.name) {
      return Err("node depends on itself".to_string());
    }
    Ok(())
  }
}
