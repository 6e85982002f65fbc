//! On-disk artifact layout.
//!
//! # Structure
//!
//! ```text
//! {root}/
//!   toolchain/{triple}/       # shared cross-toolchain, one per target
//!   sysroot/{arch}/           # per-architecture headers and libraries
//!   {component}/{version}/{arch}/   # self-contained runtime trees
//!   .xsuite/{node}.complete   # completion markers
//! {build_root}/{source}-{arch|host}/   # out-of-source build directories
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;

use crate::consts::{MARKER_DIR, MARKER_SUFFIX, SYSROOT_DIR, TOOLCHAIN_DIR};
use crate::node::{BuildNode, InstallTarget, NodeName, SubBuild};
use crate::platform::Arch;
use crate::source::SourceId;

/// Errors from mapping nodes onto the artifact tree.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LayoutError {
  #[error("component name '{0}' collides with a reserved directory")]
  ReservedComponent(String),

  #[error("invalid path segment '{0}'")]
  InvalidSegment(String),

  #[error("install target {target} needs a target architecture")]
  MissingArch { target: String },
}

/// Completion marker recorded after a node's last sub-build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionMarker {
  pub version: u32,
  pub status: String,
  pub node: NodeName,
  pub prefixes: Vec<PathBuf>,
}

/// The installation root and build scratch root.
#[derive(Debug, Clone)]
pub struct ArtifactTree {
  root: PathBuf,
  build_root: PathBuf,
}

impl ArtifactTree {
  pub fn new(root: impl Into<PathBuf>, build_root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      build_root: build_root.into(),
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn build_root(&self) -> &Path {
    &self.build_root
  }

  /// Root of the shared cross-toolchain installs.
  pub fn toolchain_root(&self) -> PathBuf {
    self.root.join(TOOLCHAIN_DIR)
  }

  /// Install prefix of one architecture's cross-toolchain.
  pub fn toolchain_prefix(&self, arch: Arch) -> PathBuf {
    self.toolchain_root().join(arch.triple())
  }

  /// Directory holding `{triple}-gcc` and friends.
  pub fn toolchain_bin(&self, arch: Arch) -> PathBuf {
    self.toolchain_prefix(arch).join("bin")
  }

  pub fn sysroot(&self, arch: Arch) -> PathBuf {
    self.root.join(SYSROOT_DIR).join(arch.as_str())
  }

  /// Prefix of a runtime tree for one architecture.
  pub fn runtime_prefix(&self, component: &str, version: &str, arch: Arch) -> Result<PathBuf, LayoutError> {
    check_segment(component)?;
    check_segment(version)?;
    if [TOOLCHAIN_DIR, SYSROOT_DIR, MARKER_DIR].contains(&component) {
      return Err(LayoutError::ReservedComponent(component.to_string()));
    }
    Ok(self.root.join(component).join(version).join(arch.as_str()))
  }

  /// Install prefix for a sub-build targeting `target`.
  pub fn install_prefix(&self, target: &InstallTarget, arch: Option<Arch>) -> Result<PathBuf, LayoutError> {
    let require_arch = |name: &str| {
      arch.ok_or_else(|| LayoutError::MissingArch {
        target: name.to_string(),
      })
    };
    match target {
      InstallTarget::Toolchain => Ok(match arch {
        Some(arch) => self.toolchain_prefix(arch),
        None => self.toolchain_root(),
      }),
      InstallTarget::Sysroot => Ok(self.sysroot(require_arch("sysroot")?)),
      InstallTarget::Runtime { component, version } => {
        self.runtime_prefix(component, version, require_arch(component)?)
      }
    }
  }

  /// Install prefix of one of a node's sub-builds.
  pub fn sub_build_prefix(&self, node: &BuildNode, sub_build: &SubBuild) -> Result<PathBuf, LayoutError> {
    self.install_prefix(&sub_build.target, node.arch_for(sub_build))
  }

  /// Every install prefix a node writes to.
  pub fn node_prefixes(&self, node: &BuildNode) -> Result<Vec<PathBuf>, LayoutError> {
    node
      .sub_builds
      .iter()
      .map(|sub_build| self.sub_build_prefix(node, sub_build))
      .collect()
  }

  /// Out-of-source build directory keyed by (source, architecture).
  pub fn build_dir(&self, source: &SourceId, arch: Option<Arch>) -> PathBuf {
    let suffix = arch.map(|a| a.as_str()).unwrap_or("host");
    self.build_root.join(format!("{}-{}", source, suffix))
  }

  pub fn marker_path(&self, node: &NodeName) -> PathBuf {
    self
      .root
      .join(MARKER_DIR)
      .join(format!("{}.{}", node.as_str(), MARKER_SUFFIX))
  }

  pub fn is_complete(&self, node: &NodeName) -> bool {
    self.marker_path(node).is_file()
  }

  /// Read a node's completion marker, if present and readable.
  pub async fn read_marker(&self, node: &NodeName) -> Option<CompletionMarker> {
    let content = fs::read_to_string(self.marker_path(node)).await.ok()?;
    serde_json::from_str(&content).ok()
  }

  pub async fn write_marker(&self, node: &NodeName, prefixes: Vec<PathBuf>) -> std::io::Result<()> {
    let path = self.marker_path(node);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).await?;
    }
    let marker = CompletionMarker {
      version: 1,
      status: "complete".to_string(),
      node: node.clone(),
      prefixes,
    };
    let content = serde_json::to_string(&marker).map_err(std::io::Error::other)?;
    fs::write(path, format!("{}\n", content)).await
  }

  /// Remove a node's marker so a partial run reads as not installed.
  pub async fn clear_marker(&self, node: &NodeName) -> std::io::Result<()> {
    match fs::remove_file(self.marker_path(node)).await {
      Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
      _ => Ok(()),
    }
  }
}

fn check_segment(segment: &str) -> Result<(), LayoutError> {
  if segment.is_empty() || segment == "." || segment == ".." || segment.contains('/') || segment.contains('\\') {
    return Err(LayoutError::InvalidSegment(segment.to_string()));
  }
  Ok(())
}
