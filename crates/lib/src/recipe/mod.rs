//! TOML recipes describing sources and build nodes.
//!
//! ```toml
//! [sources.zlib]
//! kind = "archive"
//! url = "https://zlib.net/fossils/zlib-1.3.1.tar.gz"
//!
//! [[nodes]]
//! name = "zlib-{arch}"
//! source = "zlib"
//! arches = ["armhf", "aarch64"]
//! install = { kind = "sysroot" }
//! stages = [{ kind = "install", command = "make install" }]
//! ```

mod expand;
mod types;

use std::path::Path;

use tracing::debug;

use crate::graph::BuildGraph;
use crate::node::BuildNode;
use crate::source::{SourceId, SourceSpec};

pub use expand::substitute;
pub use types::{LayoutSection, NodeEntry, Recipe, RecipeError, SourceEntry};

/// The recipe for the full suite, compiled into the binary.
pub const BUILTIN_RECIPE: &str = include_str!("../../recipes/suite.toml");

impl Recipe {
  /// Parse recipe text. `origin` names it in error messages.
  pub fn parse(text: &str, origin: &str) -> Result<Self, RecipeError> {
    toml::from_str(text).map_err(|e| RecipeError::Parse {
      origin: origin.to_string(),
      message: e.to_string(),
    })
  }

  pub fn load(path: &Path) -> Result<Self, RecipeError> {
    let text = std::fs::read_to_string(path).map_err(|e| RecipeError::Read {
      path: path.to_path_buf(),
      message: e.to_string(),
    })?;
    debug!(path = %path.display(), "loaded recipe");
    Self::parse(&text, &path.display().to_string())
  }

  pub fn builtin() -> Result<Self, RecipeError> {
    Self::parse(BUILTIN_RECIPE, "(builtin)")
  }

  pub fn source_specs(&self) -> Vec<SourceSpec> {
    self
      .sources
      .iter()
      .map(|(id, entry)| SourceSpec {
        id: SourceId::new(id.as_str()),
        origin: entry.origin.clone(),
        unpack_dir: entry.unpack_dir.clone(),
      })
      .collect()
  }

  /// Every node after per-architecture expansion, in declaration order.
  pub fn build_nodes(&self) -> Result<Vec<BuildNode>, RecipeError> {
    let mut nodes = Vec::new();
    for entry in &self.nodes {
      nodes.extend(expand::expand_entry(entry)?);
    }
    Ok(nodes)
  }

  /// Expand and validate into a graph.
  pub fn graph(&self) -> Result<BuildGraph, RecipeError> {
    let graph = BuildGraph::new(self.source_specs(), self.build_nodes()?)?;
    debug!(nodes = graph.len(), "expanded recipe");
    Ok(graph)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::graph::DefinitionError;
  use crate::layout::ArtifactTree;
  use crate::node::{InstallTarget, NodeName, ProfileKind};
  use crate::platform::Arch;
  use crate::source::SourceOrigin;

  #[test]
  fn builtin_recipe_is_a_valid_graph() {
    let recipe = Recipe::builtin().unwrap();
    let graph = recipe.graph().unwrap();

    assert_eq!(graph.len(), 12);
    let tree = ArtifactTree::new("/out", "/build");
    graph.check_install_conflicts(&tree).unwrap();

    let schedule = graph.schedule().unwrap();
    assert_eq!(schedule.waves[0], vec![NodeName::new("toolchain")]);
    assert_eq!(schedule.waves.len(), 4);
    assert_eq!(
      schedule.waves.last(),
      Some(&vec![NodeName::new("python-aarch64"), NodeName::new("python-armhf")])
    );
  }

  #[test]
  fn builtin_python_checks_run_paths() {
    let graph = Recipe::builtin().unwrap().graph().unwrap();
    let python = graph.node(&NodeName::new("python-armhf")).unwrap();

    assert_eq!(python.profile, ProfileKind::Runtime);
    assert!(python.check_run_paths);
    assert_eq!(python.arch, Some(Arch::Armhf));
    assert!(matches!(
      &python.sub_builds[0].target,
      InstallTarget::Runtime { component, version } if component == "python" && version == "3.12.7"
    ));
    assert!(python.deps.contains(&NodeName::new("openssl-armhf")));
  }

  #[test]
  fn builtin_toolchain_has_sub_build_per_arch() {
    let graph = Recipe::builtin().unwrap().graph().unwrap();
    let toolchain = graph.node(&NodeName::new("toolchain")).unwrap();

    assert_eq!(toolchain.sub_builds.len(), 2);
    assert_eq!(toolchain.sub_builds[0].env["CT_SAMPLE"], "arm-cortexa9_neon-linux-gnueabihf");
    assert!(toolchain.stages[0].once);
  }

  #[test]
  fn parses_sources() {
    let recipe = Recipe::parse(
      r#"
[sources.local]
kind = "local"
path = "/srv/src/zlib"
unpack_dir = "zlib-src"

[sources.tools]
kind = "git"
url = "https://example.invalid/tools.git"
rev = "v1.0"
"#,
      "test",
    )
    .unwrap();

    let specs = recipe.source_specs();
    assert_eq!(specs.len(), 2);
    assert_eq!(specs[0].dir_name(), "zlib-src");
    assert!(matches!(&specs[1].origin, SourceOrigin::Git { rev, commit: None, .. } if rev == "v1.0"));
  }

  #[test]
  fn parses_layout() {
    let recipe = Recipe::parse("[layout]\ninstall_root = \"/opt/suite\"\n", "test").unwrap();
    assert_eq!(recipe.layout.install_root.as_deref(), Some(Path::new("/opt/suite")));
    assert!(recipe.layout.build_root.is_none());
  }

  #[test]
  fn unknown_field_is_a_parse_error() {
    let err = Recipe::parse("[[nodes]]\nname = \"a\"\nsrc = \"b\"\n", "custom.toml").unwrap_err();
    assert!(matches!(err, RecipeError::Parse { ref origin, .. } if origin == "custom.toml"));
  }

  #[test]
  fn unknown_dependency_is_a_definition_error() {
    let recipe = Recipe::parse(
      r#"
[sources.zlib]
kind = "archive"
url = "https://example.invalid/zlib.tar.gz"

[[nodes]]
name = "zlib-{arch}"
source = "zlib"
arches = ["armhf"]
install = { kind = "sysroot" }
deps = ["toolchain"]
stages = [{ kind = "install", command = "make install" }]
"#,
      "test",
    )
    .unwrap();

    assert!(matches!(
      recipe.graph().unwrap_err(),
      RecipeError::Definition(DefinitionError::UnknownDependency { .. })
    ));
  }

  #[test]
  fn load_reports_missing_file() {
    let err = Recipe::load(Path::new("/nonexistent/recipe.toml")).unwrap_err();
    assert!(matches!(err, RecipeError::Read { .. }));
  }
}
