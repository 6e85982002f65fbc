mod build;
mod env;
mod inspect;
mod plan;

pub use build::{BuildOptions, cmd_build};
pub use env::cmd_env;
pub use inspect::cmd_inspect;
pub use plan::cmd_plan;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use xsuite_lib::BuildGraph;
use xsuite_lib::node::NodeName;
use xsuite_lib::platform::paths::{self, BUILD_ENV, CACHE_ENV, ROOT_ENV};
use xsuite_lib::profile::EnvOverride;
use xsuite_lib::recipe::{LayoutSection, Recipe};

/// Where sources, build trees and installed artifacts live.
#[derive(Args, Debug, Default)]
pub struct LocationArgs {
  /// Source cache directory [env: XSUITE_CACHE]
  #[arg(long, value_name = "DIR")]
  pub cache: Option<PathBuf>,

  /// Install root [env: XSUITE_ROOT]
  #[arg(long, value_name = "DIR")]
  pub root: Option<PathBuf>,

  /// Build tree root [env: XSUITE_BUILD]
  #[arg(long, value_name = "DIR")]
  pub build_root: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locations {
  pub cache: PathBuf,
  pub root: PathBuf,
  pub build_root: PathBuf,
}

impl LocationArgs {
  /// Flags win over environment variables, which win over the recipe's
  /// `[layout]` section.
  pub fn resolve(&self, layout: &LayoutSection) -> Locations {
    Locations {
      cache: pick(&self.cache, CACHE_ENV, None).unwrap_or_else(paths::cache_dir),
      root: pick(&self.root, ROOT_ENV, layout.install_root.as_ref()).unwrap_or_else(paths::install_root),
      build_root: pick(&self.build_root, BUILD_ENV, layout.build_root.as_ref()).unwrap_or_else(paths::build_root),
    }
  }
}

fn pick(flag: &Option<PathBuf>, env: &str, recipe: Option<&PathBuf>) -> Option<PathBuf> {
  flag
    .clone()
    .or_else(|| std::env::var_os(env).filter(|v| !v.is_empty()).map(PathBuf::from))
    .or_else(|| recipe.cloned())
}

pub fn load_recipe(path: Option<&Path>) -> Result<Recipe> {
  match path {
    Some(path) => Recipe::load(path).with_context(|| format!("Failed to load recipe: {}", path.display())),
    None => Recipe::builtin().context("Failed to load built-in recipe"),
  }
}

/// Expand the recipe and narrow it to `only` when given.
pub fn load_graph(recipe: &Recipe, only: &[String]) -> Result<BuildGraph> {
  let graph = recipe.graph().context("Invalid recipe")?;
  if only.is_empty() {
    return Ok(graph);
  }
  let targets: Vec<NodeName> = only.iter().map(|n| NodeName::new(n.as_str())).collect();
  graph.restrict_to(&targets).context("Invalid --only selection")
}

pub fn parse_overrides(values: &[String]) -> Result<Vec<EnvOverride>> {
  values
    .iter()
    .map(|v| v.parse::<EnvOverride>().with_context(|| format!("Invalid --env value: {v}")))
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn flags_beat_recipe_layout() {
    let args = LocationArgs {
      root: Some(PathBuf::from("/flag/root")),
      ..Default::default()
    };
    let layout = LayoutSection {
      install_root: Some(PathBuf::from("/recipe/root")),
      build_root: Some(PathBuf::from("/recipe/build")),
    };

    let locations = args.resolve(&layout);

    assert_eq!(locations.root, PathBuf::from("/flag/root"));
    if std::env::var_os(BUILD_ENV).is_none() {
      assert_eq!(locations.build_root, PathBuf::from("/recipe/build"));
    }
  }

  #[test]
  fn restrict_to_unknown_node_fails() {
    let recipe = Recipe::builtin().unwrap();
    let err = load_graph(&recipe, &["gcc-riscv".to_string()]).unwrap_err();
    assert!(err.to_string().contains("--only"));
  }

  #[test]
  fn restrict_keeps_dependencies() {
    let recipe = Recipe::builtin().unwrap();
    let graph = load_graph(&recipe, &["openssl-armhf".to_string()]).unwrap();
    let names: Vec<_> = graph.nodes().map(|n| n.name.to_string()).collect();
    assert_eq!(names, vec!["openssl-armhf", "toolchain", "zlib-armhf"]);
  }

  #[test]
  fn overrides_are_validated() {
    assert_eq!(parse_overrides(&["CFLAGS?=-O0".to_string()]).unwrap()[0].name, "CFLAGS");
    assert!(parse_overrides(&["1BAD=x".to_string()]).is_err());
  }
}
