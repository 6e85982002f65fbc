//! Turning `[[nodes]]` entries into build nodes.

use std::collections::BTreeMap;

use crate::node::{BuildNode, NodeName, Stage, SubBuild};
use crate::platform::Arch;
use crate::source::SourceId;

use super::types::{NodeEntry, RecipeError};

/// Replace `{arch}` and `{triple}` with the values for `arch`.
pub fn substitute(text: &str, arch: Arch) -> String {
  text.replace("{arch}", arch.as_str()).replace("{triple}", arch.triple())
}

/// Expand one entry into the nodes it stands for.
pub fn expand_entry(entry: &NodeEntry) -> Result<Vec<BuildNode>, RecipeError> {
  for key in entry.arch_vars.keys() {
    if key.parse::<Arch>().is_err() {
      return Err(RecipeError::UnknownArch {
        node: entry.name.clone(),
        arch: key.clone(),
      });
    }
  }

  if entry.install_per_arch {
    if entry.arches.is_empty() {
      return Err(RecipeError::NoArches {
        node: entry.name.clone(),
      });
    }
    let mut node = base_node(entry, &entry.name, entry.stages.clone(), entry.deps.iter().cloned());
    for &arch in &entry.arches {
      node.sub_builds.push(SubBuild {
        label: arch.as_str().to_string(),
        target: entry.install.clone(),
        arch: Some(arch),
        env: vars_for(entry, Some(arch)),
      });
    }
    return Ok(vec![node]);
  }

  if entry.arches.is_empty() {
    let node = base_node(entry, &entry.name, entry.stages.clone(), entry.deps.iter().cloned())
      .installs(entry.install.clone());
    return Ok(vec![with_default_env(node, vars_for(entry, None))]);
  }

  if entry.arches.len() > 1 && !entry.name.contains("{arch}") {
    return Err(RecipeError::MissingArchPlaceholder {
      node: entry.name.clone(),
    });
  }

  Ok(
    entry
      .arches
      .iter()
      .map(|&arch| {
        let stages = entry
          .stages
          .iter()
          .map(|stage| Stage {
            command: substitute(&stage.command, arch),
            ..stage.clone()
          })
          .collect();
        let deps = entry.deps.iter().map(|dep| substitute(dep, arch));
        let mut node = base_node(entry, &substitute(&entry.name, arch), stages, deps).installs(entry.install.clone());
        node.arch = Some(arch);
        with_default_env(node, vars_for(entry, Some(arch)))
      })
      .collect(),
  )
}

fn base_node(entry: &NodeEntry, name: &str, stages: Vec<Stage>, deps: impl Iterator<Item = String>) -> BuildNode {
  BuildNode {
    name: NodeName::new(name),
    source: SourceId::new(entry.source.as_str()),
    arch: None,
    profile: entry.profile,
    stages,
    build_dir: entry.build_dir,
    sub_builds: Vec::new(),
    deps: deps.map(NodeName::new).collect(),
    check_run_paths: entry.check_run_paths,
    run_path_origins: entry.run_path_origins.clone(),
  }
}

fn with_default_env(mut node: BuildNode, env: BTreeMap<String, String>) -> BuildNode {
  for sub in &mut node.sub_builds {
    sub.env = env.clone();
  }
  node
}

/// Shared variables, then the architecture's own.
fn vars_for(entry: &NodeEntry, arch: Option<Arch>) -> BTreeMap<String, String> {
  let Some(arch) = arch else {
    return entry.vars.clone();
  };
  let arch_specific = entry.arch_vars.get(arch.as_str()).into_iter().flatten();
  entry
    .vars
    .iter()
    .chain(arch_specific)
    .map(|(k, v)| (k.clone(), substitute(v, arch)))
    .collect()
}
