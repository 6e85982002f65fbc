//! Implementation of the `xsuite plan` command.
//!
//! Prints the build order as waves of nodes that may run in parallel.

use std::path::Path;

use anyhow::{Context, Result};

use xsuite_lib::ArtifactTree;
use xsuite_lib::tree_lock::{LockMode, TreeLock};

use super::{LocationArgs, load_graph, load_recipe};
use crate::output::{OutputFormat, print_json, print_stat, symbols};

pub fn cmd_plan(recipe: Option<&Path>, only: &[String], locations: &LocationArgs, format: OutputFormat) -> Result<()> {
  let recipe = load_recipe(recipe)?;
  let locations = locations.resolve(&recipe.layout);
  let graph = load_graph(&recipe, only)?;

  let _lock = TreeLock::acquire(&locations.root, LockMode::Shared, "plan")?;
  let tree = ArtifactTree::new(&locations.root, &locations.build_root);
  graph.check_install_conflicts(&tree).context("Invalid recipe")?;
  let schedule = graph.schedule()?;

  if format.is_json() {
    let waves: Vec<Vec<serde_json::Value>> = schedule
      .waves
      .iter()
      .map(|wave| {
        wave
          .iter()
          .filter_map(|name| graph.node(name))
          .map(|node| {
            serde_json::json!({
              "name": node.name,
              "source": node.source,
              "arch": node.arch,
              "deps": node.deps,
              "prefixes": tree.node_prefixes(node).unwrap_or_default(),
              "complete": tree.is_complete(&node.name),
            })
          })
          .collect()
      })
      .collect();
    return print_json(&serde_json::json!({ "nodes": graph.len(), "waves": waves }));
  }

  for (i, wave) in schedule.waves.iter().enumerate() {
    println!("Wave {}:", i + 1);
    for name in wave {
      let Some(node) = graph.node(name) else {
        continue;
      };
      let arch = node.arch.map(|a| a.to_string()).unwrap_or_else(|| "host".to_string());
      let status = if tree.is_complete(name) { " (complete)" } else { "" };
      println!("  {} {} [{}, {}]{}", symbols::ARROW, name, node.source, arch, status);
    }
  }
  println!();
  print_stat("Nodes", &graph.len().to_string());
  print_stat("Waves", &schedule.waves.len().to_string());
  Ok(())
}
