//! Implementation of the `xsuite build` command.
//!
//! Runs the recipe's graph against the artifact tree while holding the tree
//! lock exclusively. Ctrl-C cancels the build: running stages are terminated
//! and no further node starts.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use xsuite_lib::tree_lock::{LockMode, TreeLock};
use xsuite_lib::{ArtifactTree, BuildReport, Engine, ExecuteConfig, SourceCache};

use super::{LocationArgs, load_graph, load_recipe, parse_overrides};
use crate::output::{format_duration, print_error, print_info, print_stat, print_success, print_warning};

pub struct BuildOptions {
  pub recipe: Option<PathBuf>,
  pub only: Vec<String>,
  pub locations: LocationArgs,
  pub parallel: Option<usize>,
  pub jobs: Option<usize>,
  pub skip_complete: bool,
  pub env: Vec<String>,
  pub shell: Option<String>,
}

pub fn cmd_build(options: BuildOptions) -> Result<()> {
  let recipe = load_recipe(options.recipe.as_deref())?;
  let locations = options.locations.resolve(&recipe.layout);
  let graph = load_graph(&recipe, &options.only)?;
  let overrides = parse_overrides(&options.env)?;

  let command = std::env::args().collect::<Vec<_>>().join(" ");
  let _lock = TreeLock::acquire(&locations.root, LockMode::Exclusive, &command)?;

  let mut config = ExecuteConfig::default();
  if let Some(parallel) = options.parallel {
    config.parallelism = parallel.max(1);
  }
  if let Some(jobs) = options.jobs {
    config.jobs = jobs.max(1);
  }
  config.skip_complete = options.skip_complete;
  config.shell = options.shell;

  let tree = ArtifactTree::new(&locations.root, &locations.build_root);
  let cache = Arc::new(SourceCache::new(&locations.cache));
  let engine = Engine::new(tree, cache).with_config(config).with_overrides(overrides);

  print_info(&format!(
    "Building {} node(s) into {}",
    graph.len(),
    locations.root.display()
  ));

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let cancel = CancellationToken::new();
  let report = rt
    .block_on(async {
      let trigger = cancel.clone();
      tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
          warn!("interrupt received, cancelling build");
          trigger.cancel();
        }
      });
      engine.run(&graph, &cancel).await
    })
    .context("Build failed")?;

  print_report(&report);

  if !report.is_success() {
    bail!(
      "{} node(s) failed, {} skipped, {} cancelled",
      report.failed.len(),
      report.skipped.len(),
      report.cancelled.len()
    );
  }
  Ok(())
}

fn print_report(report: &BuildReport) {
  println!();
  for name in &report.completed {
    print_success(name.as_str());
  }
  for name in &report.up_to_date {
    print_info(&format!("{name} (up to date)"));
  }
  for (name, failure) in &report.failed {
    let location = match (&failure.stage, &failure.sub_build) {
      (Some(stage), Some(sub)) => format!(" during {stage} ({sub})"),
      (Some(stage), None) => format!(" during {stage}"),
      _ => String::new(),
    };
    print_error(&format!("{name} failed{location}: {}", failure.error));
    if let Some(output) = &failure.output
      && !output.stderr.is_empty()
    {
      for line in output.stderr.lines() {
        eprintln!("    {line}");
      }
    }
  }
  for (name, root) in &report.skipped {
    print_warning(&format!("{name} skipped: dependency {root} failed"));
  }
  for name in &report.cancelled {
    print_warning(&format!("{name} cancelled"));
  }

  println!();
  print_stat("Completed", &report.completed.len().to_string());
  print_stat("Up to date", &report.up_to_date.len().to_string());
  print_stat("Failed", &report.failed.len().to_string());
  print_stat("Skipped", &report.skipped.len().to_string());
  print_stat("Cancelled", &report.cancelled.len().to_string());
  print_stat("Elapsed", &format_duration(report.elapsed));
}
