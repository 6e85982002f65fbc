//! Running a single node.
//!
//! A node runs in this order:
//! 1. resolve its source through the shared cache
//! 2. build one profile per sub-build
//! 3. clear its completion marker and claim its install prefixes
//! 4. run the stage list once per sub-build, stopping at the first failure
//! 5. inspect run-paths when requested, then write the completion marker
//!
//! Nothing in steps 1-3 spawns a process, so a node whose source fails
//! verification never starts a stage.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::claims::{ClaimRequest, InstallClaims};
use super::process::{Invocation, ProcessError, ProcessExecutor, tail};
use super::types::{CapturedOutput, ExecuteConfig, ExecuteError, NodeFailure};
use crate::consts::SOURCE_DATE_EPOCH;
use crate::inspect::inspect_tree;
use crate::layout::ArtifactTree;
use crate::node::{BuildDirMode, BuildNode, InstallTarget, ProfileKind, SubBuild};
use crate::profile::{
  EnvOverride, EnvironmentProfile, ProfileOptions, RuntimeLink, build_host_profile, build_profile,
};
use crate::source::{SourceCache, SourceSpec};

/// Everything a node task needs, shared across tasks.
pub(crate) struct NodeContext {
  pub tree: ArtifactTree,
  pub cache: Arc<SourceCache>,
  pub executor: Arc<dyn ProcessExecutor>,
  pub config: ExecuteConfig,
  pub overrides: Vec<EnvOverride>,
  pub claims: Arc<InstallClaims>,
}

/// How a node finished when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeOutcome {
  Completed,
  UpToDate,
}

/// A sub-build with everything resolved ahead of running it.
struct PreparedSubBuild<'a> {
  sub_build: &'a SubBuild,
  prefix: PathBuf,
  work_dir: PathBuf,
  profile: EnvironmentProfile,
}

pub(crate) async fn run_node(
  ctx: &NodeContext,
  node: &BuildNode,
  spec: &SourceSpec,
  cancel: &CancellationToken,
) -> Result<NodeOutcome, NodeFailure> {
  if ctx.config.skip_complete && ctx.tree.is_complete(&node.name) {
    info!(node = %node.name, "already complete, skipping");
    return Ok(NodeOutcome::UpToDate);
  }

  let src_dir = ctx.cache.resolve(spec).await.map_err(NodeFailure::before_stages)?;
  let prepared = prepare(ctx, node, &src_dir).map_err(NodeFailure::before_stages)?;

  ctx
    .tree
    .clear_marker(&node.name)
    .await
    .map_err(|e| NodeFailure::before_stages(ExecuteError::io(ctx.tree.marker_path(&node.name), e)))?;

  let requests: Vec<ClaimRequest> = prepared
    .iter()
    .map(|p| ClaimRequest {
      path: p.prefix.clone(),
      shared: p.sub_build.target.is_shared(),
    })
    .collect();
  let _claim = ctx
    .claims
    .claim(&node.name, &node.source, &requests)
    .map_err(NodeFailure::before_stages)?;

  let tmp_dir = ctx.tree.build_root().join(".tmp").join(node.name.as_str());
  for dir in prepared
    .iter()
    .flat_map(|p| [&p.work_dir, &p.prefix])
    .chain(std::iter::once(&tmp_dir))
  {
    fs::create_dir_all(dir)
      .await
      .map_err(|e| NodeFailure::before_stages(ExecuteError::io(dir, e)))?;
  }

  for (index, sub) in prepared.iter().enumerate() {
    let env = stage_env(ctx, node, sub, &src_dir, &tmp_dir);
    for stage in &node.stages {
      if stage.once && index > 0 {
        debug!(node = %node.name, stage = %stage.kind, sub_build = %sub.sub_build.label, "once-only stage already ran");
        continue;
      }

      let failure = |error: ExecuteError, output: Option<CapturedOutput>| NodeFailure {
        error,
        stage: Some(stage.kind),
        sub_build: Some(sub.sub_build.label.clone()),
        output,
      };

      if cancel.is_cancelled() {
        return Err(failure(ExecuteError::Cancelled, None));
      }

      info!(node = %node.name, stage = %stage.kind, sub_build = %sub.sub_build.label, "running stage");
      let invocation = Invocation {
        command: stage.command.clone(),
        cwd: sub.work_dir.clone(),
        env: env.clone(),
      };

      let output = match ctx.executor.run(&invocation, cancel).await {
        Ok(output) => output,
        Err(ProcessError::Cancelled) => return Err(failure(ExecuteError::Cancelled, None)),
        Err(ProcessError::Spawn { message, .. }) => {
          return Err(failure(
            ExecuteError::Spawn {
              node: node.name.clone(),
              stage: stage.kind,
              message,
            },
            None,
          ));
        }
      };

      if !output.success {
        if !output.stderr.is_empty() {
          debug!(node = %node.name, stderr = %output.stderr, "stage stderr");
        }
        if !output.stdout.is_empty() {
          debug!(node = %node.name, stdout = %output.stdout, "stage stdout");
        }
        let captured = CapturedOutput {
          stdout: tail(&output.stdout, ctx.config.output_limit),
          stderr: tail(&output.stderr, ctx.config.output_limit),
        };
        return Err(failure(
          ExecuteError::StageFailure {
            node: node.name.clone(),
            stage: stage.kind,
            sub_build: sub.sub_build.label.clone(),
            exit_status: output.status,
          },
          Some(captured),
        ));
      }
    }
  }

  if node.check_run_paths {
    check_run_paths(node, &prepared).await?;
  }

  let prefixes = prepared.iter().map(|p| p.prefix.clone()).collect();
  ctx
    .tree
    .write_marker(&node.name, prefixes)
    .await
    .map_err(|e| NodeFailure::before_stages(ExecuteError::io(ctx.tree.marker_path(&node.name), e)))?;

  Ok(NodeOutcome::Completed)
}

fn prepare<'a>(
  ctx: &NodeContext,
  node: &'a BuildNode,
  src_dir: &Path,
) -> Result<Vec<PreparedSubBuild<'a>>, ExecuteError> {
  node
    .sub_builds
    .iter()
    .map(|sub_build| {
      let arch = node.arch_for(sub_build);
      let prefix = ctx.tree.sub_build_prefix(node, sub_build)?;
      let work_dir = match node.build_dir {
        BuildDirMode::InSource => src_dir.to_path_buf(),
        BuildDirMode::OutOfSource => ctx.tree.build_dir(&node.source, arch),
      };

      let mut options = ProfileOptions {
        overrides: ctx.overrides.clone(),
        ..Default::default()
      };
      let profile = match (node.profile, arch) {
        (ProfileKind::Host, _) | (_, None) => build_host_profile(&ctx.tree, &options),
        (ProfileKind::Target, Some(arch)) => build_profile(arch, &ctx.tree, &options)?,
        (ProfileKind::Runtime, Some(arch)) => {
          options.runtime = Some(RuntimeLink::new(&prefix).with_origins(node.run_path_origins.clone()));
          build_profile(arch, &ctx.tree, &options)?
        }
      };

      Ok(PreparedSubBuild {
        sub_build,
        prefix,
        work_dir,
        profile,
      })
    })
    .collect()
}

/// Isolation variables, then the profile, then per-node locations, then the
/// sub-build's own variables.
fn stage_env(
  ctx: &NodeContext,
  node: &BuildNode,
  sub: &PreparedSubBuild<'_>,
  src_dir: &Path,
  tmp_dir: &Path,
) -> BTreeMap<String, String> {
  let mut env = BTreeMap::new();
  let tmp = tmp_dir.display().to_string();
  for (key, value) in [
    ("HOME", "/homeless-shelter"),
    ("LANG", "C"),
    ("LC_ALL", "C"),
    ("SOURCE_DATE_EPOCH", SOURCE_DATE_EPOCH),
    ("TMPDIR", tmp.as_str()),
    ("TMP", tmp.as_str()),
    ("TEMP", tmp.as_str()),
  ] {
    env.insert(key.to_string(), value.to_string());
  }

  env.extend(sub.profile.env());

  env.insert("SRC_DIR".to_string(), src_dir.display().to_string());
  env.insert("BUILD_DIR".to_string(), sub.work_dir.display().to_string());
  env.insert("PREFIX".to_string(), sub.prefix.display().to_string());
  env.insert("JOBS".to_string(), ctx.config.jobs.max(1).to_string());
  env.insert("NODE".to_string(), node.name.to_string());
  env.insert("SUB_BUILD".to_string(), sub.sub_build.label.clone());
  if let Some(arch) = node.arch_for(sub.sub_build) {
    env.insert("SYSROOT".to_string(), ctx.tree.sysroot(arch).display().to_string());
    env.insert("TARGET".to_string(), arch.triple().to_string());
  }

  env.extend(sub.sub_build.env.iter().map(|(k, v)| (k.clone(), v.clone())));
  env
}

async fn check_run_paths(node: &BuildNode, prepared: &[PreparedSubBuild<'_>]) -> Result<(), NodeFailure> {
  let failure = |error: ExecuteError| NodeFailure {
    error,
    stage: node.stages.last().map(|s| s.kind),
    sub_build: None,
    output: None,
  };

  let mut findings = Vec::new();
  for sub in prepared {
    if sub.sub_build.target.is_shared() || matches!(sub.sub_build.target, InstallTarget::Toolchain) {
      continue;
    }
    let root = sub.prefix.clone();
    let report = tokio::task::spawn_blocking(move || inspect_tree(&root))
      .await
      .map_err(|e| {
        failure(ExecuteError::Aborted {
          node: node.name.clone(),
          message: e.to_string(),
        })
      })?
      .map_err(|e| failure(e.into()))?;

    info!(
      node = %node.name,
      elf_files = report.elf_files,
      with_run_paths = report.with_run_paths,
      "inspected run-paths"
    );
    findings.extend(report.findings);
  }

  if findings.is_empty() {
    Ok(())
  } else {
    Err(failure(ExecuteError::RunPathLeak {
      node: node.name.clone(),
      findings,
    }))
  }
}
