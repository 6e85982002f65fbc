//! End-to-end graph runs through the shell executor.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use xsuite_lib::execute::ExecuteError;
use xsuite_lib::graph::DefinitionError;
use xsuite_lib::node::{InstallTarget, NodeName, ProfileKind, StageKind};
use xsuite_lib::platform::Arch;
use xsuite_lib::source::{SourceError, SourceSpec};
use xsuite_lib::{BuildGraph, BuildNode};

use super::common::{FileServer, TestEnv, sha256_hex, tarball};

fn name(n: &str) -> NodeName {
  NodeName::new(n)
}

#[tokio::test]
async fn failed_node_skips_dependents_and_keeps_stderr() {
  let env = TestEnv::new();
  let sources = [
    env.local_source("libffi", &[("configure", "")]),
    env.local_source("python", &[("configure", "")]),
    env.local_source("zlib", &[("configure", "")]),
  ];
  let mut libffi = env.logging_node("libffi", "libffi", Arch::Armhf);
  libffi.stages[1].command = "echo 'ld: cannot find -lc' >&2; exit 2".to_string();
  let graph = BuildGraph::new(
    sources,
    [
      libffi,
      env.logging_node("python", "python", Arch::Armhf).depends_on("libffi"),
      env.logging_node("zlib", "zlib", Arch::Armhf),
    ],
  )
  .unwrap();

  let report = env.engine(4).run(&graph, &CancellationToken::new()).await.unwrap();

  assert!(!report.is_success());
  assert_eq!(report.completed, vec![name("zlib")]);
  assert_eq!(report.skipped.get(&name("python")), Some(&name("libffi")));

  let failure = &report.failed[&name("libffi")];
  assert_eq!(failure.stage, Some(StageKind::Build));
  assert!(matches!(
    failure.error,
    ExecuteError::StageFailure {
      exit_status: Some(2),
      ..
    }
  ));
  assert!(failure.output.as_ref().unwrap().stderr.contains("cannot find -lc"));

  let log = env.log_lines();
  assert!(log.contains(&"libffi:configure".to_string()));
  assert!(!log.iter().any(|line| line.starts_with("python:")));
  assert!(env.tree.is_complete(&name("zlib")));
  assert!(!env.tree.is_complete(&name("libffi")));
}

#[tokio::test]
async fn dependent_configure_starts_after_dependency_install() {
  let env = TestEnv::new();
  let graph = BuildGraph::new(
    [env.local_source("openssl", &[]), env.local_source("python", &[])],
    [
      env.logging_node("openssl", "openssl", Arch::Aarch64),
      env.logging_node("python", "python", Arch::Aarch64).depends_on("openssl"),
    ],
  )
  .unwrap();

  let report = env.engine(8).run(&graph, &CancellationToken::new()).await.unwrap();

  assert!(report.is_success());
  let log = env.log_lines();
  let at = |line: &str| log.iter().position(|l| l == line).unwrap();
  assert!(at("openssl:install") < at("python:configure"));
}

#[tokio::test]
async fn independent_nodes_overlap_in_time() {
  let env = TestEnv::new();
  let node = |n: &str| {
    let mut node = env.logging_node(n, n, Arch::Armhf);
    node.stages[1].command = "echo \"$NODE:start\" >> \"$LOG\"; sleep 0.3; echo \"$NODE:end\" >> \"$LOG\"".to_string();
    node
  };
  let graph = BuildGraph::new(
    [env.local_source("libffi", &[]), env.local_source("zlib", &[])],
    [node("libffi"), node("zlib")],
  )
  .unwrap();

  let report = env.engine(2).run(&graph, &CancellationToken::new()).await.unwrap();

  assert!(report.is_success());
  let log = env.log_lines();
  let at = |line: &str| log.iter().position(|l| l == line).unwrap();
  assert!(at("libffi:start") < at("zlib:end"));
  assert!(at("zlib:start") < at("libffi:end"));
}

#[tokio::test]
async fn overlapping_exclusive_installs_refused_before_any_stage() {
  let env = TestEnv::new();
  let runtime = InstallTarget::Runtime {
    component: "python".to_string(),
    version: "3.12.7".to_string(),
  };
  let node = |n: &str, source: &str| {
    BuildNode::new(n, source)
      .arch(Arch::Armhf)
      .stage(StageKind::Install, "echo \"$NODE:install\" >> \"$LOG\"")
      .sub_build(env.logged_sub_build(runtime.clone()))
  };
  let graph = BuildGraph::new(
    [env.local_source("python", &[]), env.local_source("python-git", &[])],
    [node("python-a", "python"), node("python-b", "python-git")],
  )
  .unwrap();

  let err = env.engine(2).run(&graph, &CancellationToken::new()).await.unwrap_err();

  match err {
    ExecuteError::Definition(DefinitionError::ConcurrencyConflict { first, second, path }) => {
      assert_eq!((first, second), (name("python-a"), name("python-b")));
      assert!(path.ends_with("python/3.12.7/armhf"));
    }
    other => panic!("unexpected error: {other}"),
  }
  assert!(env.log_lines().is_empty());
}

#[tokio::test]
async fn integrity_mismatch_spawns_no_stage() {
  let env = TestEnv::new();
  let server = FileServer::start(tarball("zlib-1.3.1", &[("configure", "")]).await).await;
  let spec = SourceSpec::archive("zlib", &server.url("zlib-1.3.1.tar.gz"), Some(&"0".repeat(64)));
  let graph = BuildGraph::new(
    [spec, env.local_source("python", &[])],
    [
      env.logging_node("zlib", "zlib", Arch::Armhf),
      env.logging_node("python", "python", Arch::Armhf).depends_on("zlib"),
    ],
  )
  .unwrap();

  let report = env.engine(2).run(&graph, &CancellationToken::new()).await.unwrap();

  let failure = &report.failed[&name("zlib")];
  assert_eq!(failure.stage, None);
  match &failure.error {
    ExecuteError::Source(SourceError::Integrity { expected, actual, .. }) => {
      assert_eq!(expected, &"0".repeat(64));
      assert_ne!(actual, expected);
    }
    other => panic!("unexpected error: {other}"),
  }
  assert_eq!(report.skipped.get(&name("python")), Some(&name("zlib")));
  assert!(env.log_lines().is_empty());
}

#[tokio::test]
async fn shared_source_is_downloaded_once() {
  let env = TestEnv::new();
  let body = tarball("zlib-1.3.1", &[("configure", "#!/bin/sh\n")]).await;
  let sha = sha256_hex(&body);
  let server = FileServer::start(body).await;
  let spec = SourceSpec::archive("zlib", &server.url("zlib-1.3.1.tar.gz"), Some(&sha));

  let mut graph_nodes = Vec::new();
  for arch in Arch::ALL {
    let mut node = env.logging_node(&format!("zlib-{arch}"), "zlib", arch);
    node.stages[0].command = "test -f \"$SRC_DIR/configure\" && echo \"$NODE:configure\" >> \"$LOG\"".to_string();
    graph_nodes.push(node);
  }
  let graph = BuildGraph::new([spec], graph_nodes).unwrap();

  let report = env.engine(2).run(&graph, &CancellationToken::new()).await.unwrap();

  assert!(report.is_success(), "{report:?}");
  assert_eq!(report.completed.len(), 2);
  assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn cycle_rejected_before_execution() {
  let env = TestEnv::new();
  let err = BuildGraph::new(
    [env.local_source("a", &[])],
    [
      env.logging_node("a", "a", Arch::Armhf).depends_on("b"),
      env.logging_node("b", "a", Arch::Armhf).depends_on("a"),
    ],
  )
  .unwrap_err();

  assert_eq!(
    err,
    DefinitionError::Cycle {
      nodes: vec![name("a"), name("b")]
    }
  );
  assert!(env.log_lines().is_empty());
}

#[tokio::test]
async fn cancellation_terminates_running_stage() {
  let env = TestEnv::new();
  let mut slow = env.logging_node("toolchain", "ct-ng", Arch::Aarch64);
  slow.stages[1].command = "sleep 30".to_string();
  let graph = BuildGraph::new(
    [env.local_source("ct-ng", &[]), env.local_source("zlib", &[])],
    [slow, env.logging_node("zlib", "zlib", Arch::Aarch64).depends_on("toolchain")],
  )
  .unwrap();

  let cancel = CancellationToken::new();
  let trigger = cancel.clone();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(300)).await;
    trigger.cancel();
  });

  let started = Instant::now();
  let report = env.engine(2).run(&graph, &cancel).await.unwrap();

  assert!(started.elapsed() < Duration::from_secs(20));
  assert_eq!(report.cancelled, vec![name("toolchain"), name("zlib")]);
  assert!(!env.tree.is_complete(&name("toolchain")));
  assert!(!env.log_lines().contains(&"toolchain:install".to_string()));
}

#[tokio::test]
async fn stages_see_isolated_environment() {
  let env = TestEnv::new();
  let mut node = env.logging_node("zlib", "zlib", Arch::Armhf);
  node.stages[0].command =
    "printf '%s\\n' \"CC=$CC\" \"HOME=$HOME\" \"SYSROOT=$SYSROOT\" \"USER=${USER:-unset}\" >> \"$LOG\"".to_string();
  let graph = BuildGraph::new([env.local_source("zlib", &[])], [node]).unwrap();

  let report = env.engine(1).run(&graph, &CancellationToken::new()).await.unwrap();

  assert!(report.is_success());
  let log = env.log_lines();
  assert!(log.contains(&"CC=arm-linux-gnueabihf-gcc".to_string()));
  assert!(log.contains(&"HOME=/homeless-shelter".to_string()));
  assert!(log.contains(&format!("SYSROOT={}", env.tree.sysroot(Arch::Armhf).display())));
  assert!(log.contains(&"USER=unset".to_string()));
}

#[tokio::test]
async fn runtime_node_with_absolute_run_path_fails() {
  let has_cc = std::process::Command::new("cc")
    .arg("--version")
    .output()
    .is_ok_and(|o| o.status.success());
  if !has_cc {
    return;
  }

  let env = TestEnv::new();
  let python = BuildNode::new("python", "python")
    .arch(Arch::Aarch64)
    .profile(ProfileKind::Runtime)
    .stage(
      StageKind::Install,
      "mkdir -p \"$PREFIX/bin\" && printf 'int main(void){return 0;}\\n' > m.c && \
       cc m.c -o \"$PREFIX/bin/python3\" -Wl,--enable-new-dtags -Wl,-rpath,/opt/leak/lib",
    )
    .installs(InstallTarget::Runtime {
      component: "python".to_string(),
      version: "3.12.7".to_string(),
    })
    .check_run_paths(true);
  let graph = BuildGraph::new([env.local_source("python", &[])], [python]).unwrap();

  let report = env.engine(1).run(&graph, &CancellationToken::new()).await.unwrap();

  match &report.failed[&name("python")].error {
    ExecuteError::RunPathLeak { findings, .. } => {
      assert_eq!(findings.len(), 1);
      assert_eq!(findings[0].entry, "/opt/leak/lib");
    }
    other => panic!("unexpected error: {other}"),
  }
  assert!(!env.tree.is_complete(&name("python")));
}

#[tokio::test]
async fn skip_complete_leaves_finished_nodes_alone() {
  let env = TestEnv::new();
  let graph = BuildGraph::new(
    [env.local_source("zlib", &[])],
    [env.logging_node("zlib", "zlib", Arch::Armhf)],
  )
  .unwrap();
  env.engine(1).run(&graph, &CancellationToken::new()).await.unwrap();
  let first = env.log_lines().len();

  let engine = env.engine(1).with_config(xsuite_lib::ExecuteConfig {
    skip_complete: true,
    ..Default::default()
  });
  let report = engine.run(&graph, &CancellationToken::new()).await.unwrap();

  assert_eq!(report.up_to_date, vec![name("zlib")]);
  assert_eq!(env.log_lines().len(), first);

  let marker = env.tree.read_marker(&name("zlib")).await.unwrap();
  assert_eq!(marker.prefixes, vec![env.tree.sysroot(Arch::Armhf)]);
}
