//! Source resolution against a local HTTP server.

use std::path::PathBuf;

use tokio::task::JoinHandle;
use xsuite_lib::SourceCache;
use xsuite_lib::source::{SourceError, SourceId, SourceSpec};

use super::common::{FileServer, TestEnv, sha256_hex, tarball};

#[tokio::test]
async fn archive_is_unpacked_without_top_level_dir() {
  let env = TestEnv::new();
  let body = tarball("libffi-3.4.6", &[("configure", "#!/bin/sh\n"), ("src/ffi.c", "int x;\n")]).await;
  let server = FileServer::start(body.clone()).await;
  let spec = SourceSpec::archive("libffi", &server.url("libffi-3.4.6.tar.gz"), Some(&sha256_hex(&body)));

  let dir = env.cache.resolve(&spec).await.unwrap();

  assert_eq!(dir, env.cache.source_dir(&spec));
  assert!(dir.join("configure").is_file());
  assert!(dir.join("src/ffi.c").is_file());
}

#[tokio::test]
async fn concurrent_resolves_download_once() {
  let env = TestEnv::new();
  let body = tarball("zlib-1.3.1", &[("configure", "")]).await;
  let server = FileServer::start(body.clone()).await;
  let spec = SourceSpec::archive("zlib", &server.url("zlib-1.3.1.tar.gz"), Some(&sha256_hex(&body)));

  let mut handles = Vec::new();
  for _ in 0..8 {
    let cache = env.cache.clone();
    let spec = spec.clone();
    handles.push(tokio::spawn(async move { cache.resolve(&spec).await }));
  }
  let dirs: Vec<_> = join_all(handles).await;

  assert!(dirs.windows(2).all(|w| w[0] == w[1]));
  assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn marker_makes_later_runs_offline() {
  let env = TestEnv::new();
  let body = tarball("openssl-3.0.15", &[("Configure", "")]).await;
  let server = FileServer::start(body.clone()).await;
  let spec = SourceSpec::archive("openssl", &server.url("openssl-3.0.15.tar.gz"), Some(&sha256_hex(&body)));
  env.cache.resolve(&spec).await.unwrap();

  let fresh = SourceCache::new(env.cache.root());
  let dir = fresh.resolve(&spec).await.unwrap();

  assert!(dir.join("Configure").is_file());
  assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn integrity_failure_is_shared_and_leaves_nothing() {
  let env = TestEnv::new();
  let server = FileServer::start(tarball("python", &[("configure", "")]).await).await;
  let spec = SourceSpec::archive("python", &server.url("Python-3.12.7.tar.xz"), Some(&"ab".repeat(32)));

  let first = env.cache.resolve(&spec).await.unwrap_err();
  let second = env.cache.resolve(&spec).await.unwrap_err();

  assert!(first.is_integrity());
  assert_eq!(first, second);
  assert_eq!(server.hits(), 1);
  assert!(!env.cache.source_dir(&spec).exists());
  assert_eq!(env.cache.resolved(&SourceId::new("python")), Some(Err(first)));
}

#[tokio::test]
async fn unreachable_url_is_a_download_error() {
  let env = TestEnv::new();
  let spec = SourceSpec::archive("zlib", "http://127.0.0.1:9/zlib.tar.gz", None);

  let err = env.cache.resolve(&spec).await.unwrap_err();

  assert!(matches!(err, SourceError::Download { .. }));
}

#[tokio::test]
async fn local_directory_source() {
  let env = TestEnv::new();
  let spec = env.local_source("util-linux", &[("configure", ""), ("libuuid/src/gen_uuid.c", "")]);

  let dir = env.cache.resolve(&spec).await.unwrap();

  assert!(dir.join("libuuid/src/gen_uuid.c").is_file());
}

async fn join_all(handles: Vec<JoinHandle<Result<PathBuf, SourceError>>>) -> Vec<PathBuf> {
  let mut out = Vec::new();
  for handle in handles {
    out.push(handle.await.unwrap().unwrap());
  }
  out
}
