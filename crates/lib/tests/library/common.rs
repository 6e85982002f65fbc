//! Shared helpers for library integration tests.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_compression::tokio::write::GzipEncoder;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tar::{Builder, Header};
use xsuite_lib::node::{BuildNode, InstallTarget, StageKind, SubBuild};
use xsuite_lib::platform::Arch;
use xsuite_lib::source::SourceSpec;
use xsuite_lib::{ArtifactTree, Engine, ExecuteConfig, SourceCache};

/// Isolated artifact tree, build root and source cache per test.
pub struct TestEnv {
  pub temp: TempDir,
  pub tree: ArtifactTree,
  pub cache: Arc<SourceCache>,
}

impl TestEnv {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    let root = dunce::canonicalize(temp.path()).unwrap();
    let tree = ArtifactTree::new(root.join("out"), root.join("build"));
    let cache = Arc::new(SourceCache::new(root.join("cache")));
    Self { temp, tree, cache }
  }

  /// A local directory source holding `files`.
  pub fn local_source(&self, id: &str, files: &[(&str, &str)]) -> SourceSpec {
    let dir = self.temp.path().join("upstream").join(id);
    std::fs::create_dir_all(&dir).unwrap();
    for (name, contents) in files {
      let path = dir.join(name);
      std::fs::create_dir_all(path.parent().unwrap()).unwrap();
      std::fs::write(path, contents).unwrap();
    }
    SourceSpec::local(id, dir)
  }

  pub fn engine(&self, parallelism: usize) -> Engine {
    Engine::new(self.tree.clone(), self.cache.clone()).with_config(ExecuteConfig {
      parallelism,
      jobs: 2,
      ..Default::default()
    })
  }

  /// File every logging stage appends `{node}:{stage}` to.
  pub fn log_path(&self) -> PathBuf {
    self.temp.path().join("stages.log")
  }

  pub fn log_lines(&self) -> Vec<String> {
    std::fs::read_to_string(self.log_path())
      .unwrap_or_default()
      .lines()
      .map(str::to_string)
      .collect()
  }

  /// A sysroot node whose three stages only record that they ran.
  pub fn logging_node(&self, name: &str, source: &str, arch: Arch) -> BuildNode {
    let mut node = BuildNode::new(name, source).arch(arch);
    for kind in [StageKind::Configure, StageKind::Build, StageKind::Install] {
      node = node.stage(kind, format!("echo \"$NODE:{kind}\" >> \"$LOG\""));
    }
    node.sub_build(self.logged_sub_build(InstallTarget::Sysroot))
  }

  pub fn logged_sub_build(&self, target: InstallTarget) -> SubBuild {
    SubBuild {
      label: "default".to_string(),
      target,
      arch: None,
      env: BTreeMap::from([("LOG".to_string(), self.log_path().display().to_string())]),
    }
  }
}

/// Gzip-compressed tarball bytes with every file under `top/`.
pub async fn tarball(top: &str, files: &[(&str, &str)]) -> Vec<u8> {
  let mut builder = Builder::new(GzipEncoder::new(Vec::new()));
  for (name, contents) in files {
    let mut header = Header::new_ustar();
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
      .append_data(&mut header, format!("{top}/{name}"), contents.as_bytes())
      .await
      .unwrap();
  }
  let mut encoder = builder.into_inner().await.unwrap();
  encoder.shutdown().await.unwrap();
  encoder.into_inner()
}

pub fn sha256_hex(bytes: &[u8]) -> String {
  use sha2::{Digest, Sha256};
  hex::encode(Sha256::digest(bytes))
}

/// Minimal HTTP server answering every request with the same body.
pub struct FileServer {
  pub addr: std::net::SocketAddr,
  hits: Arc<AtomicUsize>,
  task: JoinHandle<()>,
}

impl FileServer {
  pub async fn start(body: Vec<u8>) -> Self {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let body = Arc::new(body);

    let task = tokio::spawn(async move {
      while let Ok((mut stream, _)) = listener.accept().await {
        counter.fetch_add(1, Ordering::SeqCst);
        let body = body.clone();
        tokio::spawn(async move {
          let mut request = Vec::new();
          let mut buf = [0u8; 1024];
          while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            match stream.read(&mut buf).await {
              Ok(0) | Err(_) => break,
              Ok(n) => request.extend_from_slice(&buf[..n]),
            }
          }
          let header = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: application/gzip\r\nConnection: close\r\n\r\n",
            body.len()
          );
          let _ = stream.write_all(header.as_bytes()).await;
          let _ = stream.write_all(&body).await;
          let _ = stream.shutdown().await;
        });
      }
    });

    Self { addr, hits, task }
  }

  pub fn url(&self, file: &str) -> String {
    format!("http://{}/{file}", self.addr)
  }

  pub fn hits(&self) -> usize {
    self.hits.load(Ordering::SeqCst)
  }
}

impl Drop for FileServer {
  fn drop(&mut self) {
    self.task.abort();
  }
}
