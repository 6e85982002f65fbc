//! Test utilities for xsuite-lib.
//!
//! Helpers for building scratch source trees and archives without network
//! access.

use std::path::Path;

use async_compression::tokio::write::GzipEncoder;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_tar::{Builder, Header};

async fn append_files<W: AsyncWrite + Unpin + Send + Sync>(builder: &mut Builder<W>, files: &[(&str, &str)]) {
  for (name, contents) in files {
    let mut header = Header::new_ustar();
    header.set_size(contents.len() as u64);
    header.set_mode(0o755);
    header.set_cksum();
    builder.append_data(&mut header, name, contents.as_bytes()).await.unwrap();
  }
}

/// Write an uncompressed tarball containing `files`.
pub async fn write_tar(path: &Path, files: &[(&str, &str)]) {
  let file = tokio::fs::File::create(path).await.unwrap();
  let mut builder = Builder::new(file);
  append_files(&mut builder, files).await;
  let mut file = builder.into_inner().await.unwrap();
  file.flush().await.unwrap();
}

/// Write a gzip-compressed tarball containing `files`.
pub async fn write_tar_gz(path: &Path, files: &[(&str, &str)]) {
  let file = tokio::fs::File::create(path).await.unwrap();
  let mut builder = Builder::new(GzipEncoder::new(file));
  append_files(&mut builder, files).await;
  let mut encoder = builder.into_inner().await.unwrap();
  encoder.shutdown().await.unwrap();
}

/// Create a plain directory tree with the given files.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
  for (name, contents) in files {
    let path = root.join(name);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
  }
}
