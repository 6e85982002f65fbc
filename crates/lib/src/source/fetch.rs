//! Source fetchers.
//!
//! A fetcher turns a [`SourceSpec`] into a populated directory. The cache
//! owns staging and deduplication; fetchers only produce bytes on disk.
//!
//! - Archives are downloaded with SHA-256 verification, then unpacked
//! - Git origins are shallow-cloned at a tag or branch
//! - Local origins are copied, or unpacked when they point at a tarball

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::archive::unpack_archive;
use super::types::{SourceError, SourceId, SourceOrigin, SourceSpec};
use crate::util::hash::{StreamHasher, digests_match, hash_file};

/// Produces the contents of a source at a destination directory.
///
/// `dest` does not exist when `fetch` is called; on success it must be a
/// directory holding the source tree.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
  async fn fetch(&self, spec: &SourceSpec, dest: &Path) -> Result<(), SourceError>;
}

/// Fetcher for archive, git and local origins.
pub struct DefaultFetcher {
  downloads: PathBuf,
  client: reqwest::Client,
}

impl DefaultFetcher {
  /// Create a fetcher that keeps downloaded tarballs under `downloads`.
  pub fn new(downloads: impl Into<PathBuf>) -> Self {
    Self {
      downloads: downloads.into(),
      client: reqwest::Client::new(),
    }
  }

  async fn fetch_archive(
    &self,
    id: &SourceId,
    url: &str,
    sha256: Option<&str>,
    dest: &Path,
  ) -> Result<(), SourceError> {
    let file = self.download(id, url, sha256).await?;
    unpack_into(id, &file, dest).await
  }

  /// Downloads are keyed by source identifier so two sources whose URLs end
  /// in the same file name never write the same file.
  fn download_path(&self, id: &SourceId, url: &str) -> PathBuf {
    self.downloads.join(format!("{}-{}", id, url_to_filename(url)))
  }

  /// Download `url` into the downloads directory, reusing a previous download
  /// when it matches the pinned hash.
  async fn download(&self, id: &SourceId, url: &str, sha256: Option<&str>) -> Result<PathBuf, SourceError> {
    fs::create_dir_all(&self.downloads)
      .await
      .map_err(|e| SourceError::io(&self.downloads, e))?;
    let dest_path = self.download_path(id, url);

    if let Some(expected) = sha256
      && dest_path.exists()
    {
      debug!(path = ?dest_path, "checking cached download");
      if let Ok(actual) = hash_file(&dest_path).await {
        if digests_match(expected, &actual) {
          info!(source = %id, path = ?dest_path, "using cached download");
          return Ok(dest_path);
        }
        debug!(expected = %expected, actual = %actual, "cached download hash mismatch, re-downloading");
      }
    }

    info!(source = %id, url = %url, "downloading");

    let download_err = |message: String| SourceError::Download {
      url: url.to_string(),
      message,
    };

    let mut response = self.client.get(url).send().await.map_err(|e| download_err(e.to_string()))?;
    if !response.status().is_success() {
      return Err(download_err(format!("HTTP {}", response.status())));
    }

    let mut part_path = dest_path.clone().into_os_string();
    part_path.push(".part");
    let part_path = PathBuf::from(part_path);
    let mut file = fs::File::create(&part_path)
      .await
      .map_err(|e| SourceError::io(&part_path, e))?;
    let mut hasher = StreamHasher::new();
    let mut size = 0usize;

    while let Some(chunk) = response.chunk().await.map_err(|e| download_err(e.to_string()))? {
      hasher.update(&chunk);
      size += chunk.len();
      file.write_all(&chunk).await.map_err(|e| SourceError::io(&part_path, e))?;
    }
    file.flush().await.map_err(|e| SourceError::io(&part_path, e))?;
    drop(file);

    let actual = hasher.finish();
    if let Some(expected) = sha256
      && !digests_match(expected, &actual)
    {
      let _ = fs::remove_file(&part_path).await;
      return Err(SourceError::Integrity {
        id: id.clone(),
        expected: expected.to_string(),
        actual,
      });
    }

    fs::rename(&part_path, &dest_path)
      .await
      .map_err(|e| SourceError::io(&dest_path, e))?;

    info!(source = %id, path = ?dest_path, size, sha256 = %actual, "download complete");
    Ok(dest_path)
  }

  async fn fetch_git(
    &self,
    id: &SourceId,
    url: &str,
    rev: &str,
    commit: Option<&str>,
    dest: &Path,
  ) -> Result<(), SourceError> {
    info!(source = %id, url = %url, rev = %rev, "cloning repository");

    let (url_owned, rev_owned, dest_owned) = (url.to_string(), rev.to_string(), dest.to_path_buf());
    let head = tokio::task::spawn_blocking(move || shallow_clone(&url_owned, &rev_owned, &dest_owned))
      .await
      .map_err(|e| SourceError::Checkout {
        url: url.to_string(),
        rev: rev.to_string(),
        message: e.to_string(),
      })??;

    if let Some(expected) = commit
      && !head.starts_with(&expected.to_ascii_lowercase())
    {
      return Err(SourceError::Integrity {
        id: id.clone(),
        expected: expected.to_string(),
        actual: head,
      });
    }

    debug!(source = %id, commit = %head, "checked out");
    Ok(())
  }
}

#[async_trait]
impl SourceFetcher for DefaultFetcher {
  async fn fetch(&self, spec: &SourceSpec, dest: &Path) -> Result<(), SourceError> {
    match &spec.origin {
      SourceOrigin::Archive { url, sha256 } => self.fetch_archive(&spec.id, url, sha256.as_deref(), dest).await,
      SourceOrigin::Git { url, rev, commit } => {
        spec.validate().map_err(|message| SourceError::Checkout {
          url: url.clone(),
          rev: rev.clone(),
          message,
        })?;
        self.fetch_git(&spec.id, url, rev, commit.as_deref(), dest).await
      }
      SourceOrigin::Local { path } => fetch_local(&spec.id, path, dest).await,
    }
  }
}

/// Unpack an archive so that its root lands exactly at `dest`.
async fn unpack_into(id: &SourceId, archive: &Path, dest: &Path) -> Result<(), SourceError> {
  let scratch = scratch_dir(dest);
  if scratch.exists() {
    fs::remove_dir_all(&scratch).await.map_err(|e| SourceError::io(&scratch, e))?;
  }

  let root = unpack_archive(id, archive, &scratch).await?;
  fs::rename(&root, dest).await.map_err(|e| SourceError::io(dest, e))?;
  if scratch.exists() {
    fs::remove_dir_all(&scratch).await.map_err(|e| SourceError::io(&scratch, e))?;
  }
  Ok(())
}

async fn fetch_local(id: &SourceId, path: &Path, dest: &Path) -> Result<(), SourceError> {
  if !path.exists() {
    return Err(SourceError::LocalNotFound(path.to_path_buf()));
  }

  if path.is_file() {
    debug!(source = %id, path = %path.display(), "unpacking local archive");
    return unpack_into(id, path, dest).await;
  }

  debug!(source = %id, path = %path.display(), "copying local tree");
  let (from, to) = (path.to_path_buf(), dest.to_path_buf());
  tokio::task::spawn_blocking(move || copy_tree(&from, &to))
    .await
    .map_err(|e| SourceError::Io {
      path: path.to_path_buf(),
      message: e.to_string(),
    })?
}

/// Recursively copy a directory tree, preserving symlinks.
fn copy_tree(from: &Path, to: &Path) -> Result<(), SourceError> {
  for entry in WalkDir::new(from).follow_links(false) {
    let entry = entry.map_err(|e| SourceError::Io {
      path: from.to_path_buf(),
      message: e.to_string(),
    })?;
    let rel = entry.path().strip_prefix(from).map_err(|e| SourceError::Io {
      path: entry.path().to_path_buf(),
      message: e.to_string(),
    })?;
    let target = to.join(rel);
    let file_type = entry.file_type();

    if file_type.is_dir() {
      std::fs::create_dir_all(&target).map_err(|e| SourceError::io(&target, e))?;
    } else if file_type.is_symlink() {
      let link = std::fs::read_link(entry.path()).map_err(|e| SourceError::io(entry.path(), e))?;
      #[cfg(unix)]
      std::os::unix::fs::symlink(&link, &target).map_err(|e| SourceError::io(&target, e))?;
      #[cfg(not(unix))]
      std::fs::copy(entry.path().parent().unwrap_or(from).join(&link), &target)
        .map_err(|e| SourceError::io(&target, e))?;
    } else {
      std::fs::copy(entry.path(), &target).map_err(|e| SourceError::io(&target, e))?;
    }
  }
  Ok(())
}

/// Clone `url` at `rev` with depth 1 and return the checked-out commit.
fn shallow_clone(url: &str, rev: &str, dest: &Path) -> Result<String, SourceError> {
  let checkout_err = |message: String| SourceError::Checkout {
    url: url.to_string(),
    rev: rev.to_string(),
    message,
  };

  let depth = NonZeroU32::MIN;
  let prepared = gix::prepare_clone(url, dest).map_err(|e| checkout_err(e.to_string()))?;
  let mut prepared = prepared
    .with_shallow(gix::remote::fetch::Shallow::DepthAtRemote(depth))
    .with_ref_name(Some(rev))
    .map_err(|e| checkout_err(e.to_string()))?;

  let (mut checkout, _outcome) = prepared
    .fetch_then_checkout(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
    .map_err(|e| checkout_err(e.to_string()))?;

  let (repo, _outcome) = checkout
    .main_worktree(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
    .map_err(|e| checkout_err(e.to_string()))?;

  let mut head = repo.head().map_err(|e| checkout_err(e.to_string()))?;
  let commit = head.peel_to_commit().map_err(|e| checkout_err(e.to_string()))?;
  Ok(commit.id.to_string())
}

/// Sibling scratch directory used while unpacking into `dest`.
fn scratch_dir(dest: &Path) -> PathBuf {
  let name = dest
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_default();
  dest.with_file_name(format!(".unpack-{name}"))
}

/// Convert a URL to a safe filename.
///
/// Takes the last path component and sanitizes it. Falls back to a hash of
/// the URL if no suitable filename can be extracted.
pub fn url_to_filename(url: &str) -> String {
  if let Some(filename) = url.rsplit('/').next() {
    let filename = filename.split('?').next().unwrap_or(filename);
    let sanitized: String = filename
      .chars()
      .map(|c| {
        if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
          c
        } else {
          '_'
        }
      })
      .collect();

    if !sanitized.is_empty() && sanitized != "." && sanitized != ".." {
      return sanitized;
    }
  }

  let hash = crate::util::hash::hash_bytes(url.as_bytes());
  format!("download-{}", &hash[..16])
}
