//! Keyed, fetch-once source cache.
//!
//! # Layout
//!
//! ```text
//! {root}/
//!   downloads/              # {id}-{file} tarballs, reused across runs when pinned
//!   src/
//!     {dir}/                # unpacked source tree
//!     {dir}.source.json     # marker: fingerprint of the origin
//!     .staging-{dir}/       # in-progress fetch, renamed into place
//! ```
//!
//! Within one process every identifier is resolved at most once: the first
//! caller fetches while concurrent callers wait on the same cell, and the
//! outcome (directory or error) is shared by all of them. Across processes,
//! a marker whose fingerprint matches the `SourceSpec` is a cache hit.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::fetch::{DefaultFetcher, SourceFetcher};
use super::types::{SourceError, SourceId, SourceSpec};
use crate::util::hash::{Fingerprint, Hashable};

type Slot = Arc<OnceCell<Result<PathBuf, SourceError>>>;

/// Marker written next to a resolved source directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMarker {
  pub id: SourceId,
  pub fingerprint: Fingerprint,
}

/// Shared cache of resolved source directories.
pub struct SourceCache {
  root: PathBuf,
  fetcher: Arc<dyn SourceFetcher>,
  entries: Mutex<HashMap<SourceId, Slot>>,
}

impl SourceCache {
  /// Create a cache rooted at `root` using the default fetcher.
  pub fn new(root: impl Into<PathBuf>) -> Self {
    let root = root.into();
    let fetcher = Arc::new(DefaultFetcher::new(root.join("downloads")));
    Self::with_fetcher(root, fetcher)
  }

  pub fn with_fetcher(root: impl Into<PathBuf>, fetcher: Arc<dyn SourceFetcher>) -> Self {
    Self {
      root: root.into(),
      fetcher,
      entries: Mutex::new(HashMap::new()),
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Directory a spec resolves to, whether or not it exists yet.
  pub fn source_dir(&self, spec: &SourceSpec) -> PathBuf {
    self.root.join("src").join(spec.dir_name())
  }

  fn marker_path(&self, spec: &SourceSpec) -> PathBuf {
    self.root.join("src").join(format!("{}.source.json", spec.dir_name()))
  }

  fn staging_dir(&self, spec: &SourceSpec) -> PathBuf {
    self.root.join("src").join(format!(".staging-{}", spec.dir_name()))
  }

  /// Resolve a source to its directory, fetching it on first use.
  ///
  /// Later calls for the same identifier return the first call's outcome,
  /// including its error, without fetching again.
  pub async fn resolve(&self, spec: &SourceSpec) -> Result<PathBuf, SourceError> {
    let slot = {
      let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
      entries.entry(spec.id.clone()).or_default().clone()
    };

    slot.get_or_init(|| self.resolve_uncached(spec)).await.clone()
  }

  /// The outcome of a previous resolution in this process, if any.
  pub fn resolved(&self, id: &SourceId) -> Option<Result<PathBuf, SourceError>> {
    let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
    entries.get(id).and_then(|slot| slot.get().cloned())
  }

  async fn resolve_uncached(&self, spec: &SourceSpec) -> Result<PathBuf, SourceError> {
    let fingerprint = spec.fingerprint().map_err(|e| SourceError::Fingerprint {
      id: spec.id.clone(),
      message: e.to_string(),
    })?;
    let dir = self.source_dir(spec);

    if self.marker_matches(spec, &fingerprint).await && dir.is_dir() {
      info!(source = %spec.id, path = %dir.display(), "source cache hit");
      return Ok(dir);
    }

    let src_root = self.root.join("src");
    fs::create_dir_all(&src_root)
      .await
      .map_err(|e| SourceError::io(&src_root, e))?;

    let staging = self.staging_dir(spec);
    remove_if_exists(&staging).await?;

    info!(source = %spec.id, "fetching source");
    let staged = staging.join(spec.dir_name());
    fs::create_dir_all(&staging).await.map_err(|e| SourceError::io(&staging, e))?;
    if let Err(err) = self.fetcher.fetch(spec, &staged).await {
      if let Err(cleanup) = fs::remove_dir_all(&staging).await {
        warn!(path = %staging.display(), error = %cleanup, "failed to clean staging directory");
      }
      return Err(err);
    }

    remove_if_exists(&self.marker_path(spec)).await?;
    remove_if_exists(&dir).await?;
    fs::rename(&staged, &dir).await.map_err(|e| SourceError::io(&dir, e))?;
    remove_if_exists(&staging).await?;

    let marker = SourceMarker {
      id: spec.id.clone(),
      fingerprint,
    };
    let marker_path = self.marker_path(spec);
    let json = serde_json::to_string_pretty(&marker).map_err(|e| SourceError::Io {
      path: marker_path.clone(),
      message: e.to_string(),
    })?;
    fs::write(&marker_path, json)
      .await
      .map_err(|e| SourceError::io(&marker_path, e))?;

    info!(source = %spec.id, path = %dir.display(), "source ready");
    Ok(dir)
  }

  async fn marker_matches(&self, spec: &SourceSpec, fingerprint: &Fingerprint) -> bool {
    let path = self.marker_path(spec);
    let Ok(content) = fs::read_to_string(&path).await else {
      return false;
    };
    match serde_json::from_str::<SourceMarker>(&content) {
      Ok(marker) => {
        let matches = &marker.fingerprint == fingerprint && marker.id == spec.id;
        if !matches {
          debug!(source = %spec.id, cached = %marker.fingerprint, wanted = %fingerprint, "source marker mismatch");
        }
        matches
      }
      Err(e) => {
        warn!(path = %path.display(), error = %e, "unreadable source marker");
        false
      }
    }
  }
}

async fn remove_if_exists(path: &Path) -> Result<(), SourceError> {
  let result = match fs::symlink_metadata(path).await {
    Ok(meta) if meta.is_dir() => fs::remove_dir_all(path).await,
    Ok(_) => fs::remove_file(path).await,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(e),
  };
  result.map_err(|e| SourceError::io(path, e))
}
