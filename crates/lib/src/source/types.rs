//! Source identity, origins and errors.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::hash::Hashable;

/// Shortest commit pin accepted, as in `git rev-parse --short`.
pub const MIN_COMMIT_PIN: usize = 7;
const MAX_COMMIT_PIN: usize = 40;

/// Identifier of an upstream source, unique within a graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub String);

impl SourceId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for SourceId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Where the bytes of a source come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceOrigin {
  /// A tarball downloaded over HTTP(S), optionally pinned to a SHA-256.
  Archive {
    url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sha256: Option<String>,
  },
  /// A shallow checkout of a tag or branch, optionally pinned to a commit.
  Git {
    url: String,
    rev: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    commit: Option<String>,
  },
  /// A directory or tarball already on the local filesystem.
  Local { path: PathBuf },
}

/// An upstream source artifact.
///
/// Immutable once defined. The fingerprint of a spec covers its origin and
/// unpack directory, so editing either invalidates the cached directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
  pub id: SourceId,
  #[serde(flatten)]
  pub origin: SourceOrigin,
  /// Directory name under the cache's source root. Defaults to the id.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub unpack_dir: Option<String>,
}

impl Hashable for SourceSpec {}

impl SourceSpec {
  pub fn archive(id: &str, url: &str, sha256: Option<&str>) -> Self {
    Self {
      id: SourceId::new(id),
      origin: SourceOrigin::Archive {
        url: url.to_string(),
        sha256: sha256.map(str::to_string),
      },
      unpack_dir: None,
    }
  }

  pub fn local(id: &str, path: impl Into<PathBuf>) -> Self {
    Self {
      id: SourceId::new(id),
      origin: SourceOrigin::Local { path: path.into() },
      unpack_dir: None,
    }
  }

  /// Check that declared pins can actually pin something.
  ///
  /// A commit pin is matched as a prefix of the checked-out commit, so it
  /// must be an abbreviated or full hex object id.
  pub fn validate(&self) -> Result<(), String> {
    if let SourceOrigin::Git {
      commit: Some(commit), ..
    } = &self.origin
    {
      let hex = commit.chars().all(|c| c.is_ascii_hexdigit());
      if !hex || !(MIN_COMMIT_PIN..=MAX_COMMIT_PIN).contains(&commit.len()) {
        return Err(format!(
          "commit pin '{commit}' must be {MIN_COMMIT_PIN} to {MAX_COMMIT_PIN} hex characters"
        ));
      }
    }
    Ok(())
  }

  /// Name of the directory this source unpacks into.
  pub fn dir_name(&self) -> &str {
    self.unpack_dir.as_deref().unwrap_or(self.id.as_str())
  }
}

/// Errors from resolving a source.
///
/// Cloneable so a single failed resolution can be reported to every node
/// waiting on the same identifier.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
  /// Downloaded or checked-out content does not match its declared pin.
  #[error("integrity check failed for source '{id}': expected {expected}, got {actual}")]
  Integrity {
    id: SourceId,
    expected: String,
    actual: String,
  },

  #[error("failed to download '{url}': {message}")]
  Download { url: String, message: String },

  #[error("failed to unpack source '{id}': {message}")]
  Unpack { id: SourceId, message: String },

  #[error("failed to check out '{url}' at '{rev}': {message}")]
  Checkout { url: String, rev: String, message: String },

  #[error("local source path does not exist: {0}")]
  LocalNotFound(PathBuf),

  #[error("io error at '{path}': {message}")]
  Io { path: PathBuf, message: String },

  #[error("failed to fingerprint source '{id}': {message}")]
  Fingerprint { id: SourceId, message: String },
}

impl SourceError {
  pub(crate) fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
    SourceError::Io {
      path: path.into(),
      message: err.to_string(),
    }
  }

  /// True for failures caused by content not matching its pin.
  pub fn is_integrity(&self) -> bool {
    matches!(self, SourceError::Integrity { .. })
  }
}
