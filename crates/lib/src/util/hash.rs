//! Hashing utilities for source verification and cache fingerprints.
//!
//! This module provides:
//! - `Fingerprint`: a truncated hash identifying a serializable value
//! - `hash_bytes()` / `hash_file()`: full SHA-256 digests for verification
//! - `StreamHasher`: incremental hashing while a download is written

use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::consts::FINGERPRINT_LEN;

/// A truncated SHA-256 of a value's JSON form.
///
/// Used to detect whether a cached source directory was produced from the
/// same origin as the one now requested.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl std::fmt::Display for Fingerprint {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

pub trait Hashable: Serialize {
  fn fingerprint(&self) -> Result<Fingerprint, serde_json::Error> {
    let serialized = serde_json::to_string(self)?;
    let full = hash_bytes(serialized.as_bytes());
    Ok(Fingerprint(full[..FINGERPRINT_LEN].to_string()))
  }
}

/// Full lowercase hex SHA-256 of a byte slice.
pub fn hash_bytes(bytes: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(bytes);
  hex::encode(hasher.finalize())
}

/// Full lowercase hex SHA-256 of a file, read in chunks.
pub async fn hash_file(path: &Path) -> Result<String, std::io::Error> {
  let mut file = tokio::fs::File::open(path).await?;
  let mut hasher = StreamHasher::new();
  let mut buf = vec![0u8; 64 * 1024];
  loop {
    let n = file.read(&mut buf).await?;
    if n == 0 {
      break;
    }
    hasher.update(&buf[..n]);
  }
  Ok(hasher.finish())
}

/// Incremental SHA-256 over data fed in chunks.
#[derive(Default)]
pub struct StreamHasher {
  inner: Sha256,
}

impl StreamHasher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn update(&mut self, chunk: &[u8]) {
    self.inner.update(chunk);
  }

  pub fn finish(self) -> String {
    hex::encode(self.inner.finalize())
  }
}

/// Compare two hex digests, ignoring case and surrounding whitespace.
pub fn digests_match(expected: &str, actual: &str) -> bool {
  expected.trim().eq_ignore_ascii_case(actual.trim())
}
