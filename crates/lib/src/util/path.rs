//! Lexical path helpers that never touch the filesystem.

use std::path::{Component, Path, PathBuf};

/// Resolve `.` and `..` components without following symlinks.
pub fn normalize(path: &Path) -> PathBuf {
  let mut normalized = PathBuf::new();
  for component in path.components() {
    match component {
      Component::ParentDir => {
        normalized.pop();
      }
      Component::CurDir => {}
      _ => normalized.push(component),
    }
  }
  normalized
}

/// Path from directory `from` to `to`, both absolute.
///
/// Returns an empty path when the two are the same directory.
pub fn relative_path(from: &Path, to: &Path) -> PathBuf {
  let from = normalize(from);
  let to = normalize(to);
  let from_parts: Vec<_> = from.components().collect();
  let to_parts: Vec<_> = to.components().collect();

  let common = from_parts
    .iter()
    .zip(to_parts.iter())
    .take_while(|(a, b)| a == b)
    .count();

  let mut rel = PathBuf::new();
  for _ in common..from_parts.len() {
    rel.push("..");
  }
  for part in &to_parts[common..] {
    rel.push(part);
  }
  rel
}

/// True if one path equals or contains the other.
pub fn overlaps(a: &Path, b: &Path) -> bool {
  let a = normalize(a);
  let b = normalize(b);
  a.starts_with(&b) || b.starts_with(&a)
}
