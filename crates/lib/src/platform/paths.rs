//! Default locations for the source cache, build trees and install root.
//!
//! Each location can be overridden with an environment variable; otherwise
//! the XDG base directories (or the current directory) are used.

use std::path::PathBuf;

use crate::consts::APP_NAME;

/// Override for the source cache root.
pub const CACHE_ENV: &str = "XSUITE_CACHE";

/// Override for the install root.
pub const ROOT_ENV: &str = "XSUITE_ROOT";

/// Override for the build directory root.
pub const BUILD_ENV: &str = "XSUITE_BUILD";

fn env_path(name: &str) -> Option<PathBuf> {
  std::env::var_os(name).filter(|v| !v.is_empty()).map(PathBuf::from)
}

fn current_dir() -> PathBuf {
  std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Returns the user's home directory, if `HOME` is set.
pub fn home_dir() -> Option<PathBuf> {
  env_path("HOME")
}

/// Returns the directory where fetched sources and downloads are cached.
pub fn cache_dir() -> PathBuf {
  if let Some(dir) = env_path(CACHE_ENV) {
    return dir;
  }
  let cache_home = env_path("XDG_CACHE_HOME")
    .or_else(|| home_dir().map(|h| h.join(".cache")))
    .unwrap_or_else(std::env::temp_dir);
  cache_home.join(APP_NAME)
}

/// Returns the root of the artifact tree (toolchain, sysroots, runtimes).
pub fn install_root() -> PathBuf {
  env_path(ROOT_ENV).unwrap_or_else(|| current_dir().join("out"))
}

/// Returns the root under which per-(source, architecture) build trees live.
pub fn build_root() -> PathBuf {
  env_path(BUILD_ENV).unwrap_or_else(|| current_dir().join("build"))
}
