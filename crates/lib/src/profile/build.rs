//! Profile construction.
//!
//! Composition order for a target profile:
//! 1. search path: the architecture's cross-toolchain `bin`, then the base path
//! 2. compiler flags: position-independent code, machine flags, optimization
//! 3. sysroot include/library flags and variables
//! 4. runtime profiles only: `$ORIGIN`-relative run-path linker flags
//! 5. caller overrides

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{debug, warn};

use super::types::{EnvOverride, EnvironmentProfile, ProfileError};
use crate::consts::BASE_SEARCH_PATH;
use crate::layout::ArtifactTree;
use crate::platform::{Arch, build_triple};
use crate::util::path::relative_path;

/// Where a runtime's binaries live and where their libraries are installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeLink {
  pub prefix: PathBuf,
  /// Subdirectories of `prefix` holding binaries or loadable modules.
  pub origins: Vec<String>,
  /// Absolute library directories the binaries must find.
  pub lib_dirs: Vec<PathBuf>,
}

impl RuntimeLink {
  /// `bin` and `lib` origins resolving `{prefix}/lib`.
  pub fn new(prefix: impl Into<PathBuf>) -> Self {
    let prefix = prefix.into();
    Self {
      lib_dirs: vec![prefix.join("lib")],
      origins: vec!["bin".to_string(), "lib".to_string()],
      prefix,
    }
  }

  pub fn with_origins(mut self, origins: Vec<String>) -> Self {
    if !origins.is_empty() {
      self.origins = origins;
    }
    self
  }

  /// `$ORIGIN`-relative entries, one per (origin, library dir) pair.
  pub fn run_paths(&self) -> Vec<String> {
    let mut entries: Vec<String> = Vec::new();
    for origin in &self.origins {
      let origin_dir = self.prefix.join(origin);
      for lib_dir in &self.lib_dirs {
        let rel = relative_path(&origin_dir, lib_dir);
        let entry = if rel.as_os_str().is_empty() {
          "$ORIGIN".to_string()
        } else {
          format!("$ORIGIN/{}", rel.display())
        };
        if !entries.contains(&entry) {
          entries.push(entry);
        }
      }
    }
    entries
  }
}

/// Optional inputs to profile construction.
#[derive(Debug, Clone, Default)]
pub struct ProfileOptions {
  pub runtime: Option<RuntimeLink>,
  pub overrides: Vec<EnvOverride>,
  /// Search path after the toolchain; defaults to [`BASE_SEARCH_PATH`].
  pub base_path: Option<Vec<PathBuf>>,
}

impl ProfileOptions {
  fn base_path(&self) -> Vec<PathBuf> {
    self
      .base_path
      .clone()
      .unwrap_or_else(|| BASE_SEARCH_PATH.iter().map(PathBuf::from).collect())
  }
}

/// Build the environment profile for a target architecture.
pub fn build_profile(
  arch: Arch,
  tree: &ArtifactTree,
  options: &ProfileOptions,
) -> Result<EnvironmentProfile, ProfileError> {
  let triple = arch.triple();
  let sysroot = tree.sysroot(arch);
  let toolchain_bin = tree.toolchain_bin(arch);

  let mut search_path = vec![toolchain_bin];
  search_path.extend(options.base_path());

  let mut cflags = vec!["-fPIC".to_string()];
  cflags.extend(arch.machine_flags().iter().map(|f| f.to_string()));
  cflags.push("-O2".to_string());

  let cppflags = vec![format!("-I{}", sysroot.join("include").display())];

  let sysroot_lib = sysroot.join("lib");
  let mut ldflags = vec![
    format!("-L{}", sysroot_lib.display()),
    format!("-Wl,-rpath-link,{}", sysroot_lib.display()),
  ];

  let mut run_paths = Vec::new();
  if let Some(runtime) = &options.runtime {
    run_paths = runtime.run_paths();
    ldflags.push("-Wl,--enable-new-dtags".to_string());
    for entry in &run_paths {
      ldflags.push(format!("-Wl,-rpath,{}", make_escape(entry)));
    }
  }

  let mut vars = BTreeMap::new();
  for (var, tool) in [
    ("CC", "gcc"),
    ("CXX", "g++"),
    ("AR", "ar"),
    ("RANLIB", "ranlib"),
    ("STRIP", "strip"),
    ("LD", "ld"),
    ("READELF", "readelf"),
    ("NM", "nm"),
  ] {
    vars.insert(var.to_string(), format!("{}-{}", triple, tool));
  }
  vars.insert("HOST_TRIPLE".to_string(), triple.to_string());
  vars.insert("BUILD_TRIPLE".to_string(), build_triple());
  vars.insert("TARGET_ARCH".to_string(), arch.as_str().to_string());
  vars.insert("SYSROOT".to_string(), sysroot.display().to_string());
  vars.insert("TOOLCHAIN_ROOT".to_string(), tree.toolchain_prefix(arch).display().to_string());
  vars.insert("EMULATOR".to_string(), arch.emulator().to_string());
  vars.insert(
    "PKG_CONFIG_LIBDIR".to_string(),
    format!(
      "{}:{}",
      sysroot_lib.join("pkgconfig").display(),
      sysroot.join("share/pkgconfig").display()
    ),
  );
  vars.insert("PKG_CONFIG_PATH".to_string(), String::new());

  for (var, dir) in [("LIBRARY_PATH", sysroot_lib.clone()), ("CPATH", sysroot.join("include"))] {
    if dir.is_dir() {
      vars.insert(var.to_string(), dir.display().to_string());
    } else {
      warn!(arch = %arch, var, path = %dir.display(), "sysroot directory missing, not exporting");
    }
  }

  let mut profile = EnvironmentProfile {
    arch: Some(arch),
    triple: triple.to_string(),
    search_path,
    cflags,
    cppflags,
    ldflags,
    run_paths,
    vars,
  };
  apply_overrides(&mut profile, &options.overrides);
  check_isolation(&profile, tree)?;

  debug!(arch = %arch, runtime = options.runtime.is_some(), "built profile");
  Ok(profile)
}

/// Build the profile for tools that run on the build machine.
pub fn build_host_profile(tree: &ArtifactTree, options: &ProfileOptions) -> EnvironmentProfile {
  let mut vars = BTreeMap::new();
  vars.insert("CC".to_string(), "cc".to_string());
  vars.insert("CXX".to_string(), "c++".to_string());
  vars.insert("BUILD_TRIPLE".to_string(), build_triple());
  vars.insert("TOOLCHAIN_ROOT".to_string(), tree.toolchain_root().display().to_string());

  let mut profile = EnvironmentProfile {
    arch: None,
    triple: build_triple(),
    search_path: options.base_path(),
    cflags: vec!["-O2".to_string()],
    cppflags: Vec::new(),
    ldflags: Vec::new(),
    run_paths: Vec::new(),
    vars,
  };
  apply_overrides(&mut profile, &options.overrides);
  profile
}

fn apply_overrides(profile: &mut EnvironmentProfile, overrides: &[EnvOverride]) {
  for ov in overrides {
    if ov.conditional && profile.env().contains_key(&ov.name) {
      debug!(name = %ov.name, "conditional override skipped, already defined");
      continue;
    }
    profile.vars.insert(ov.name.clone(), ov.value.clone());
  }
}

/// Reject a target profile that mentions another architecture's toolchain
/// or sysroot.
fn check_isolation(profile: &EnvironmentProfile, tree: &ArtifactTree) -> Result<(), ProfileError> {
  let Some(arch) = profile.arch else {
    return Ok(());
  };

  for foreign in Arch::ALL.into_iter().filter(|a| *a != arch) {
    let needles = [
      format!("{}-", foreign.triple()),
      tree.toolchain_prefix(foreign).display().to_string(),
      tree.sysroot(foreign).display().to_string(),
    ];
    for (name, value) in profile.env() {
      if needles.iter().any(|needle| value.contains(needle.as_str())) {
        return Err(ProfileError::ForeignToolchain {
          arch,
          foreign,
          name,
          value,
        });
      }
    }
  }
  Ok(())
}

/// Escape `$` for values that pass through make and then a shell.
fn make_escape(entry: &str) -> String {
  entry.replace('$', r"\$$")
}
