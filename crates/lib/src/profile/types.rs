//! Environment profile types.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::platform::Arch;

/// Errors from constructing a profile.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProfileError {
  /// A value in a profile for one architecture names another's toolchain.
  #[error("profile for {arch} leaks {foreign} toolchain through {name}={value}")]
  ForeignToolchain {
    arch: Arch,
    foreign: Arch,
    name: String,
    value: String,
  },

  #[error("invalid environment override '{0}': expected NAME=VALUE or NAME?=VALUE")]
  InvalidOverride(String),
}

/// An extra variable layered on top of a built profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvOverride {
  pub name: String,
  pub value: String,
  /// Only applied when the profile does not already define `name`.
  pub conditional: bool,
}

impl FromStr for EnvOverride {
  type Err = ProfileError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let invalid = || ProfileError::InvalidOverride(s.to_string());
    let (lhs, value) = s.split_once('=').ok_or_else(invalid)?;
    let (name, conditional) = match lhs.strip_suffix('?') {
      Some(name) => (name, true),
      None => (lhs, false),
    };
    if !is_identifier(name) {
      return Err(invalid());
    }
    Ok(Self {
      name: name.to_string(),
      value: value.to_string(),
      conditional,
    })
  }
}

/// True for `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_identifier(name: &str) -> bool {
  let mut chars = name.chars();
  match chars.next() {
    Some(c) if c.is_ascii_alphabetic() || c == '_' => chars.all(|c| c.is_ascii_alphanumeric() || c == '_'),
    _ => false,
  }
}

/// The environment a node's stages run under.
///
/// Built once per (architecture, profile kind) and never mutated; stages
/// receive it through [`EnvironmentProfile::env`] rather than through the
/// process environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentProfile {
  pub(crate) arch: Option<Arch>,
  pub(crate) triple: String,
  pub(crate) search_path: Vec<PathBuf>,
  pub(crate) cflags: Vec<String>,
  pub(crate) cppflags: Vec<String>,
  pub(crate) ldflags: Vec<String>,
  pub(crate) run_paths: Vec<String>,
  pub(crate) vars: BTreeMap<String, String>,
}

impl EnvironmentProfile {
  /// Target architecture, or `None` for the build machine.
  pub fn arch(&self) -> Option<Arch> {
    self.arch
  }

  pub fn triple(&self) -> &str {
    &self.triple
  }

  pub fn search_path(&self) -> &[PathBuf] {
    &self.search_path
  }

  pub fn cflags(&self) -> &[String] {
    &self.cflags
  }

  pub fn ldflags(&self) -> &[String] {
    &self.ldflags
  }

  /// Run-path entries embedded into linked binaries, `$ORIGIN` relative.
  pub fn run_paths(&self) -> &[String] {
    &self.run_paths
  }

  pub fn vars(&self) -> &BTreeMap<String, String> {
    &self.vars
  }

  /// The complete variable map handed to stage processes.
  pub fn env(&self) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    let path = self
      .search_path
      .iter()
      .map(|p| p.display().to_string())
      .collect::<Vec<_>>()
      .join(":");
    env.insert("PATH".to_string(), path);
    env.insert("CFLAGS".to_string(), self.cflags.join(" "));
    env.insert("CXXFLAGS".to_string(), self.cflags.join(" "));
    env.insert("CPPFLAGS".to_string(), self.cppflags.join(" "));
    env.insert("LDFLAGS".to_string(), self.ldflags.join(" "));
    env.extend(self.vars.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
  }

  /// A POSIX shell script exporting the profile.
  pub fn render_script(&self) -> String {
    let mut script = String::new();
    match self.arch {
      Some(arch) => script.push_str(&format!("# xsuite environment for {} ({})\n", arch, self.triple)),
      None => script.push_str(&format!("# xsuite host environment ({})\n", self.triple)),
    }
    for (name, value) in self.env() {
      script.push_str(&format!("export {}={}\n", name, shell_quote(&value)));
    }
    script
  }
}

/// Quote a value for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
  format!("'{}'", value.replace('\'', r"'\''"))
}
