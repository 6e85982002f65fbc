use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Target CPU architectures the suite cross-compiles for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
  /// 32-bit ARM, hard-float ABI.
  Armhf,
  /// 64-bit ARM.
  Aarch64,
}

impl Arch {
  /// Every supported target architecture, in a stable order.
  pub const ALL: [Arch; 2] = [Arch::Armhf, Arch::Aarch64];

  /// Returns the lowercase string identifier for this architecture
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Armhf => "armhf",
      Self::Aarch64 => "aarch64",
    }
  }

  /// The GNU target triple; also the prefix of the cross-compiler binaries.
  pub fn triple(&self) -> &'static str {
    match self {
      Self::Armhf => "arm-linux-gnueabihf",
      Self::Aarch64 => "aarch64-linux-gnu",
    }
  }

  /// Code-generation flags every target build for this architecture needs.
  pub fn machine_flags(&self) -> &'static [&'static str] {
    match self {
      Self::Armhf => &["-march=armv7-a", "-mfpu=vfpv3-d16", "-mfloat-abi=hard"],
      Self::Aarch64 => &[],
    }
  }

  /// The user-mode emulator that runs binaries for this architecture.
  pub fn emulator(&self) -> &'static str {
    match self {
      Self::Armhf => "qemu-arm",
      Self::Aarch64 => "qemu-aarch64",
    }
  }
}

impl fmt::Display for Arch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// Error returned when parsing an unknown architecture name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown architecture '{0}' (expected one of: armhf, aarch64)")]
pub struct UnknownArch(pub String);

impl FromStr for Arch {
  type Err = UnknownArch;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "armhf" | "arm" | "armv7" => Ok(Self::Armhf),
      "aarch64" | "arm64" => Ok(Self::Aarch64),
      _ => Err(UnknownArch(s.to_string())),
    }
  }
}
