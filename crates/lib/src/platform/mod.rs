pub mod arch;
pub mod paths;

pub use arch::{Arch, UnknownArch};

/// Returns the GNU triple of the machine running the build, used as `--build`.
pub fn build_triple() -> String {
  format!("{}-linux-gnu", std::env::consts::ARCH)
}
