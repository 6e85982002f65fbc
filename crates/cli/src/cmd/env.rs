//! Implementation of the `xsuite env` command.
//!
//! Prints a POSIX script exporting the build environment stages would see
//! for an architecture, e.g. `eval "$(xsuite env --arch aarch64)"`.

use anyhow::{Context, Result, bail};

use xsuite_lib::ArtifactTree;
use xsuite_lib::platform::Arch;
use xsuite_lib::profile::{ProfileOptions, RuntimeLink, build_profile};
use xsuite_lib::recipe::LayoutSection;

use super::{LocationArgs, parse_overrides};

pub fn cmd_env(arch: Arch, runtime: Option<&str>, env: &[String], locations: &LocationArgs) -> Result<()> {
  let locations = locations.resolve(&LayoutSection::default());
  let tree = ArtifactTree::new(&locations.root, &locations.build_root);

  let runtime = match runtime {
    Some(value) => {
      let Some((component, version)) = value.split_once('/') else {
        bail!("--runtime expects COMPONENT/VERSION, got '{value}'");
      };
      let prefix = tree
        .runtime_prefix(component, version, arch)
        .context("Invalid --runtime")?;
      Some(RuntimeLink::new(prefix))
    }
    None => None,
  };

  let options = ProfileOptions {
    runtime,
    overrides: parse_overrides(env)?,
    ..Default::default()
  };
  let profile = build_profile(arch, &tree, &options).context("Failed to build environment")?;

  print!("{}", profile.render_script());
  Ok(())
}
