//! Environment isolation between architectures.

use proptest::prelude::*;
use xsuite_lib::ArtifactTree;
use xsuite_lib::platform::Arch;
use xsuite_lib::profile::{EnvOverride, ProfileError, ProfileOptions, RuntimeLink, build_profile};

fn arch() -> impl Strategy<Value = Arch> {
  prop::sample::select(Arch::ALL.to_vec())
}

fn other(arch: Arch) -> Arch {
  match arch {
    Arch::Armhf => Arch::Aarch64,
    Arch::Aarch64 => Arch::Armhf,
  }
}

proptest! {
  #[test]
  fn profile_never_mentions_foreign_toolchain(
    arch in arch(),
    root in "/[a-z]{1,8}(/[a-z0-9]{1,8}){0,3}",
    runtime in any::<bool>(),
    extra in prop::collection::vec(("X_[A-Z0-9_]{1,8}", "[a-z0-9 ./-]{0,16}"), 0..4),
  ) {
    let tree = ArtifactTree::new(&root, format!("{root}/build"));
    let overrides = extra
      .iter()
      .map(|(name, value)| EnvOverride { name: name.clone(), value: value.clone(), conditional: false })
      .collect();
    let options = ProfileOptions {
      runtime: runtime.then(|| RuntimeLink::new(tree.runtime_prefix("python", "3.12.7", arch).unwrap())),
      overrides,
      ..Default::default()
    };

    let profile = build_profile(arch, &tree, &options).unwrap();

    let foreign = other(arch);
    let foreign_prefix = tree.toolchain_prefix(foreign).display().to_string();
    let foreign_sysroot = tree.sysroot(foreign).display().to_string();
    for (name, value) in profile.env() {
      prop_assert!(!value.contains(&format!("{}-", foreign.triple())), "{name}={value}");
      prop_assert!(!value.contains(&foreign_prefix), "{name}={value}");
      prop_assert!(!value.contains(&foreign_sysroot), "{name}={value}");
    }
    prop_assert_eq!(profile.vars()["CC"].clone(), format!("{}-gcc", arch.triple()));
    prop_assert_eq!(profile.search_path().first(), Some(&tree.toolchain_bin(arch)));
  }

  #[test]
  fn foreign_override_is_rejected(arch in arch(), tool in "(gcc|g\\+\\+|ar|ld)") {
    let tree = ArtifactTree::new("/out", "/build");
    let options = ProfileOptions {
      overrides: vec![EnvOverride {
        name: "CC".to_string(),
        value: format!("{}-{tool}", other(arch).triple()),
        conditional: false,
      }],
      ..Default::default()
    };

    let err = build_profile(arch, &tree, &options).unwrap_err();
    let is_foreign = matches!(err, ProfileError::ForeignToolchain { .. });
    prop_assert!(is_foreign);
  }
}

#[test]
fn runtime_profile_links_relative_to_origin() {
  let tree = ArtifactTree::new("/out", "/build");
  let prefix = tree.runtime_prefix("python", "3.12.7", Arch::Aarch64).unwrap();
  let options = ProfileOptions {
    runtime: Some(RuntimeLink::new(&prefix).with_origins(vec![
      "bin".to_string(),
      "lib/python3.12/lib-dynload".to_string(),
    ])),
    ..Default::default()
  };

  let profile = build_profile(Arch::Aarch64, &tree, &options).unwrap();

  assert!(profile.run_paths().iter().all(|p| p.starts_with("$ORIGIN")));
  assert!(profile.run_paths().contains(&"$ORIGIN/../lib".to_string()));
  assert!(profile.run_paths().contains(&"$ORIGIN/../..".to_string()));
  assert!(!profile.ldflags().iter().any(|f| f.contains("-rpath,/")));
}

#[test]
fn env_script_exports_every_variable() {
  let tree = ArtifactTree::new("/out", "/build");
  let profile = build_profile(Arch::Armhf, &tree, &ProfileOptions::default()).unwrap();

  let script = profile.render_script();

  for name in profile.env().keys() {
    assert!(script.contains(&format!("export {name}=")), "{name} missing");
  }
  assert!(script.contains("export CC='arm-linux-gnueabihf-gcc'"));
}
