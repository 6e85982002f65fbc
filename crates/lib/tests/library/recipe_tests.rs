//! Recipes loaded from disk and run.

use tokio_util::sync::CancellationToken;
use xsuite_lib::graph::DefinitionError;
use xsuite_lib::node::NodeName;
use xsuite_lib::recipe::{Recipe, RecipeError};

use super::common::TestEnv;

fn write_recipe(env: &TestEnv, text: &str) -> std::path::PathBuf {
  let path = env.temp.path().join("recipe.toml");
  std::fs::write(&path, text).unwrap();
  path
}

#[test]
fn cyclic_recipe_rejected() {
  let env = TestEnv::new();
  let path = write_recipe(
    &env,
    r#"
[sources.zlib]
kind = "local"
path = "/srv/zlib"

[[nodes]]
name = "zlib-{arch}"
source = "zlib"
arches = ["armhf", "aarch64"]
install = { kind = "sysroot" }
deps = ["check-{arch}"]
stages = [{ kind = "install", command = "make install" }]

[[nodes]]
name = "check-{arch}"
source = "zlib"
arches = ["armhf", "aarch64"]
install = { kind = "sysroot" }
deps = ["zlib-{arch}"]
stages = [{ kind = "build", command = "make check" }]
"#,
  );

  let err = Recipe::load(&path).unwrap().graph().unwrap_err();

  match err {
    RecipeError::Definition(DefinitionError::Cycle { nodes }) => {
      assert_eq!(nodes.len(), 2);
      let arch = nodes[0].as_str().rsplit('-').next().unwrap();
      assert_eq!(nodes[1].as_str().rsplit('-').next(), Some(arch));
    }
    other => panic!("unexpected error: {other}"),
  }
}

#[test]
fn duplicate_expanded_names_rejected() {
  let env = TestEnv::new();
  let path = write_recipe(
    &env,
    r#"
[sources.zlib]
kind = "local"
path = "/srv/zlib"

[[nodes]]
name = "zlib-armhf"
source = "zlib"
arches = ["armhf"]
install = { kind = "sysroot" }
stages = [{ kind = "install", command = "make install" }]

[[nodes]]
name = "zlib-{arch}"
source = "zlib"
arches = ["armhf"]
install = { kind = "sysroot" }
stages = [{ kind = "install", command = "make install" }]
"#,
  );

  let err = Recipe::load(&path).unwrap().graph().unwrap_err();
  assert!(matches!(
    err,
    RecipeError::Definition(DefinitionError::DuplicateNode(ref n)) if n.as_str() == "zlib-armhf"
  ));
}

#[cfg(unix)]
#[tokio::test]
async fn recipe_runs_end_to_end() {
  let env = TestEnv::new();
  let upstream = env.local_source("hello", &[("hello.txt", "hi\n")]);
  let upstream_dir = match &upstream.origin {
    xsuite_lib::source::SourceOrigin::Local { path } => path.clone(),
    _ => unreachable!(),
  };
  let path = write_recipe(
    &env,
    &format!(
      r#"
[sources.hello]
kind = "local"
path = "{}"

[[nodes]]
name = "hello-{{arch}}"
source = "hello"
arches = ["armhf", "aarch64"]
install = {{ kind = "sysroot" }}
vars = {{ GREETING_FOR = "{{triple}}" }}

[[nodes.stages]]
kind = "install"
command = 'mkdir -p "$PREFIX/share" && cp "$SRC_DIR/hello.txt" "$PREFIX/share/$GREETING_FOR.txt"'
"#,
      upstream_dir.display()
    ),
  );

  let graph = Recipe::load(&path).unwrap().graph().unwrap();
  let report = env.engine(2).run(&graph, &CancellationToken::new()).await.unwrap();

  assert!(report.is_success(), "{report:?}");
  assert_eq!(report.completed.len(), 2);
  let armhf = env.tree.sysroot(xsuite_lib::Arch::Armhf).join("share/arm-linux-gnueabihf.txt");
  assert_eq!(std::fs::read_to_string(armhf).unwrap(), "hi\n");
  assert!(env.tree.is_complete(&NodeName::new("hello-aarch64")));
}
