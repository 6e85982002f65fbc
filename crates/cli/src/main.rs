mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use xsuite_lib::platform::Arch;

use cmd::{BuildOptions, LocationArgs};
use output::OutputFormat;

/// xsuite - build a cross-compiled toolchain, sysroot and runtime suite
#[derive(Parser)]
#[command(name = "xsuite")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Args)]
struct RecipeArgs {
  /// Recipe file to use instead of the built-in suite
  #[arg(long, value_name = "FILE")]
  recipe: Option<PathBuf>,

  /// Restrict to these nodes and everything they depend on
  #[arg(long, value_name = "NODE", num_args = 1..)]
  only: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
  /// Fetch sources and run every node of the recipe
  Build {
    #[command(flatten)]
    recipe: RecipeArgs,

    #[command(flatten)]
    locations: LocationArgs,

    /// Maximum number of nodes built at once (default: CPU count)
    #[arg(short = 'j', long, value_name = "N")]
    parallel: Option<usize>,

    /// Jobs hint exported to stages as $JOBS (default: CPU count)
    #[arg(long, value_name = "N")]
    jobs: Option<usize>,

    /// Skip nodes whose completion marker is present
    #[arg(long)]
    skip_complete: bool,

    /// Extra variable for every stage: NAME=VALUE, or NAME?=VALUE to keep an existing value
    #[arg(long = "env", value_name = "NAME=VALUE")]
    env: Vec<String>,

    /// Shell used to run stage commands (default: /bin/sh)
    #[arg(long)]
    shell: Option<String>,
  },

  /// Show the order nodes would be built in
  Plan {
    #[command(flatten)]
    recipe: RecipeArgs,

    #[command(flatten)]
    locations: LocationArgs,

    #[arg(long, value_enum, default_value_t)]
    format: OutputFormat,
  },

  /// Print a shell script exporting an architecture's build environment
  Env {
    /// Target architecture
    #[arg(long)]
    arch: Arch,

    /// Add run-path flags for a runtime installed as COMPONENT/VERSION
    #[arg(long, value_name = "COMPONENT/VERSION")]
    runtime: Option<String>,

    /// Extra variable: NAME=VALUE or NAME?=VALUE
    #[arg(long = "env", value_name = "NAME=VALUE")]
    env: Vec<String>,

    #[command(flatten)]
    locations: LocationArgs,
  },

  /// Check ELF run-paths under a directory
  Inspect {
    /// Install tree to scan
    path: PathBuf,

    #[arg(long, value_enum, default_value_t)]
    format: OutputFormat,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match cli.command {
    Commands::Build {
      recipe,
      locations,
      parallel,
      jobs,
      skip_complete,
      env,
      shell,
    } => cmd::cmd_build(BuildOptions {
      recipe: recipe.recipe,
      only: recipe.only,
      locations,
      parallel,
      jobs,
      skip_complete,
      env,
      shell,
    }),
    Commands::Plan {
      recipe,
      locations,
      format,
    } => cmd::cmd_plan(recipe.recipe.as_deref(), &recipe.only, &locations, format),
    Commands::Env {
      arch,
      runtime,
      env,
      locations,
    } => cmd::cmd_env(arch, runtime.as_deref(), &env, &locations),
    Commands::Inspect { path, format } => cmd::cmd_inspect(&path, format),
  }
}
