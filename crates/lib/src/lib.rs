//! xsuite-lib: build-graph orchestration for a cross-compiled toolchain suite
//!
//! This crate provides the pieces that turn a recipe into installed artifacts:
//! - `SourceSpec` / `SourceCache`: verified, deduplicated upstream sources
//! - `EnvironmentProfile`: per-architecture compiler environments
//! - `BuildNode` / `BuildGraph`: staged units of work and their ordering
//! - `Engine`: parallel execution with failure propagation and cancellation
//! - `ArtifactTree`: the install layout and completion markers

pub mod consts;
pub mod execute;
pub mod graph;
pub mod inspect;
pub mod layout;
pub mod node;
pub mod platform;
pub mod profile;
pub mod recipe;
pub mod source;
pub mod tree_lock;
pub mod util;

pub use execute::{BuildReport, Engine, ExecuteConfig, ExecuteError};
pub use graph::{BuildGraph, DefinitionError};
pub use layout::ArtifactTree;
pub use node::{BuildNode, NodeName};
pub use platform::Arch;
pub use profile::EnvironmentProfile;
pub use recipe::Recipe;
pub use source::{SourceCache, SourceSpec};
