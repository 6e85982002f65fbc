//! Build nodes and their stages.

pub mod types;

pub use types::{BuildDirMode, BuildNode, InstallTarget, NodeName, ProfileKind, Stage, StageKind, SubBuild};
