//! Per-architecture build environments.

pub mod build;
pub mod types;

pub use build::{ProfileOptions, RuntimeLink, build_host_profile, build_profile};
pub use types::{EnvOverride, EnvironmentProfile, ProfileError};
