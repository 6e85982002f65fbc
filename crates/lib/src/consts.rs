//! Names and fixed values shared across the crate.

/// Application name, used for cache and data directories.
pub const APP_NAME: &str = "xsuite";

/// Length of the truncated fingerprint used in cache metadata.
pub const FINGERPRINT_LEN: usize = 20;

/// Directory under the install root holding node completion markers.
pub const MARKER_DIR: &str = ".xsuite";

/// Suffix of a node completion marker file.
pub const MARKER_SUFFIX: &str = "complete";

/// Subdirectory of the install root holding the shared cross-toolchain.
pub const TOOLCHAIN_DIR: &str = "toolchain";

/// Subdirectory of the install root holding per-architecture sysroots.
pub const SYSROOT_DIR: &str = "sysroot";

/// Search path appended after the toolchain directory in every profile.
pub const BASE_SEARCH_PATH: &[&str] = &["/usr/local/bin", "/usr/bin", "/bin"];

/// Value of `SOURCE_DATE_EPOCH` exported to every stage.
/// 315532800 = January 1, 1980 00:00:00 UTC (ZIP epoch).
pub const SOURCE_DATE_EPOCH: &str = "315532800";

/// Maximum number of bytes of stage output kept in a failure report.
pub const DEFAULT_OUTPUT_LIMIT: usize = 16 * 1024;
