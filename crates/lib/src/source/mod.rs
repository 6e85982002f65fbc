//! Upstream sources: identity, fetching and the fetch-once cache.

pub mod archive;
pub mod cache;
pub mod fetch;
pub mod types;

pub use cache::SourceCache;
pub use fetch::{DefaultFetcher, SourceFetcher};
pub use types::{SourceError, SourceId, SourceOrigin, SourceSpec};
