//! Git status tracking
//!
//! Provides:
//! - `resolver`: repository root lookup with a short-lived cache
//! - `parse`: porcelain v1 parsing and status lookup
//! - `cache`: per-repository status cache with background refresh
//! - `watch`: index/HEAD change notification

pub mod cache;
pub mod parse;
pub mod resolver;
pub mod watch;

pub use cache::{RepoEntry, StatusCache};
