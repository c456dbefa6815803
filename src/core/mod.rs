//! Core module - Shared data structures and utilities
//!
//! This module provides:
//! - The scan/status data model (DiscoveredItem, ScanOptions, StatusKind)
//! - Typed errors
//! - Rendering for the CLI output formats
//! - Path helpers
//! - Tool lookup and file metadata helpers

pub mod error;
pub mod model;
pub mod paths;
pub mod render;
pub mod util;
