//! Typed errors for the scan and status APIs
//!
//! Most failures inside a scan are recovered locally (skipped subtree, empty
//! root, empty status map). These are the ones that reach a caller.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrawlError {
    #[error("scan root does not exist: {}", .0.display())]
    InvalidRoot(PathBuf),

    #[error("scan root is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("no git repository found for {}", .0.display())]
    NoRepository(PathBuf),

    #[error("failed to watch {}: {source}", .path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
