//! Error type shared by every stage of the block pipeline.

use std::path::PathBuf;

use thiserror::Error;

use crate::block::Phase;

#[derive(Debug, Error)]
pub enum BlockError {
    /// A required input or intermediate result is missing or inconsistent.
    #[error("precondition violated: {0}")]
    Precondition(String),

    #[error("{operation} requires phase {required:?} or later, geometry is {current:?}")]
    PhaseOrder {
        operation: &'static str,
        required: Phase,
        current: Phase,
    },

    #[error(
        "global numbering is stale for volume {volume}: numbered {numbered:?}, volume has {current:?}"
    )]
    StaleNumbering {
        volume: usize,
        numbered: [usize; 3],
        current: [usize; 3],
    },

    #[error("topology inconsistency: {0}")]
    Topology(String),

    #[error("numeric failure: {0}")]
    NumericFailure(String),

    #[error("{}:{line}: {message}", path.display())]
    Format {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("{}: truncated {what}: expected {expected} values, found {found}", path.display())]
    Truncated {
        path: PathBuf,
        what: String,
        expected: usize,
        found: usize,
    },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BlockError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BlockError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, BlockError>;
