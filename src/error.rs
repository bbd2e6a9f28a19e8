use std::io;

use thiserror::Error;

/// Errors raised while reading inputs, planning and counting.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Malformed CNF or join-tree input.
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    /// An ordering heuristic did not return a permutation of the appearing variables.
    #[error("malformed variable ordering: {0}")]
    MalformedOrdering(String),

    #[error("cluster {from} routed to cluster {to} (cluster count {count})")]
    Routing { from: usize, to: usize, count: usize },

    #[error("bucket {cluster} projects {size} variables instead of one")]
    BucketProjection { cluster: usize, size: usize },

    #[error("root diagram is not constant (support: {0:?})")]
    NonConstantDiagram(Vec<u32>),

    /// Inconsistent join-tree node bookkeeping, such as a reused or out-of-range index.
    #[error("join tree node index error: {0}")]
    NodeIndex(String),

    /// A join tree whose structure cannot be evaluated against its formula.
    #[error("invalid join tree: {0}")]
    InvalidJoinTree(String),

    #[error("no usable join tree: the last tree is incomplete and no earlier tree was completed")]
    NoUsableJoinTree,

    #[error("no join tree was received")]
    NoJoinTree,

    #[error("interrupted")]
    Interrupted,
}

impl Error {
    pub(crate) fn parse(line: usize, message: impl Into<String>) -> Self {
        Error::Parse {
            line,
            message: message.into(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
