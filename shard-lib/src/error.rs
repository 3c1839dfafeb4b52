//! Error taxonomy shared by every `shard-lib` component.
//!
//! Variant names track the taxonomy named in the system spec (`BadRequest`,
//! `NotFound`, `Conflict`, `Io`, `PipelineFailed`, `Timeout`) so that the HTTP
//! dispatcher can map each variant to a status code in one place instead of
//! re-deriving the mapping per handler.

use std::path::PathBuf;

use thiserror::Error;

use crate::repo::CommitName;

/// Errors produced by the repository store, replica protocol, and pipeline
/// runner.
#[derive(Debug, Error)]
pub enum ShardError {
    #[error("invalid shard spec {0:?}: expected \"<n>-<m>\" with 0 <= n < m")]
    BadShardSpec(String),

    #[error("commit {commit} not found in repo {repo}")]
    MissingCommit { repo: String, commit: CommitName },

    #[error("branch {branch} not found in repo {repo}")]
    MissingBranch { repo: String, branch: String },

    #[error("branch {branch} already exists in repo {repo}")]
    BranchExists { repo: String, branch: String },

    #[error("commit name {commit} is already taken in repo {repo}")]
    NameTaken { repo: String, commit: CommitName },

    #[error("path not found: {0}")]
    NotFound(PathBuf),

    #[error("glob {pattern:?} matched no files")]
    GlobEmpty { pattern: String },

    #[error("cannot modify sealed commit at {0}")]
    ReadOnly(PathBuf),

    #[error("pull delta references missing parent commit {0}")]
    MissingParent(CommitName),

    #[error("pipeline {pipeline} failed: {reason}")]
    PipelineFailed { pipeline: String, reason: String },

    #[error("timed out waiting for {0:?}")]
    Timeout(PathBuf),

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed pipeline manifest {name:?}: {reason}")]
    BadManifest { name: String, reason: String },
}

pub type ShardResult<T> = Result<T, ShardError>;

impl ShardError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
