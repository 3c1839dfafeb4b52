//! The snapshotting repository abstraction (component B): branch/commit
//! bookkeeping, file I/O, globbing, and stat, all delegated to a
//! [`volume::Volume`] that stands in for the underlying copy-on-write
//! filesystem driver.

pub mod store;
pub mod volume;

use std::fmt;
use std::ops::Deref;

use serde::Deserialize;
use serde::Serialize;

/// The default branch name used whenever a request omits one.
pub const DEFAULT_BRANCH: &str = "master";

macro_rules! name_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Deref for $name {
            type Target = str;

            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

name_newtype!(RepoName);
name_newtype!(BranchName);
name_newtype!(CommitName);

impl Default for BranchName {
    fn default() -> Self {
        Self(DEFAULT_BRANCH.to_string())
    }
}

/// Metadata for a sealed commit: its name, when it was sealed, and whether
/// it is currently readable (always true once returned by the store; the
/// field exists so `Stat` can report it generically for both branches and
/// commits).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    #[serde(rename = "Name")]
    pub name: CommitName,
    #[serde(rename = "TStamp")]
    pub tstamp: chrono::DateTime<chrono::FixedOffset>,
}

/// The iteration order requested from [`store::Store::commits`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// Metadata returned by `Stat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub name: String,
    pub modified: chrono::DateTime<chrono::FixedOffset>,
    pub is_dir: bool,
    pub len: u64,
}
