//! Pipeline manifest parsing.
//!
//! A manifest lives at `pipeline/<name>` inside a data-repo branch and names
//! the job image, the upstream data it reads, and the command to run.
//! Schema validation beyond "valid JSON with these three fields" is out of
//! scope; a malformed manifest surfaces as [`ShardError::BadManifest`].

use serde::Deserialize;
use serde::Serialize;

use crate::error::ShardError;
use crate::error::ShardResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub image: String,
    pub input: String,
    pub cmd: Vec<String>,
}

impl Manifest {
    pub fn parse(name: &str, bytes: &[u8]) -> ShardResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| ShardError::BadManifest {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }
}
