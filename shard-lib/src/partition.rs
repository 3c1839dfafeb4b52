//! Shard partition predicate.
//!
//! A shard is identified by a `(shard, modulos)` pair with `0 <= shard <
//! modulos`. A filename belongs to a shard iff its stable hash modulo
//! `modulos` equals `shard`. The hash must be identical on every node, so it
//! is fixed here rather than left to a host-dependent default: `xxh3_64` from
//! `xxhash-rust`, a fast, well-distributed, non-cryptographic hash.

use std::fmt;
use std::str::FromStr;

use xxhash_rust::xxh3::xxh3_64;

use crate::error::ShardError;

/// A parsed `"<shard>-<modulos>"` spec, e.g. `"0-2"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShardSpec {
    shard: u64,
    modulos: u64,
}

impl ShardSpec {
    pub fn new(shard: u64, modulos: u64) -> Result<Self, ShardError> {
        if modulos == 0 || shard >= modulos {
            return Err(ShardError::BadShardSpec(format!("{shard}-{modulos}")));
        }
        Ok(Self { shard, modulos })
    }

    pub fn shard(&self) -> u64 {
        self.shard
    }

    pub fn modulos(&self) -> u64 {
        self.modulos
    }

    /// Whether `name` belongs to this shard.
    pub fn matches(&self, name: &str) -> bool {
        stable_hash(name) % self.modulos == self.shard
    }
}

impl fmt::Display for ShardSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.shard, self.modulos)
    }
}

impl FromStr for ShardSpec {
    type Err = ShardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (shard_str, modulos_str) = s
            .split_once('-')
            .ok_or_else(|| ShardError::BadShardSpec(s.to_string()))?;
        let shard: u64 = shard_str
            .parse()
            .map_err(|_| ShardError::BadShardSpec(s.to_string()))?;
        let modulos: u64 = modulos_str
            .parse()
            .map_err(|_| ShardError::BadShardSpec(s.to_string()))?;
        Self::new(shard, modulos)
    }
}

/// The hash used for routing decisions. Exposed so callers (e.g. the replica
/// protocol's multipart filter) can compute it without going through a full
/// `ShardSpec`.
pub fn stable_hash(name: &str) -> u64 {
    xxh3_64(name.as_bytes())
}

/// Whether `filename` belongs to `shard_spec`. A missing `shard_spec` means
/// "accept all", matching the query-parameter default in the HTTP surface.
pub fn matches(filename: &str, shard_spec: Option<&ShardSpec>) -> bool {
    match shard_spec {
        Some(spec) => spec.matches(filename),
        None => true,
    }
}
