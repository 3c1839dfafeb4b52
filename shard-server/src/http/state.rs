//! Shared state threaded through every axum handler: this shard's identity,
//! its backing volume, the commit controller, and its peer list.

use std::sync::Arc;

use shard_lib::controller::Controller;
use shard_lib::repo::store::Store;
use shard_lib::repo::volume::Volume;
use shard_lib::repo::RepoName;
use shard_lib::ShardSpec;

pub const MANIFEST_DIR: &str = "pipeline";

#[derive(Clone)]
pub struct AppState(Arc<Inner>);

struct Inner {
    shard_spec: ShardSpec,
    volume: Arc<dyn Volume>,
    controller: Controller,
    peers: Vec<String>,
    http_client: reqwest::Client,
}

impl AppState {
    pub fn new(shard_spec: ShardSpec, volume: Arc<dyn Volume>, peers: Vec<String>) -> Self {
        Self(Arc::new(Inner {
            shard_spec,
            volume,
            controller: Controller::new(),
            peers,
            http_client: reqwest::Client::new(),
        }))
    }

    pub fn shard_spec(&self) -> ShardSpec {
        self.0.shard_spec
    }

    pub fn volume(&self) -> Arc<dyn Volume> {
        self.0.volume.clone()
    }

    pub fn controller(&self) -> &Controller {
        &self.0.controller
    }

    pub fn peers(&self) -> &[String] {
        &self.0.peers
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.0.http_client
    }

    /// `data-<shard>`: user inputs for this slice.
    pub fn data_store(&self) -> Store {
        Store::new(self.volume(), RepoName::new(format!("data-{}", self.0.shard_spec.shard())))
    }

    /// `comp-<shard>`: scratch/intermediate workspace.
    pub fn comp_store(&self) -> Store {
        Store::new(self.volume(), RepoName::new(format!("comp-{}", self.0.shard_spec.shard())))
    }

    /// `pipe-<shard>/<pipeline>`: one repo per pipeline.
    pub fn pipe_store(&self, pipeline: &str) -> Store {
        Store::new(
            self.volume(),
            RepoName::new(format!("pipe-{}/{pipeline}", self.0.shard_spec.shard())),
        )
    }

    pub fn output_prefix(&self) -> String {
        format!("pipe-{}", self.0.shard_spec.shard())
    }
}
