//! Commit Controller (component E): the one place that holds the "current
//! runner per branch" map, and the wait/notify plumbing `WaitPipeline` needs.
//!
//! This module intentionally does *not* drive commit acceptance end to end
//! (that orchestration, seal, swap runner, detach cancel+start, detach peer
//! sync, lives in `shard-server`, which is where the HTTP request and the
//! detached tasks naturally belong). What stays here is the part that must
//! be serialized: the map itself, protected by a mutex held only across the
//! swap, never across a runner's `run()`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;

use crate::error::ShardError;
use crate::error::ShardResult;
use crate::pipeline::Runner;
use crate::repo::store::Store;
use crate::repo::BranchName;
use crate::repo::CommitName;

/// Tracks the live runner per branch, a `Notify` per `(prefix, pipeline)`
/// pair so `wait_pipeline` callers can block on the next commit rather than
/// poll, and a sentinel failure entry per `(prefix, pipeline, commit)` so a
/// failed run is visible to waiters instead of just running out the clock.
#[derive(Default)]
pub struct Controller {
    runners: Mutex<HashMap<BranchName, Arc<Runner>>>,
    waiters: Mutex<HashMap<(String, String), Arc<Notify>>>,
    failures: Mutex<HashMap<(String, String, String), String>>,
}

impl Controller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `new` as the current runner for `branch`, returning whatever
    /// was there before (or `None`). Held only for the duration of the map
    /// mutation; callers cancel/await the returned runner outside the lock.
    pub fn replace(&self, branch: BranchName, new: Arc<Runner>) -> Option<Arc<Runner>> {
        self.runners
            .lock()
            .expect("runners mutex not poisoned")
            .insert(branch, new)
    }

    pub fn current(&self, branch: &BranchName) -> Option<Arc<Runner>> {
        self.runners
            .lock()
            .expect("runners mutex not poisoned")
            .get(branch)
            .cloned()
    }

    fn notify_for(&self, prefix: &str, pipeline: &str) -> Arc<Notify> {
        self.waiters
            .lock()
            .expect("waiters mutex not poisoned")
            .entry((prefix.to_string(), pipeline.to_string()))
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// Wakes every `wait_pipeline` caller blocked on `(prefix, pipeline)`.
    /// Called after a runner's `run()` resolves an output commit, so waiters
    /// re-check rather than hang forever.
    pub fn publish(&self, prefix: &str, pipeline: &str) {
        self.notify_for(prefix, pipeline).notify_waiters();
    }

    /// Records that `pipeline`'s run for `commit` failed with `reason`, and
    /// wakes every waiter blocked on `(prefix, pipeline)` so they can observe
    /// it instead of blocking out to the timeout bound.
    pub fn record_failure(&self, prefix: &str, pipeline: &str, commit: &CommitName, reason: String) {
        self.failures
            .lock()
            .expect("failures mutex not poisoned")
            .insert((prefix.to_string(), pipeline.to_string(), commit.to_string()), reason);
        self.notify_for(prefix, pipeline).notify_waiters();
    }

    fn failure_for(&self, prefix: &str, pipeline: &str, commit: &CommitName) -> Option<String> {
        self.failures
            .lock()
            .expect("failures mutex not poisoned")
            .get(&(prefix.to_string(), pipeline.to_string(), commit.to_string()))
            .cloned()
    }

    /// Blocks until `commit` exists in the repo `store` points at, a failure
    /// is recorded for it, or `bound` elapses, whichever comes first.
    pub async fn wait_pipeline(
        &self,
        store: &Store,
        prefix: &str,
        pipeline: &str,
        commit: &CommitName,
        bound: Duration,
    ) -> ShardResult<()> {
        if store.is_commit(commit).await? {
            return Ok(());
        }
        if let Some(reason) = self.failure_for(prefix, pipeline, commit) {
            return Err(ShardError::PipelineFailed { pipeline: pipeline.to_string(), reason });
        }
        let notify = self.notify_for(prefix, pipeline);
        tokio::time::timeout(bound, async {
            loop {
                notify.notified().await;
                if store.is_commit(commit).await.unwrap_or(false) {
                    return Ok(());
                }
                if let Some(reason) = self.failure_for(prefix, pipeline, commit) {
                    return Err(ShardError::PipelineFailed { pipeline: pipeline.to_string(), reason });
                }
            }
        })
        .await
        .map_err(|_| ShardError::Timeout(PathBuf::from(format!("{prefix}/{pipeline}/{commit}"))))?
    }
}
