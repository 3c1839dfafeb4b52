//! Pipeline Runner (component D): materializes one upstream commit's
//! pipeline outputs, cancellable mid-flight.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

use crate::error::ShardError;
use crate::error::ShardResult;
use crate::partition::ShardSpec;
use crate::pipeline::manifest::Manifest;
use crate::repo::store::Store;
use crate::repo::volume::Head;
use crate::repo::volume::Volume;
use crate::repo::BranchName;
use crate::repo::CommitName;
use crate::repo::Order;
use crate::repo::RepoName;

/// `Created → Running → {Completed | Failed | Cancelled}`, observed through
/// [`Runner::state`] and, authoritatively, through [`Runner::run`]'s return
/// value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Created,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// A single live execution of one branch's pipeline set against one upstream
/// commit. `branch` identifies the data branch that was committed to trigger
/// this run (the key the commit controller uses for succession); the output
/// branch written by each pipeline is named after `input_commit`.
pub struct Runner {
    volume: Arc<dyn Volume>,
    manifest_dir: String,
    data_repo: RepoName,
    output_prefix: String,
    input_commit: CommitName,
    branch: BranchName,
    shard_spec: Option<ShardSpec>,
    cancel: CancellationToken,
    state: Mutex<RunState>,
}

impl Runner {
    pub fn new(
        volume: Arc<dyn Volume>,
        manifest_dir: impl Into<String>,
        data_repo: RepoName,
        output_prefix: impl Into<String>,
        input_commit: CommitName,
        branch: BranchName,
        shard_spec: Option<ShardSpec>,
    ) -> Self {
        Self {
            volume,
            manifest_dir: manifest_dir.into(),
            data_repo,
            output_prefix: output_prefix.into(),
            input_commit,
            branch,
            shard_spec,
            cancel: CancellationToken::new(),
            state: Mutex::new(RunState::Created),
        }
    }

    pub fn branch(&self) -> &BranchName {
        &self.branch
    }

    pub fn state(&self) -> RunState {
        *self.state.lock().expect("state mutex not poisoned")
    }

    /// Idempotent; safe before `run` starts. Unblocks any in-flight job by
    /// aborting the next cancellation checkpoint `run` reaches.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    fn set_state(&self, state: RunState) {
        *self.state.lock().expect("state mutex not poisoned") = state;
    }

    /// Blocks until every pipeline manifest under
    /// `<data_repo>/<input_commit>/<manifest_dir>/` has produced a commit in
    /// `<output_prefix>/<pipeline>/`, or until [`Self::cancel`] is observed.
    /// Returns the commits produced, in manifest-glob order.
    #[tracing::instrument(skip(self), fields(branch = %self.branch, input_commit = %self.input_commit))]
    pub async fn run(&self) -> ShardResult<Vec<CommitName>> {
        self.set_state(RunState::Running);
        let data_store = Store::new(self.volume.clone(), self.data_repo.clone());
        let input_head = Head::Commit(self.input_commit.clone());
        let pattern = format!("{}/*", self.manifest_dir);
        let manifest_paths = data_store.glob(&input_head, &pattern).await?;

        let mut produced = Vec::with_capacity(manifest_paths.len());
        for path in manifest_paths {
            let pipeline_name = path.rsplit('/').next().unwrap_or(&path).to_string();
            if self.cancel.is_cancelled() {
                self.set_state(RunState::Cancelled);
                return Err(cancelled_error(&pipeline_name));
            }
            let commit = self
                .materialize_one(&path, &pipeline_name, &data_store, &input_head)
                .await
                .inspect_err(|_| self.set_state(RunState::Failed))?;
            produced.push(commit);
        }
        self.set_state(RunState::Completed);
        Ok(produced)
    }

    async fn materialize_one(
        &self,
        manifest_path: &str,
        pipeline_name: &str,
        data_store: &Store,
        input_head: &Head,
    ) -> ShardResult<CommitName> {
        let mut manifest_file = data_store.open(input_head, manifest_path).await?;
        let mut manifest_bytes = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut manifest_file, &mut manifest_bytes)
            .await
            .map_err(|e| ShardError::io(manifest_path, e))?;
        let manifest = Manifest::parse(pipeline_name, &manifest_bytes)?;

        let output_repo = RepoName::new(format!("{}/{pipeline_name}", self.output_prefix));
        let output_store = Store::new(self.volume.clone(), output_repo);
        output_store.ensure().await?;

        let parent = output_store
            .commits(None, Order::Desc)
            .await?
            .into_iter()
            .next()
            .map(|info| info.name);
        let output_branch = BranchName::new(self.input_commit.to_string());
        if output_store.has_branch(&output_branch).await? {
            output_store.discard_branch(&output_branch).await?;
        }
        output_store.branch(parent.as_ref(), &output_branch).await?;

        let job = self.run_job(&manifest, pipeline_name, data_store, input_head, &output_store, &output_branch);
        let outcome = tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            result = job => Some(result),
        };

        match outcome {
            None => {
                output_store.discard_branch(&output_branch).await.ok();
                Err(cancelled_error(pipeline_name))
            }
            Some(Err(e)) => {
                output_store.discard_branch(&output_branch).await.ok();
                Err(e)
            }
            Some(Ok(())) => {
                output_store.commit(&self.input_commit, &output_branch).await?;
                Ok(self.input_commit.clone())
            }
        }
    }

    /// Runs the pipeline's command as a child process. This is the seam an
    /// operator swaps for a real container launcher; here it is a bare
    /// subprocess given the input/output directories (when the backing
    /// volume exposes one) as environment variables.
    async fn run_job(
        &self,
        manifest: &Manifest,
        pipeline_name: &str,
        data_store: &Store,
        input_head: &Head,
        output_store: &Store,
        output_branch: &BranchName,
    ) -> ShardResult<()> {
        let Some((program, args)) = manifest.cmd.split_first() else {
            return Err(ShardError::BadManifest {
                name: pipeline_name.to_string(),
                reason: "cmd is empty".to_string(),
            });
        };

        let mut command = tokio::process::Command::new(program);
        command.args(args);
        command.env("SHARD_IMAGE", &manifest.image);
        command.env("SHARD_INPUT", &manifest.input);
        if let Some(spec) = &self.shard_spec {
            command.env("SHARD_SPEC", spec.to_string());
        }
        if let Some(dir) = data_store.local_path(input_head) {
            command.env("SHARD_INPUT_DIR", dir);
        }
        if let Some(dir) = output_store.local_path(&Head::Branch(output_branch.clone())) {
            command.env("SHARD_OUTPUT_DIR", dir);
        }
        command.stdin(Stdio::null());
        command.stdout(Stdio::null());
        command.stderr(Stdio::piped());

        tracing::debug!(cmd = ?command.as_std(), "spawning pipeline job");
        let child = command.spawn().map_err(|e| ShardError::PipelineFailed {
            pipeline: pipeline_name.to_string(),
            reason: format!("failed to spawn job: {e}"),
        })?;
        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ShardError::PipelineFailed {
                pipeline: pipeline_name.to_string(),
                reason: format!("failed to wait on job: {e}"),
            })?;
        if !output.status.success() {
            return Err(ShardError::PipelineFailed {
                pipeline: pipeline_name.to_string(),
                reason: format!(
                    "exit status {:?}: {}",
                    output.status.code(),
                    String::from_utf8_lossy(&output.stderr)
                ),
            });
        }
        Ok(())
    }
}

fn cancelled_error(what: &str) -> ShardError {
    ShardError::PipelineFailed {
        pipeline: what.to_string(),
        reason: "cancelled".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::repo::volume::LocalVolume;

    async fn seeded_runner(cmd: Vec<&str>) -> (tempfile::TempDir, Runner, CommitName) {
        let dir = tempfile::tempdir().unwrap();
        let volume: Arc<dyn Volume> = Arc::new(LocalVolume::new(dir.path()));
        let data_repo = RepoName::new("data-0");
        let data_store = Store::new(volume.clone(), data_repo.clone());
        data_store.ensure().await.unwrap();
        let branch = BranchName::default();
        data_store.branch(None, &branch).await.unwrap();

        let manifest = serde_json::json!({
            "image": "alpine",
            "input": "data-0",
            "cmd": cmd,
        })
        .to_string();
        data_store
            .create_from_reader(
                &branch,
                "pipeline/count",
                Box::pin(Cursor::new(manifest.into_bytes())),
            )
            .await
            .unwrap();

        let commit = CommitName::new("c1");
        data_store.commit(&commit, &branch).await.unwrap();

        let runner = Runner::new(
            volume,
            "pipeline",
            data_repo,
            "pipe-0",
            commit.clone(),
            branch,
            None,
        );
        (dir, runner, commit)
    }

    #[tokio::test]
    async fn successful_job_produces_a_commit_named_after_the_input() {
        let (_dir, runner, commit) = seeded_runner(vec!["true"]).await;
        assert_eq!(runner.state(), RunState::Created);
        let produced = runner.run().await.unwrap();
        assert_eq!(produced, vec![commit]);
        assert_eq!(runner.state(), RunState::Completed);
    }

    #[tokio::test]
    async fn failing_job_is_pipeline_failed_and_leaves_no_commit() {
        let (_dir, runner, _commit) = seeded_runner(vec!["false"]).await;
        let err = runner.run().await.unwrap_err();
        assert_matches::assert_matches!(err, ShardError::PipelineFailed { .. });
        assert_eq!(runner.state(), RunState::Failed);
    }

    #[tokio::test]
    async fn cancel_before_run_is_observed_immediately() {
        let (_dir, runner, _commit) = seeded_runner(vec!["true"]).await;
        runner.cancel();
        let err = runner.run().await.unwrap_err();
        assert_matches::assert_matches!(err, ShardError::PipelineFailed { reason, .. } if reason == "cancelled");
        assert_eq!(runner.state(), RunState::Cancelled);
    }
}
