//! The public Repository Store contract (component B): `Ensure`, `Branch`,
//! `Commit`, `Commits`, `IsCommit`, `Stat`, `Glob`, `CreateFromReader`,
//! `CopyFile`, `Remove`, `Open`, implemented in terms of a [`Volume`].

use std::pin::Pin;
use std::sync::Arc;

use tokio::io::AsyncRead;

use crate::error::ShardResult;
use crate::repo::volume::Head;
use crate::repo::volume::Volume;
use crate::repo::BranchName;
use crate::repo::CommitInfo;
use crate::repo::CommitName;
use crate::repo::Order;
use crate::repo::RepoName;
use crate::repo::Stat;

/// A handle to one named repository, backed by a [`Volume`]. Cloning is
/// cheap (the underlying volume is `Arc`-shared); every method is a thin,
/// blocking-free wrapper that delegates to the volume.
#[derive(Clone)]
pub struct Store {
    volume: Arc<dyn Volume>,
    repo: RepoName,
}

impl Store {
    pub fn new(volume: Arc<dyn Volume>, repo: impl Into<RepoName>) -> Self {
        Self {
            volume,
            repo: repo.into(),
        }
    }

    pub fn repo(&self) -> &RepoName {
        &self.repo
    }

    /// `Ensure(repo)`: the repo exists, empty if newly created.
    pub async fn ensure(&self) -> ShardResult<()> {
        self.volume.ensure_repo(&self.repo).await
    }

    pub async fn has_branch(&self, branch: &BranchName) -> ShardResult<bool> {
        self.volume.branch_exists(&self.repo, branch).await
    }

    pub async fn list_branches(&self) -> ShardResult<Vec<BranchName>> {
        self.volume.list_branches(&self.repo).await
    }

    /// `Branch(repo, fromCommit, newBranch)`.
    pub async fn branch(
        &self,
        from_commit: Option<&CommitName>,
        new_branch: &BranchName,
    ) -> ShardResult<()> {
        self.volume
            .fork_branch(&self.repo, from_commit, new_branch)
            .await
    }

    /// `Commit(repo, name, branch)`: seals `branch`'s current state under
    /// `name`. The branch remains writable from the new commit.
    pub async fn commit(
        &self,
        name: &CommitName,
        branch: &BranchName,
    ) -> ShardResult<CommitInfo> {
        self.volume
            .seal_branch_to_commit(&self.repo, branch, name)
            .await
    }

    pub async fn is_commit(&self, commit: &CommitName) -> ShardResult<bool> {
        self.volume.commit_exists(&self.repo, commit).await
    }

    /// `Commits(repo, from, order, visit)`. `from` selects the commit to
    /// start at (inclusive); `None` means "from the beginning of history" in
    /// `Asc` order or "from the most recent commit" in `Desc` order.
    pub async fn commits(
        &self,
        from: Option<&CommitName>,
        order: Order,
    ) -> ShardResult<Vec<CommitInfo>> {
        let mut infos = self.volume.list_commits(&self.repo).await?;
        if order == Order::Desc {
            infos.reverse();
        }
        if let Some(from) = from {
            if let Some(pos) = infos.iter().position(|c| &c.name == from) {
                infos.drain(..pos);
            }
        }
        Ok(infos)
    }

    pub async fn stat(&self, head: &Head, path: &str) -> ShardResult<Stat> {
        self.volume.stat(&self.repo, head, path).await
    }

    /// `Glob(pattern)`: ordered matches within `head`. An empty result is
    /// not an error here; callers that treat "no matches" as `NotFound`
    /// (e.g. the HTTP file-read handler) make that decision themselves.
    pub async fn glob(&self, head: &Head, pattern: &str) -> ShardResult<Vec<String>> {
        self.volume.glob(&self.repo, head, pattern).await
    }

    pub async fn create_from_reader(
        &self,
        branch: &BranchName,
        path: &str,
        contents: Pin<Box<dyn AsyncRead + Send + '_>>,
    ) -> ShardResult<u64> {
        self.volume
            .create_from_reader(&self.repo, branch, path, contents)
            .await
    }

    pub async fn copy_file(
        &self,
        branch: &BranchName,
        path: &str,
        contents: Pin<Box<dyn AsyncRead + Send + '_>>,
    ) -> ShardResult<u64> {
        self.volume
            .copy_from_reader(&self.repo, branch, path, contents)
            .await
    }

    pub async fn remove(&self, branch: &BranchName, path: &str) -> ShardResult<()> {
        self.volume.remove(&self.repo, branch, path).await
    }

    pub async fn open(&self, head: &Head, path: &str) -> ShardResult<tokio::fs::File> {
        self.volume.open(&self.repo, head, path).await
    }

    pub async fn discard_branch(&self, branch: &BranchName) -> ShardResult<()> {
        self.volume.discard_branch(&self.repo, branch).await
    }

    pub fn local_path(&self, head: &Head) -> Option<std::path::PathBuf> {
        self.volume.local_path(&self.repo, head)
    }

    pub fn volume(&self) -> &Arc<dyn Volume> {
        &self.volume
    }
}
