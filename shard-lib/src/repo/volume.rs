//! [`Volume`]: the external copy-on-write filesystem driver contract.
//!
//! The real driver (e.g. btrfs/ZFS send/receive) is out of scope for this
//! crate (see the system spec's purpose & scope section); this trait pins
//! down exactly what [`super::store::Store`] needs from it, the same way
//! `Backend` lets the commit/tree logic in a version-control library run
//! unmodified against more than one storage engine. [`LocalVolume`] is a
//! plain-directory stand-in that satisfies the contract well enough to drive
//! the rest of the system and to exercise it in tests.

use std::path::Path;
use std::path::PathBuf;
use std::pin::Pin;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::io::AsyncRead;

use crate::error::ShardError;
use crate::error::ShardResult;
use crate::repo::BranchName;
use crate::repo::CommitInfo;
use crate::repo::CommitName;
use crate::repo::RepoName;
use crate::repo::Stat;

/// Which writable or sealed snapshot a path is resolved against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Head {
    Branch(BranchName),
    Commit(CommitName),
}

/// The operations a snapshotting filesystem driver must provide.
///
/// All operations are blocking on local disk from the driver's point of
/// view; the `async fn`s exist so callers can `.await` them without
/// stalling a worker thread (the provided [`LocalVolume`] offloads its
/// filesystem work to [`tokio::task::spawn_blocking`] where it matters: file
/// content I/O).
#[async_trait]
pub trait Volume: Send + Sync {
    /// Creates `repo` if it doesn't exist yet. A no-op if it does.
    async fn ensure_repo(&self, repo: &RepoName) -> ShardResult<()>;

    async fn branch_exists(&self, repo: &RepoName, branch: &BranchName) -> ShardResult<bool>;

    /// Forks a new writable branch from `from_commit` (or an empty snapshot
    /// if `None`).
    async fn fork_branch(
        &self,
        repo: &RepoName,
        from_commit: Option<&CommitName>,
        new_branch: &BranchName,
    ) -> ShardResult<()>;

    /// Seals `branch`'s current state under `commit`. The branch remains
    /// writable afterward.
    async fn seal_branch_to_commit(
        &self,
        repo: &RepoName,
        branch: &BranchName,
        commit: &CommitName,
    ) -> ShardResult<CommitInfo>;

    async fn commit_exists(&self, repo: &RepoName, commit: &CommitName) -> ShardResult<bool>;

    /// Lists sealed commits together with their seal time, in ascending
    /// creation order. Callers apply ordering/filtering on top of this.
    async fn list_commits(&self, repo: &RepoName) -> ShardResult<Vec<CommitInfo>>;

    /// Lists writable branch names, in no particular order.
    async fn list_branches(&self, repo: &RepoName) -> ShardResult<Vec<BranchName>>;

    async fn stat(&self, repo: &RepoName, head: &Head, path: &str) -> ShardResult<Stat>;

    /// Ordered (lexicographically) list of file paths under `head` matching
    /// `pattern`. Directories are never included.
    async fn glob(&self, repo: &RepoName, head: &Head, pattern: &str) -> ShardResult<Vec<String>>;

    /// Writes `contents` to a new file at `path`, creating parent
    /// directories as needed. Returns the number of bytes written.
    async fn create_from_reader(
        &self,
        repo: &RepoName,
        branch: &BranchName,
        path: &str,
        contents: Pin<Box<dyn AsyncRead + Send + 'async_trait>>,
    ) -> ShardResult<u64>;

    /// Like [`Self::create_from_reader`], but also valid when `path` already
    /// exists (it is atomically replaced).
    async fn copy_from_reader(
        &self,
        repo: &RepoName,
        branch: &BranchName,
        path: &str,
        contents: Pin<Box<dyn AsyncRead + Send + 'async_trait>>,
    ) -> ShardResult<u64> {
        self.create_from_reader(repo, branch, path, contents).await
    }

    async fn remove(&self, repo: &RepoName, branch: &BranchName, path: &str) -> ShardResult<()>;

    async fn open(
        &self,
        repo: &RepoName,
        head: &Head,
        path: &str,
    ) -> ShardResult<tokio::fs::File>;

    /// Discards a branch and everything written to it without sealing it.
    /// Used to clean up scratch branches: a cancelled pipeline run's
    /// in-progress output, or a replica-apply staging area.
    async fn discard_branch(&self, repo: &RepoName, branch: &BranchName) -> ShardResult<()>;

    /// A real filesystem path backing `head`, if this volume has one. The
    /// pipeline runner uses this to hand a job process a concrete input/
    /// output directory; a volume with no on-disk representation returns
    /// `None`, and the runner's job adapter is expected to cope (this is the
    /// seam a real container-runtime driver would replace).
    fn local_path(&self, repo: &RepoName, head: &Head) -> Option<PathBuf> {
        let _ = (repo, head);
        None
    }
}

/// A [`Volume`] backed by ordinary recursive directory copies on the host
/// filesystem. Branching copies the source snapshot; sealing copies the
/// branch into the commits directory and marks it read-only. This trades the
/// atomicity and space-sharing a real CoW driver gives for free for plain
/// `std::fs` calls, while preserving every invariant the store depends on:
/// a sealed commit is immutable and a branch fork is a full, independent
/// snapshot of its parent.
#[derive(Debug, Clone)]
pub struct LocalVolume {
    root: PathBuf,
}

impl LocalVolume {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn repo_dir(&self, repo: &RepoName) -> PathBuf {
        self.root.join(repo.as_str())
    }

    fn branches_dir(&self, repo: &RepoName) -> PathBuf {
        self.repo_dir(repo).join("branches")
    }

    fn commits_dir(&self, repo: &RepoName) -> PathBuf {
        self.repo_dir(repo).join("commits")
    }

    fn branch_dir(&self, repo: &RepoName, branch: &BranchName) -> PathBuf {
        self.branches_dir(repo).join(branch.as_str())
    }

    fn commit_dir(&self, repo: &RepoName, commit: &CommitName) -> PathBuf {
        self.commits_dir(repo).join(commit.as_str())
    }

    fn head_dir(&self, repo: &RepoName, head: &Head) -> PathBuf {
        match head {
            Head::Branch(b) => self.branch_dir(repo, b),
            Head::Commit(c) => self.commit_dir(repo, c),
        }
    }

    fn io_err(path: &Path, source: std::io::Error) -> ShardError {
        ShardError::io(path, source)
    }
}

#[async_trait]
impl Volume for LocalVolume {
    async fn ensure_repo(&self, repo: &RepoName) -> ShardResult<()> {
        let branches = self.branches_dir(repo);
        let commits = self.commits_dir(repo);
        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&branches).map_err(|e| LocalVolume::io_err(&branches, e))?;
            std::fs::create_dir_all(&commits).map_err(|e| LocalVolume::io_err(&commits, e))
        })
        .await
        .expect("ensure_repo task does not panic")
    }

    async fn branch_exists(&self, repo: &RepoName, branch: &BranchName) -> ShardResult<bool> {
        Ok(self.branch_dir(repo, branch).is_dir())
    }

    async fn fork_branch(
        &self,
        repo: &RepoName,
        from_commit: Option<&CommitName>,
        new_branch: &BranchName,
    ) -> ShardResult<()> {
        let target = self.branch_dir(repo, new_branch);
        if target.exists() {
            return Err(ShardError::BranchExists {
                repo: repo.to_string(),
                branch: new_branch.to_string(),
            });
        }
        let source = match from_commit {
            Some(commit) => {
                let dir = self.commit_dir(repo, commit);
                if !dir.is_dir() {
                    return Err(ShardError::MissingCommit {
                        repo: repo.to_string(),
                        commit: commit.clone(),
                    });
                }
                Some(dir)
            }
            None => None,
        };
        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&target).map_err(|e| LocalVolume::io_err(&target, e))?;
            if let Some(source) = source {
                copy_dir_contents(&source, &target)?;
            }
            Ok(())
        })
        .await
        .expect("fork_branch task does not panic")
    }

    async fn seal_branch_to_commit(
        &self,
        repo: &RepoName,
        branch: &BranchName,
        commit: &CommitName,
    ) -> ShardResult<CommitInfo> {
        let branch_dir = self.branch_dir(repo, branch);
        if !branch_dir.is_dir() {
            return Err(ShardError::MissingBranch {
                repo: repo.to_string(),
                branch: branch.to_string(),
            });
        }
        let commit_dir = self.commit_dir(repo, commit);
        if commit_dir.exists() {
            return Err(ShardError::NameTaken {
                repo: repo.to_string(),
                commit: commit.clone(),
            });
        }
        let commits_dir = self.commits_dir(repo);
        let commit = commit.clone();
        tokio::task::spawn_blocking(move || {
            let temp_dir = tempfile::Builder::new()
                .prefix(".sealing-")
                .tempdir_in(&commits_dir)
                .map_err(|e| LocalVolume::io_err(&commits_dir, e))?;
            copy_dir_contents(&branch_dir, temp_dir.path())?;
            mark_read_only(temp_dir.path())?;
            let commit_dir = commits_dir.join(commit.as_str());
            std::fs::rename(temp_dir.keep(), &commit_dir)
                .map_err(|e| LocalVolume::io_err(&commit_dir, e))?;
            let modified = std::fs::metadata(&commit_dir)
                .and_then(|m| m.modified())
                .map_err(|e| LocalVolume::io_err(&commit_dir, e))?;
            Ok(CommitInfo {
                name: commit,
                tstamp: chrono::DateTime::<chrono::Utc>::from(modified).into(),
            })
        })
        .await
        .expect("seal_branch_to_commit task does not panic")
    }

    async fn commit_exists(&self, repo: &RepoName, commit: &CommitName) -> ShardResult<bool> {
        Ok(self.commit_dir(repo, commit).is_dir())
    }

    async fn list_commits(&self, repo: &RepoName) -> ShardResult<Vec<CommitInfo>> {
        let commits_dir = self.commits_dir(repo);
        tokio::task::spawn_blocking(move || {
            if !commits_dir.is_dir() {
                return Ok(vec![]);
            }
            let mut infos = vec![];
            for entry in
                std::fs::read_dir(&commits_dir).map_err(|e| LocalVolume::io_err(&commits_dir, e))?
            {
                let entry = entry.map_err(|e| LocalVolume::io_err(&commits_dir, e))?;
                if entry.file_name().to_string_lossy().starts_with('.') {
                    continue;
                }
                let metadata = entry
                    .metadata()
                    .map_err(|e| LocalVolume::io_err(&entry.path(), e))?;
                let modified = metadata
                    .modified()
                    .map_err(|e| LocalVolume::io_err(&entry.path(), e))?;
                infos.push(CommitInfo {
                    name: CommitName::new(entry.file_name().to_string_lossy().into_owned()),
                    tstamp: chrono::DateTime::<chrono::Utc>::from(modified).into(),
                });
            }
            infos.sort_by(|a, b| a.tstamp.cmp(&b.tstamp).then_with(|| a.name.cmp(&b.name)));
            Ok(infos)
        })
        .await
        .expect("list_commits task does not panic")
    }

    async fn list_branches(&self, repo: &RepoName) -> ShardResult<Vec<BranchName>> {
        let branches_dir = self.branches_dir(repo);
        tokio::task::spawn_blocking(move || {
            if !branches_dir.is_dir() {
                return Ok(vec![]);
            }
            let mut names = vec![];
            for entry in std::fs::read_dir(&branches_dir)
                .map_err(|e| LocalVolume::io_err(&branches_dir, e))?
            {
                let entry = entry.map_err(|e| LocalVolume::io_err(&branches_dir, e))?;
                names.push(BranchName::new(entry.file_name().to_string_lossy().into_owned()));
            }
            names.sort();
            Ok(names)
        })
        .await
        .expect("list_branches task does not panic")
    }

    async fn stat(&self, repo: &RepoName, head: &Head, path: &str) -> ShardResult<Stat> {
        let full = self.head_dir(repo, head).join(path);
        tokio::task::spawn_blocking(move || {
            let metadata = std::fs::metadata(&full).map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ShardError::NotFound(full.clone())
                } else {
                    LocalVolume::io_err(&full, e)
                }
            })?;
            let modified = metadata
                .modified()
                .map_err(|e| LocalVolume::io_err(&full, e))?;
            Ok(Stat {
                name: full
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                modified: chrono::DateTime::<chrono::Utc>::from(modified).into(),
                is_dir: metadata.is_dir(),
                len: metadata.len(),
            })
        })
        .await
        .expect("stat task does not panic")
    }

    async fn glob(&self, repo: &RepoName, head: &Head, pattern: &str) -> ShardResult<Vec<String>> {
        let root = self.head_dir(repo, head);
        let glob = globset::Glob::new(pattern)
            .map_err(|_| ShardError::NotFound(PathBuf::from(pattern)))?
            .compile_matcher();
        tokio::task::spawn_blocking(move || {
            let mut matches = vec![];
            walk_files(&root, &root, &mut |rel, _abs| {
                if glob.is_match(rel) {
                    matches.push(rel.to_string_lossy().replace('\\', "/"));
                }
            })?;
            matches.sort();
            Ok(matches)
        })
        .await
        .expect("glob task does not panic")
    }

    async fn create_from_reader(
        &self,
        repo: &RepoName,
        branch: &BranchName,
        path: &str,
        mut contents: Pin<Box<dyn AsyncRead + Send + 'async_trait>>,
    ) -> ShardResult<u64> {
        let full = self.branch_dir(repo, branch).join(path);
        let parent = full
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| full.clone());
        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(|e| LocalVolume::io_err(&parent, e))?;

        let parent_for_temp = parent.clone();
        let temp_file = tokio::task::spawn_blocking(move || {
            NamedTempFile::new_in(&parent_for_temp)
                .map_err(|e| LocalVolume::io_err(&parent_for_temp, e))
        })
        .await
        .expect("spawn_blocking does not panic")?;

        let mut file = tokio::fs::File::from_std(temp_file.reopen().map_err(|e| {
            LocalVolume::io_err(&full, e)
        })?);
        let written = tokio::io::copy(&mut contents, &mut file)
            .await
            .map_err(|e| LocalVolume::io_err(&full, e))?;
        drop(file);

        tokio::task::spawn_blocking(move || {
            temp_file
                .persist(&full)
                .map_err(|e| LocalVolume::io_err(&full, e.error))
        })
        .await
        .expect("spawn_blocking does not panic")?;
        Ok(written)
    }

    async fn remove(&self, repo: &RepoName, branch: &BranchName, path: &str) -> ShardResult<()> {
        let full = self.branch_dir(repo, branch).join(path);
        tokio::fs::remove_file(&full).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ShardError::NotFound(full.clone())
            } else {
                LocalVolume::io_err(&full, e)
            }
        })
    }

    async fn open(
        &self,
        repo: &RepoName,
        head: &Head,
        path: &str,
    ) -> ShardResult<tokio::fs::File> {
        let full = self.head_dir(repo, head).join(path);
        tokio::fs::File::open(&full).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ShardError::NotFound(full.clone())
            } else {
                LocalVolume::io_err(&full, e)
            }
        })
    }

    async fn discard_branch(&self, repo: &RepoName, branch: &BranchName) -> ShardResult<()> {
        let dir = self.branch_dir(repo, branch);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LocalVolume::io_err(&dir, e)),
        }
    }

    fn local_path(&self, repo: &RepoName, head: &Head) -> Option<PathBuf> {
        Some(self.head_dir(repo, head))
    }
}

fn copy_dir_contents(source: &Path, dest: &Path) -> ShardResult<()> {
    for entry in std::fs::read_dir(source).map_err(|e| LocalVolume::io_err(source, e))? {
        let entry = entry.map_err(|e| LocalVolume::io_err(source, e))?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        let file_type = entry
            .file_type()
            .map_err(|e| LocalVolume::io_err(&from, e))?;
        if file_type.is_dir() {
            std::fs::create_dir_all(&to).map_err(|e| LocalVolume::io_err(&to, e))?;
            copy_dir_contents(&from, &to)?;
        } else {
            std::fs::copy(&from, &to).map_err(|e| LocalVolume::io_err(&to, e))?;
        }
    }
    Ok(())
}

fn mark_read_only(dir: &Path) -> ShardResult<()> {
    for entry in std::fs::read_dir(dir).map_err(|e| LocalVolume::io_err(dir, e))? {
        let entry = entry.map_err(|e| LocalVolume::io_err(dir, e))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|e| LocalVolume::io_err(&path, e))?;
        if file_type.is_dir() {
            mark_read_only(&path)?;
        }
        let mut perms = std::fs::metadata(&path)
            .map_err(|e| LocalVolume::io_err(&path, e))?
            .permissions();
        perms.set_readonly(true);
        std::fs::set_permissions(&path, perms).map_err(|e| LocalVolume::io_err(&path, e))?;
    }
    let mut perms = std::fs::metadata(dir)
        .map_err(|e| LocalVolume::io_err(dir, e))?
        .permissions();
    perms.set_readonly(true);
    std::fs::set_permissions(dir, perms).map_err(|e| LocalVolume::io_err(dir, e))
}

fn walk_files(
    root: &Path,
    dir: &Path,
    visit: &mut impl FnMut(&Path, &Path),
) -> ShardResult<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir).map_err(|e| LocalVolume::io_err(dir, e))? {
        let entry = entry.map_err(|e| LocalVolume::io_err(dir, e))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|e| LocalVolume::io_err(&path, e))?;
        if file_type.is_dir() {
            walk_files(root, &path, visit)?;
        } else {
            let rel = path.strip_prefix(root).unwrap_or(&path);
            visit(rel, &path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;

    use super::*;

    fn volume() -> (tempfile::TempDir, LocalVolume) {
        let dir = tempfile::tempdir().unwrap();
        let volume = LocalVolume::new(dir.path());
        (dir, volume)
    }

    #[tokio::test]
    async fn branch_fork_and_seal_round_trips() {
        let (_dir, volume) = volume();
        let repo = RepoName::new("data-0");
        let branch = BranchName::new("master");
        volume.ensure_repo(&repo).await.unwrap();
        volume.fork_branch(&repo, None, &branch).await.unwrap();
        assert!(volume.branch_exists(&repo, &branch).await.unwrap());

        volume
            .create_from_reader(
                &repo,
                &branch,
                "a.txt",
                Box::pin(Cursor::new(b"hi".to_vec())),
            )
            .await
            .unwrap();

        let commit = CommitName::new("c1");
        volume
            .seal_branch_to_commit(&repo, &branch, &commit)
            .await
            .unwrap();
        assert!(volume.commit_exists(&repo, &commit).await.unwrap());

        let head = Head::Commit(commit.clone());
        let mut file = volume.open(&repo, &head, "a.txt").await.unwrap();
        let mut buf = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut file, &mut buf)
            .await
            .unwrap();
        assert_eq!(buf, "hi");
    }

    #[tokio::test]
    async fn sealing_same_name_twice_is_name_taken() {
        let (_dir, volume) = volume();
        let repo = RepoName::new("data-0");
        let branch = BranchName::new("master");
        volume.ensure_repo(&repo).await.unwrap();
        volume.fork_branch(&repo, None, &branch).await.unwrap();
        let commit = CommitName::new("c1");
        volume
            .seal_branch_to_commit(&repo, &branch, &commit)
            .await
            .unwrap();
        let err = volume
            .seal_branch_to_commit(&repo, &branch, &commit)
            .await
            .unwrap_err();
        assert_matches::assert_matches!(err, ShardError::NameTaken { .. });
    }

    #[tokio::test]
    async fn forking_from_missing_commit_fails() {
        let (_dir, volume) = volume();
        let repo = RepoName::new("data-0");
        volume.ensure_repo(&repo).await.unwrap();
        let err = volume
            .fork_branch(&repo, Some(&CommitName::new("nope")), &BranchName::new("b"))
            .await
            .unwrap_err();
        assert_matches::assert_matches!(err, ShardError::MissingCommit { .. });
    }

    #[tokio::test]
    async fn list_branches_returns_sorted_names() {
        let (_dir, volume) = volume();
        let repo = RepoName::new("data-0");
        volume.ensure_repo(&repo).await.unwrap();
        for name in ["b", "a"] {
            volume
                .fork_branch(&repo, None, &BranchName::new(name))
                .await
                .unwrap();
        }
        let names = volume.list_branches(&repo).await.unwrap();
        assert_eq!(names, vec![BranchName::new("a"), BranchName::new("b")]);
    }

    #[tokio::test]
    async fn glob_results_are_lexicographically_ordered() {
        let (_dir, volume) = volume();
        let repo = RepoName::new("data-0");
        let branch = BranchName::new("master");
        volume.ensure_repo(&repo).await.unwrap();
        volume.fork_branch(&repo, None, &branch).await.unwrap();
        for name in ["b.txt", "a.txt", "dir/c.txt"] {
            volume
                .create_from_reader(&repo, &branch, name, Box::pin(Cursor::new(b"x".to_vec())))
                .await
                .unwrap();
        }
        let head = Head::Branch(branch);
        let matches = volume.glob(&repo, &head, "**/*.txt").await.unwrap();
        assert_eq!(matches, vec!["a.txt", "b.txt", "dir/c.txt"]);
    }
}
