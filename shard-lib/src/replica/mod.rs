//! Replica Protocol (component C): pull/push of snapshot deltas between
//! shards, independent of any transport. The HTTP layer in `shard-server`
//! is responsible for turning [`CommitDelta`]s into multipart parts and
//! back; this module only knows about [`Store`].

pub mod delta;

use crate::error::ShardError;
use crate::error::ShardResult;
use crate::repo::store::Store;
use crate::repo::volume::Head;
use crate::repo::BranchName;
use crate::repo::CommitName;
use crate::repo::Order;

/// One commit's encoded snapshot delta, as produced by [`pull`] and consumed
/// by [`push`].
#[derive(Debug, Clone)]
pub struct CommitDelta {
    pub commit: CommitName,
    pub bytes: Vec<u8>,
}

/// Encodes every commit strictly newer than `from` (or the whole history if
/// `from` is `None`), in ascending order.
pub async fn pull(store: &Store, from: Option<&CommitName>) -> ShardResult<Vec<CommitDelta>> {
    let mut infos = store.commits(from, Order::Asc).await?;
    if let (Some(from), Some(first)) = (from, infos.first()) {
        if &first.name == from {
            infos.remove(0);
        }
    }
    let mut deltas = Vec::with_capacity(infos.len());
    for info in infos {
        let mut bytes = Vec::new();
        delta::encode_snapshot(store, &Head::Commit(info.name.clone()), &mut bytes).await?;
        deltas.push(CommitDelta {
            commit: info.name,
            bytes,
        });
    }
    Ok(deltas)
}

/// Applies `deltas` in order as new sealed commits. `expected_parent` is the
/// commit the first delta was generated relative to (the `from` a peer's
/// [`pull`] was called with); `None` means "a fresh history". Applying a
/// commit that already exists is a no-op; applying one whose predecessor is
/// neither already local nor earlier in this same batch fails with
/// [`ShardError::MissingParent`].
///
/// `scratch_branch` is used as a disposable staging branch and is discarded
/// (if present) before use and after each commit is sealed, so callers can
/// reuse one name across repeated `push` calls without collision.
pub async fn push(
    store: &Store,
    scratch_branch: &BranchName,
    expected_parent: Option<&CommitName>,
    deltas: &[CommitDelta],
) -> ShardResult<Vec<CommitName>> {
    let mut parent = expected_parent.cloned();
    let mut applied = Vec::with_capacity(deltas.len());

    for delta in deltas {
        if store.is_commit(&delta.commit).await? {
            parent = Some(delta.commit.clone());
            applied.push(delta.commit.clone());
            continue;
        }
        if let Some(expected) = &parent {
            if !store.is_commit(expected).await? {
                return Err(ShardError::MissingParent(delta.commit.clone()));
            }
        }

        if store.has_branch(scratch_branch).await? {
            store.discard_branch(scratch_branch).await?;
        }
        store.branch(parent.as_ref(), scratch_branch).await?;
        delta::decode_snapshot(store, scratch_branch, &mut delta.bytes.as_slice()).await?;
        store.commit(&delta.commit, scratch_branch).await?;
        store.discard_branch(scratch_branch).await?;

        parent = Some(delta.commit.clone());
        applied.push(delta.commit.clone());
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Arc;

    use super::*;
    use crate::repo::volume::LocalVolume;

    async fn seeded_origin() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let volume = Arc::new(LocalVolume::new(dir.path()));
        let store = Store::new(volume, "data-0");
        store.ensure().await.unwrap();
        let branch = BranchName::default();
        store.branch(None, &branch).await.unwrap();
        for (name, contents) in [("c1", "one"), ("c2", "two"), ("c3", "three")] {
            store
                .create_from_reader(
                    &branch,
                    "value.txt",
                    Box::pin(Cursor::new(contents.as_bytes().to_vec())),
                )
                .await
                .unwrap();
            store.commit(&CommitName::new(name), &branch).await.unwrap();
        }
        (dir, store)
    }

    async fn empty_replica() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let volume = Arc::new(LocalVolume::new(dir.path()));
        let store = Store::new(volume, "data-0");
        store.ensure().await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn push_pull_round_trip_on_fresh_replica() {
        let (_origin_dir, origin) = seeded_origin().await;
        let (_replica_dir, replica) = empty_replica().await;

        let deltas = pull(&origin, None).await.unwrap();
        assert_eq!(deltas.len(), 3);

        let scratch = BranchName::new("_replicate");
        let applied = push(&replica, &scratch, None, &deltas).await.unwrap();
        assert_eq!(
            applied,
            vec![
                CommitName::new("c1"),
                CommitName::new("c2"),
                CommitName::new("c3"),
            ]
        );
        for name in ["c1", "c2", "c3"] {
            assert!(replica.is_commit(&CommitName::new(name)).await.unwrap());
        }

        let head = Head::Commit(CommitName::new("c3"));
        let mut file = replica.open(&head, "value.txt").await.unwrap();
        let mut s = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut file, &mut s)
            .await
            .unwrap();
        assert_eq!(s, "three");
    }

    #[tokio::test]
    async fn applying_existing_commit_is_a_no_op() {
        let (_origin_dir, origin) = seeded_origin().await;
        let (_replica_dir, replica) = empty_replica().await;
        let scratch = BranchName::new("_replicate");

        let deltas = pull(&origin, None).await.unwrap();
        push(&replica, &scratch, None, &deltas).await.unwrap();

        // Re-applying the same deltas must succeed and change nothing.
        let applied_again = push(&replica, &scratch, None, &deltas).await.unwrap();
        assert_eq!(applied_again.len(), 3);
    }

    #[tokio::test]
    async fn pull_from_filters_to_newer_commits() {
        let (_origin_dir, origin) = seeded_origin().await;
        let deltas = pull(&origin, Some(&CommitName::new("c1"))).await.unwrap();
        let names: Vec<_> = deltas.iter().map(|d| d.commit.to_string()).collect();
        assert_eq!(names, vec!["c2", "c3"]);
    }

    #[tokio::test]
    async fn push_with_missing_parent_fails() {
        let (_origin_dir, origin) = seeded_origin().await;
        let (_replica_dir, replica) = empty_replica().await;
        let scratch = BranchName::new("_replicate");

        // c3's delta claims c2 as its predecessor, but the replica has none
        // of the earlier history.
        let all = pull(&origin, None).await.unwrap();
        let just_c3 = vec![all[2].clone()];
        let err = push(&replica, &scratch, Some(&CommitName::new("c2")), &just_c3)
            .await
            .unwrap_err();
        assert_matches::assert_matches!(err, ShardError::MissingParent(_));
    }
}
