//! Wire-independent encode/decode of a snapshot delta.
//!
//! A delta is a flat sequence of records, each
//! `(path_len: u32 LE, path: [u8; path_len], file_len: u64 LE, file: [u8; file_len])`,
//! terminated by end-of-stream. There is no outer length or checksum: the
//! multipart layer (in `shard-server`) already frames each delta as one
//! part, so this format only has to be self-delimiting within that part.

use std::pin::Pin;

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt as _;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt as _;

use crate::error::ShardError;
use crate::error::ShardResult;
use crate::repo::store::Store;
use crate::repo::volume::Head;

/// Writes every file reachable under `head` (via `Glob("**/*")`, so always in
/// lexicographic order) as one delta record per file.
pub async fn encode_snapshot(
    store: &Store,
    head: &Head,
    writer: &mut (impl AsyncWrite + Unpin + Send),
) -> ShardResult<()> {
    let paths = store.glob(head, "**/*").await?;
    for path in paths {
        let mut file = store.open(head, &path).await?;
        let path_bytes = path.as_bytes();
        writer
            .write_all(&(path_bytes.len() as u32).to_le_bytes())
            .await
            .map_err(|e| ShardError::io(&path, e))?;
        writer
            .write_all(path_bytes)
            .await
            .map_err(|e| ShardError::io(&path, e))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| ShardError::io(&path, e))?
            .len();
        writer
            .write_all(&len.to_le_bytes())
            .await
            .map_err(|e| ShardError::io(&path, e))?;
        tokio::io::copy(&mut file, writer)
            .await
            .map_err(|e| ShardError::io(&path, e))?;
    }
    Ok(())
}

/// Reads records off `reader` until exhausted, writing each into `branch`.
/// Returns the number of files applied.
pub async fn decode_snapshot(
    store: &Store,
    branch: &crate::repo::BranchName,
    reader: &mut (impl AsyncRead + Unpin + Send),
) -> ShardResult<usize> {
    let mut count = 0;
    loop {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(ShardError::io("<delta stream>", e)),
        }
        let path_len = u32::from_le_bytes(len_buf) as usize;
        let mut path_buf = vec![0u8; path_len];
        reader
            .read_exact(&mut path_buf)
            .await
            .map_err(|e| ShardError::io("<delta stream>", e))?;
        let path = String::from_utf8(path_buf)
            .map_err(|_| ShardError::BadManifest {
                name: "<delta stream>".to_string(),
                reason: "path is not valid UTF-8".to_string(),
            })?;

        let mut file_len_buf = [0u8; 8];
        reader
            .read_exact(&mut file_len_buf)
            .await
            .map_err(|e| ShardError::io(&path, e))?;
        let file_len = u64::from_le_bytes(file_len_buf);

        let mut remaining = (&mut *reader).take(file_len);
        let contents: Pin<Box<dyn AsyncRead + Send + '_>> = Box::pin(&mut remaining);
        store.create_from_reader(branch, &path, contents).await?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Arc;

    use super::*;
    use crate::repo::volume::LocalVolume;
    use crate::repo::BranchName;
    use crate::repo::CommitName;

    async fn seeded_store() -> (tempfile::TempDir, Store, CommitName) {
        let dir = tempfile::tempdir().unwrap();
        let volume = Arc::new(LocalVolume::new(dir.path()));
        let store = Store::new(volume, "data-0");
        store.ensure().await.unwrap();
        let branch = BranchName::default();
        store.branch(None, &branch).await.unwrap();
        store
            .create_from_reader(&branch, "a.txt", Box::pin(Cursor::new(b"hello".to_vec())))
            .await
            .unwrap();
        store
            .create_from_reader(
                &branch,
                "dir/b.txt",
                Box::pin(Cursor::new(b"world".to_vec())),
            )
            .await
            .unwrap();
        let commit = CommitName::new("c1");
        store.commit(&commit, &branch).await.unwrap();
        (dir, store, commit)
    }

    #[tokio::test]
    async fn encode_then_decode_reproduces_files() {
        let (_dir, store, commit) = seeded_store().await;
        let mut buf = Vec::new();
        encode_snapshot(&store, &Head::Commit(commit), &mut buf)
            .await
            .unwrap();

        let target = BranchName::new("restore");
        store.branch(None, &target).await.unwrap();
        let applied = decode_snapshot(&store, &target, &mut Cursor::new(buf))
            .await
            .unwrap();
        assert_eq!(applied, 2);

        let head = Head::Branch(target);
        let mut file = store.open(&head, "a.txt").await.unwrap();
        let mut s = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut file, &mut s)
            .await
            .unwrap();
        assert_eq!(s, "hello");
    }

    #[tokio::test]
    async fn empty_snapshot_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let volume = Arc::new(LocalVolume::new(dir.path()));
        let store = Store::new(volume, "data-0");
        store.ensure().await.unwrap();
        let branch = BranchName::default();
        store.branch(None, &branch).await.unwrap();
        let commit = CommitName::new("empty");
        store.commit(&commit, &branch).await.unwrap();

        let mut buf = Vec::new();
        encode_snapshot(&store, &Head::Commit(commit), &mut buf)
            .await
            .unwrap();
        assert!(buf.is_empty());
    }
}
