//! Peer Sync (component G): after a commit lands, push the full local
//! history of `data-<shard>` to every configured peer.
//!
//! Pushing the full history every time (rather than tracking a per-peer
//! `from` cursor) trades bandwidth for simplicity: `replica::push` already
//! treats an already-applied commit as a no-op, so re-sending history a peer
//! has seen costs nothing but the round trip.

use shard_lib::replica;
use shard_lib::replica::CommitDelta;

use crate::http::multipart;
use crate::http::state::AppState;

pub fn spawn_peer_sync(state: AppState) {
    let peers = state.peers().to_vec();
    if peers.is_empty() {
        return;
    }
    tokio::spawn(async move {
        let deltas = match replica::pull(&state.data_store(), None).await {
            Ok(deltas) => deltas,
            Err(error) => {
                tracing::warn!(%error, "peer sync: local pull failed");
                return;
            }
        };
        if deltas.is_empty() {
            return;
        }
        for peer in peers {
            let state = state.clone();
            let deltas = deltas.clone();
            tokio::spawn(async move {
                if let Err(error) = push_one(&state, &peer, &deltas).await {
                    tracing::warn!(peer, %error, "peer sync push failed");
                }
            });
        }
    });
}

async fn push_one(state: &AppState, peer: &str, deltas: &[CommitDelta]) -> Result<(), reqwest::Error> {
    let boundary = multipart::new_boundary();
    let parts: Vec<multipart::Part> = deltas
        .iter()
        .map(|delta| multipart::Part {
            name: delta.commit.to_string(),
            bytes: delta.bytes.clone(),
        })
        .collect();
    let body = multipart::encode(&boundary, &parts);
    let url = format!("{}/commit", peer.trim_end_matches('/'));
    state
        .http_client()
        .post(url)
        .header(
            reqwest::header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(body)
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}
