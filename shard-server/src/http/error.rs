//! One place where every `ShardError` becomes an HTTP status and body, per
//! the taxonomy in the system spec's error handling section.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use shard_lib::ShardError;

pub struct HttpError(pub ShardError);

impl From<ShardError> for HttpError {
    fn from(err: ShardError) -> Self {
        Self(err)
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, body) = status_for(&self.0);
        tracing::warn!(error = %self.0, status = status.as_u16(), "request failed");
        (status, body).into_response()
    }
}

fn status_for(err: &ShardError) -> (StatusCode, String) {
    use ShardError::*;
    match err {
        BadShardSpec(_) | BadManifest { .. } => (StatusCode::BAD_REQUEST, err.to_string()),
        MissingCommit { .. } | MissingBranch { .. } | NotFound(_) | GlobEmpty { .. } => {
            (StatusCode::NOT_FOUND, err.to_string())
        }
        BranchExists { .. } | NameTaken { .. } => (StatusCode::CONFLICT, err.to_string()),
        ReadOnly(_) => (StatusCode::CONFLICT, err.to_string()),
        MissingParent(_) => (StatusCode::CONFLICT, err.to_string()),
        PipelineFailed { .. } => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, err.to_string()),
        Io { .. } => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}
