//! HTTP Dispatcher (component F): route table, parameter extraction, and
//! the handlers that bridge each request into `shard-lib` calls.

use std::io::Cursor;
use std::path::PathBuf;
use std::time::Duration;

use axum::body::Body;
use axum::extract::FromRequest;
use axum::extract::Multipart;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::Request;
use axum::extract::State;
use axum::http::Method;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio_util::io::ReaderStream;

use shard_lib::error::ShardError;
use shard_lib::error::ShardResult;
use shard_lib::partition;
use shard_lib::partition::ShardSpec;
use shard_lib::pipeline::Runner;
use shard_lib::replica;
use shard_lib::replica::CommitDelta;
use shard_lib::repo::store::Store;
use shard_lib::repo::volume::Head;
use shard_lib::repo::BranchName;
use shard_lib::repo::CommitName;
use shard_lib::repo::Order;
use shard_lib::repo::DEFAULT_BRANCH;

use crate::http::error::HttpError;
use crate::http::multipart;
use crate::http::state::AppState;
use crate::http::state::MANIFEST_DIR;
use crate::peer_sync;

/// `WaitPipeline`'s bound when the dispatcher calls it on behalf of a
/// `/pipeline/:name/file/*path` request.
const PIPELINE_WAIT_BOUND: Duration = Duration::from_secs(30);

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/commit", get(list_commits).post(accept_commit_or_push))
        .route("/branch", get(list_branches).post(create_branch))
        .route(
            "/file/",
            get(file_io_root)
                .post(file_io_root)
                .put(file_io_root)
                .delete(file_io_root),
        )
        .route(
            "/file/*path",
            get(file_io).post(file_io).put(file_io).delete(file_io),
        )
        .route("/commit/:commit/file/*path", get(file_io_at_commit))
        .route("/pipeline/:name/file/*path", get(pipeline_file))
        .route("/pipeline/:name", axum::routing::post(upload_manifest))
        .route("/pull", get(pull))
        .with_state(state)
}

async fn ping() -> &'static str {
    "pong\n"
}

async fn list_commits(State(state): State<AppState>) -> Result<Response, HttpError> {
    let infos = state.data_store().commits(None, Order::Desc).await?;
    let mut body = String::new();
    for info in infos {
        body.push_str(&serde_json::to_string(&info).expect("CommitInfo always serializes"));
        body.push('\n');
    }
    Ok(body.into_response())
}

async fn list_branches(State(state): State<AppState>) -> Result<Response, HttpError> {
    let names = state.data_store().list_branches().await?;
    let mut body = String::new();
    for name in names {
        body.push_str(
            &serde_json::to_string(name.as_str()).expect("branch names always serialize"),
        );
        body.push('\n');
    }
    Ok(body.into_response())
}

#[derive(Debug, Deserialize)]
struct CreateBranchQuery {
    branch: Option<String>,
    commit: Option<String>,
}

async fn create_branch(
    State(state): State<AppState>,
    Query(query): Query<CreateBranchQuery>,
) -> Result<Response, HttpError> {
    let branch = BranchName::new(query.branch.unwrap_or_else(|| DEFAULT_BRANCH.to_string()));
    let from_commit = query.commit.map(CommitName::new);
    state.data_store().branch(from_commit.as_ref(), &branch).await?;
    Ok(branch.to_string().into_response())
}

#[derive(Debug, Deserialize)]
struct CommitQuery {
    branch: Option<String>,
    commit: Option<String>,
}

/// `POST /commit`: dispatches on `Content-Type`. A `multipart/*` body is a
/// replica push; anything else seals the named branch and spawns its runner.
async fn accept_commit_or_push(
    State(state): State<AppState>,
    Query(query): Query<CommitQuery>,
    request: Request,
) -> Result<Response, HttpError> {
    let is_multipart = request
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/"));

    if is_multipart {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| ShardError::BadManifest {
                name: "<push body>".to_string(),
                reason: e.to_string(),
            })?;
        accept_push(state, multipart).await
    } else {
        accept_commit(state, query).await
    }
}

async fn accept_commit(state: AppState, query: CommitQuery) -> Result<Response, HttpError> {
    let branch = BranchName::new(query.branch.unwrap_or_else(|| DEFAULT_BRANCH.to_string()));
    let commit = CommitName::new(
        query
            .commit
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
    );

    let data_store = state.data_store();
    data_store.commit(&commit, &branch).await?;

    let manifest_names = data_store
        .glob(&Head::Commit(commit.clone()), &format!("{MANIFEST_DIR}/*"))
        .await
        .unwrap_or_default();

    let runner = std::sync::Arc::new(Runner::new(
        state.volume(),
        MANIFEST_DIR,
        data_store.repo().clone(),
        state.output_prefix(),
        commit.clone(),
        branch.clone(),
        Some(state.shard_spec()),
    ));
    let previous = state.controller().replace(branch.clone(), runner.clone());

    let spawned_state = state.clone();
    let spawned_commit = commit.clone();
    tokio::spawn(async move {
        if let Some(previous) = previous {
            previous.cancel();
        }
        let outcome = runner.run().await;
        if let Err(error) = &outcome {
            tracing::warn!(%error, branch = %runner.branch(), "pipeline run failed");
        }
        let output_prefix = spawned_state.output_prefix();
        for path in manifest_names {
            let Some(name) = path.rsplit('/').next() else {
                continue;
            };
            match &outcome {
                Ok(_) => spawned_state.controller().publish(&output_prefix, name),
                Err(error) => spawned_state.controller().record_failure(
                    &output_prefix,
                    name,
                    &spawned_commit,
                    error.to_string(),
                ),
            }
        }
    });

    peer_sync::spawn_peer_sync(state.clone());

    Ok(commit.to_string().into_response())
}

async fn accept_push(state: AppState, multipart: Multipart) -> Result<Response, HttpError> {
    let parts = multipart::decode(multipart).await?;
    let deltas: Vec<CommitDelta> = parts
        .into_iter()
        .map(|part| CommitDelta {
            commit: CommitName::new(part.name),
            bytes: part.bytes,
        })
        .collect();
    let scratch = BranchName::new("_push");
    let applied = replica::push(&state.data_store(), &scratch, None, &deltas).await?;
    Ok(format!("{} commits applied\n", applied.len()).into_response())
}

#[derive(Debug, Default, Deserialize)]
struct FileQuery {
    branch: Option<String>,
    commit: Option<String>,
    shard: Option<String>,
}

fn resolve_head(branch: Option<&str>, commit: Option<&str>) -> Head {
    match commit {
        Some(commit) => Head::Commit(CommitName::new(commit)),
        None => Head::Branch(BranchName::new(branch.unwrap_or(DEFAULT_BRANCH))),
    }
}

fn parse_shard_query(raw: Option<&str>) -> ShardResult<Option<ShardSpec>> {
    raw.map(|s| s.parse()).transpose()
}

async fn file_io_root(
    state: State<AppState>,
    query: Query<FileQuery>,
    method: Method,
    body: axum::body::Bytes,
) -> Result<Response, HttpError> {
    file_io_core(state, String::new(), query, method, body).await
}

async fn file_io(
    State(state): State<AppState>,
    Path(path): Path<String>,
    query: Query<FileQuery>,
    method: Method,
    body: axum::body::Bytes,
) -> Result<Response, HttpError> {
    file_io_core(State(state), path, query, method, body).await
}

async fn file_io_core(
    State(state): State<AppState>,
    path: String,
    Query(query): Query<FileQuery>,
    method: Method,
    body: axum::body::Bytes,
) -> Result<Response, HttpError> {
    let store = state.data_store();
    match method {
        Method::GET => {
            let head = resolve_head(query.branch.as_deref(), query.commit.as_deref());
            let shard_spec = parse_shard_query(query.shard.as_deref())?;
            serve_matches(&store, &head, &path, shard_spec).await
        }
        Method::POST | Method::PUT => {
            if path.is_empty() {
                return Err(ShardError::NotFound(PathBuf::from("/file/")).into());
            }
            let branch = BranchName::new(query.branch.unwrap_or_else(|| DEFAULT_BRANCH.to_string()));
            let written = if method == Method::PUT {
                store
                    .copy_file(&branch, &path, Box::pin(Cursor::new(body.to_vec())))
                    .await?
            } else {
                store
                    .create_from_reader(&branch, &path, Box::pin(Cursor::new(body.to_vec())))
                    .await?
            };
            let verb = if method == Method::PUT { "Updated" } else { "Created" };
            Ok(format!("{verb} {path}, size: {written}.\n").into_response())
        }
        Method::DELETE => {
            if path.is_empty() {
                return Err(ShardError::NotFound(PathBuf::from("/file/")).into());
            }
            let branch = BranchName::new(query.branch.unwrap_or_else(|| DEFAULT_BRANCH.to_string()));
            store.remove(&branch, &path).await?;
            Ok("Removed\n".into_response())
        }
        _ => Ok(StatusCode::METHOD_NOT_ALLOWED.into_response()),
    }
}

#[derive(Debug, Default, Deserialize)]
struct CommitFileQuery {
    shard: Option<String>,
}

async fn file_io_at_commit(
    State(state): State<AppState>,
    Path((commit, path)): Path<(String, String)>,
    Query(query): Query<CommitFileQuery>,
) -> Result<Response, HttpError> {
    let head = Head::Commit(CommitName::new(commit));
    let shard_spec = parse_shard_query(query.shard.as_deref())?;
    serve_matches(&state.data_store(), &head, &path, shard_spec).await
}

#[derive(Debug, Deserialize)]
struct PipelineFileQuery {
    commit: String,
    shard: Option<String>,
}

async fn pipeline_file(
    State(state): State<AppState>,
    Path((name, path)): Path<(String, String)>,
    Query(query): Query<PipelineFileQuery>,
) -> Result<Response, HttpError> {
    let commit = CommitName::new(query.commit);
    let pipe_store = state.pipe_store(&name);
    pipe_store.ensure().await?;
    state
        .controller()
        .wait_pipeline(&pipe_store, &state.output_prefix(), &name, &commit, PIPELINE_WAIT_BOUND)
        .await?;

    let head = Head::Commit(commit);
    let shard_spec = parse_shard_query(query.shard.as_deref())?;
    serve_matches(&pipe_store, &head, &path, shard_spec).await
}

#[derive(Debug, Default, Deserialize)]
struct UploadManifestQuery {
    branch: Option<String>,
}

async fn upload_manifest(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<UploadManifestQuery>,
    body: axum::body::Bytes,
) -> Result<Response, HttpError> {
    let branch = BranchName::new(query.branch.unwrap_or_else(|| DEFAULT_BRANCH.to_string()));
    let path = format!("{MANIFEST_DIR}/{name}");
    let written = state
        .data_store()
        .copy_file(&branch, &path, Box::pin(Cursor::new(body.to_vec())))
        .await?;
    Ok(format!("Uploaded {name}, size: {written}.\n").into_response())
}

#[derive(Debug, Default, Deserialize)]
struct PullQuery {
    from: Option<String>,
}

async fn pull(
    State(state): State<AppState>,
    Query(query): Query<PullQuery>,
) -> Result<Response, HttpError> {
    let from = query.from.map(CommitName::new);
    let deltas = replica::pull(&state.data_store(), from.as_ref()).await?;
    let boundary = multipart::new_boundary();
    let parts: Vec<multipart::Part> = deltas
        .into_iter()
        .map(|delta| multipart::Part {
            name: delta.commit.to_string(),
            bytes: delta.bytes,
        })
        .collect();
    let body = multipart::encode(&boundary, &parts);
    Ok(Response::builder()
        .header("Boundary", boundary.as_str())
        .header(
            axum::http::header::CONTENT_TYPE,
            format!("multipart/mixed; boundary={boundary}"),
        )
        .body(Body::from(body))
        .expect("static headers are always valid"))
}

/// Shared GET logic for `/file/*path`, `/commit/:commit/file/*path`, and
/// `/pipeline/:name/file/*path`: glob `pattern` within `head`, apply the
/// shard filter, and stream a single match or a multipart body for several.
/// An empty pattern (the bare `/file/` route) means "every file".
async fn serve_matches(
    store: &Store,
    head: &Head,
    pattern: &str,
    shard_spec: Option<ShardSpec>,
) -> Result<Response, HttpError> {
    let pattern = if pattern.is_empty() { "**/*" } else { pattern };
    let matches = store.glob(head, pattern).await?;
    let glob_matched_many = matches.len() > 1;
    let filtered: Vec<String> = matches
        .into_iter()
        .filter(|m| partition::matches(m, shard_spec.as_ref()))
        .collect();

    if filtered.is_empty() {
        return Err(ShardError::NotFound(PathBuf::from(pattern)).into());
    }

    // Whether to stream a single file or a multipart body is decided on the
    // glob result, not the shard-filtered one: a glob of several files that
    // the shard filter narrows to one still returns a one-part multipart
    // body, and only a glob that matched exactly one file to begin with
    // streams a bare body.
    if !glob_matched_many {
        let only = &filtered[0];
        let file = store.open(head, only).await?;
        let stream = ReaderStream::new(file);
        return Ok(Response::builder()
            .header(axum::http::header::CONTENT_TYPE, "application/octet-stream")
            .body(Body::from_stream(stream))
            .expect("static headers are always valid"));
    }

    let mut parts = Vec::with_capacity(filtered.len());
    for path in filtered {
        let mut file = store.open(head, &path).await?;
        let mut bytes = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut file, &mut bytes)
            .await
            .map_err(|e| ShardError::io(&path, e))?;
        parts.push(multipart::Part { name: path, bytes });
    }
    let boundary = multipart::new_boundary();
    let body = multipart::encode(&boundary, &parts);
    Ok(Response::builder()
        .header("Boundary", boundary.as_str())
        .header(
            axum::http::header::CONTENT_TYPE,
            format!("multipart/mixed; boundary={boundary}"),
        )
        .body(Body::from(body))
        .expect("static headers are always valid"))
}
