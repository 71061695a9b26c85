//! The farmer's HTTP surface: JSON-RPC control channel on `/` and the
//! token-gated binary shard channel on `/shards/{data_hash}`.

use {
    crate::engine::Engine,
    axum::{
        Router,
        body::{Body, Bytes},
        extract::{DefaultBodyLimit, Path as UrlPath, Query, State},
        http::{StatusCode, header},
        response::{IntoResponse, Response},
        routing::get,
    },
    futures::StreamExt,
    serde::Deserialize,
    std::{net::SocketAddr, path::Path},
    tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        sync::oneshot,
    },
};

/// Control messages never legitimately exceed this.
const CONTROL_BODY_LIMIT: usize = 32 * 1024;

const FILE_BUF: usize = 64 * 1024;

pub async fn serve(
    addr: SocketAddr,
    engine: Engine,
    shutdown: oneshot::Receiver<()>,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_on(listener, engine, shutdown).await
}

/// Serves on an already-bound listener; used where the caller needs to know
/// the port before the server runs.
pub async fn serve_on(
    listener: tokio::net::TcpListener,
    engine: Engine,
    shutdown: oneshot::Receiver<()>,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "serving farmer API");
    }
    axum::serve(listener, router(engine))
        .with_graceful_shutdown(async {
            shutdown.await.ok();
        })
        .await
}

pub(crate) fn router(engine: Engine) -> Router {
    let control = Router::new()
        .route("/", get(liveness).post(handle_control))
        .layer(DefaultBodyLimit::max(CONTROL_BODY_LIMIT));
    let shards = Router::new()
        .route(
            "/shards/{data_hash}",
            get(download_shard).post(upload_shard),
        )
        .layer(DefaultBodyLimit::disable());
    control.merge(shards).with_state(engine)
}

async fn liveness() -> &'static str {
    "Hello!"
}

async fn handle_control(State(engine): State<Engine>, body: Bytes) -> impl IntoResponse {
    let response = engine.handle_raw(&body).await;
    ([(header::CONTENT_TYPE, "application/json")], response)
}

#[derive(Debug, Deserialize)]
struct ShardQuery {
    #[serde(default)]
    token: String,
}

/// Shard names are hex digests; anything else could escape the shards
/// directory.
fn valid_hash(data_hash: &str) -> bool {
    !data_hash.is_empty() && data_hash.chars().all(|c| c.is_ascii_alphanumeric())
}

fn authorized(engine: &Engine, token: &str) -> bool {
    !token.is_empty() && engine.store().has_token(token).unwrap_or(false)
}

/// Tokens authorize exactly one transfer; spent on success and on permanent
/// failure, kept on transient errors so the peer can retry.
fn consume(engine: &Engine, token: &str) {
    if let Err(err) = engine.store().remove_token(token) {
        tracing::warn!(?err, "could not consume token");
    }
}

async fn download_shard(
    State(engine): State<Engine>,
    UrlPath(data_hash): UrlPath<String>,
    Query(query): Query<ShardQuery>,
) -> Response {
    // one 400 for every refusal: the channel must not reveal whether the
    // shard exists
    if !valid_hash(&data_hash) || !authorized(&engine, &query.token) {
        return StatusCode::BAD_REQUEST.into_response();
    }
    let file = match tokio::fs::File::open(engine.shard_path(&data_hash)).await {
        Ok(file) => file,
        Err(_) => {
            tracing::debug!(%data_hash, "shard requested but not on disk");
            consume(&engine, &query.token);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };
    consume(&engine, &query.token);
    tracing::info!(%data_hash, "serving shard");

    let stream = async_stream::stream! {
        let mut file = file;
        let mut buf = vec![0u8; FILE_BUF];
        loop {
            match file.read(&mut buf).await {
                Ok(0) => break,
                Ok(read) => yield Ok(Bytes::copy_from_slice(&buf[..read])),
                Err(err) => {
                    yield Err(err);
                    break;
                }
            }
        }
    };
    (
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Body::from_stream(stream),
    )
        .into_response()
}

async fn upload_shard(
    State(engine): State<Engine>,
    UrlPath(data_hash): UrlPath<String>,
    Query(query): Query<ShardQuery>,
    body: Body,
) -> Response {
    if !valid_hash(&data_hash) || !authorized(&engine, &query.token) {
        return StatusCode::BAD_REQUEST.into_response();
    }
    let path = engine.shard_path(&data_hash);
    if tokio::fs::metadata(&path).await.is_ok() {
        tracing::debug!(%data_hash, "upload refused, shard already exists");
        consume(&engine, &query.token);
        return StatusCode::BAD_REQUEST.into_response();
    }

    match save_body(&path, body).await {
        Ok(bytes) => {
            consume(&engine, &query.token);
            engine.report_stored_bytes(bytes);
            tracing::info!(%data_hash, bytes, "stored shard");
            StatusCode::CREATED.into_response()
        }
        Err(err) => {
            tracing::warn!(%data_hash, ?err, "shard upload failed");
            if let Err(err) = tokio::fs::remove_file(&path).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(%data_hash, ?err, "could not remove broken shard file");
                }
            }
            StatusCode::BAD_REQUEST.into_response()
        }
    }
}

async fn save_body(path: &Path, body: Body) -> anyhow::Result<u64> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut stream = body.into_data_stream();
    let mut total = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        total += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(total)
}
