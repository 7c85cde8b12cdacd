//! HTTP surface of the manager.
//!
//! Admin operations ride on `GET /` with the action in the `X-Action`
//! header and parameters in `X-Options`; the head contract (reserve,
//! commit, discard, map) uses JSON endpoints on the same listener. Errors
//! answer with `{code, message}` bodies where the code identifies the
//! action that failed.

use super::{ClusterManager, MetadataCursor};
use crate::error::{CairnError, Result};
use crate::types::MapType;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

const CODE_SYNC: u32 = 100;
const CODE_CHECK: u32 = 105;
const CODE_CLUSTERS: u32 = 110;
const CODE_FIND: u32 = 120;
const CODE_MOVE: u32 = 130;
const CODE_BALANCE: u32 = 135;
const CODE_UNFREEZE: u32 = 140;
const CODE_REGISTER: u32 = 145;
const CODE_SNAPSHOT: u32 = 150;
const CODE_RESERVE: u32 = 155;

#[derive(Clone)]
pub struct AppState {
    manager: Arc<ClusterManager>,
    cursor: Option<Arc<dyn MetadataCursor>>,
}

/// Build the manager router.
pub fn router(
    manager: Arc<ClusterManager>,
    cursor: Option<Arc<dyn MetadataCursor>>,
) -> Router {
    let state = AppState { manager, cursor };

    Router::new()
        .route(
            "/",
            get(handle_get).post(handle_post).delete(handle_delete),
        )
        .route("/reserve", post(handle_reserve))
        .route("/reserve/:id", axum::routing::delete(handle_discard))
        .route("/commit/:id", post(handle_commit))
        .route("/map", post(handle_map))
        .with_state(state)
}

/// Serve the router until the process stops.
pub async fn run(bind_addr: SocketAddr, router: Router) -> Result<()> {
    info!(%bind_addr, "Manager HTTP surface listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, router)
        .await
        .map_err(|e| CairnError::Internal(format!("manager server: {}", e)))
}

#[derive(Serialize)]
struct ErrorBody {
    code: u32,
    message: String,
}

fn error_response(code: u32, err: &CairnError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(ErrorBody {
            code,
            message: err.to_string(),
        }),
    )
        .into_response()
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

async fn handle_get(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let options = header(&headers, "X-Options").to_string();

    match header(&headers, "X-Action") {
        "sync" => handle_sync(&state, &options).await,
        "check" => handle_check(&state).await,
        "move" => handle_move(&state, &options).await,
        "balance" => handle_balance(&state, &options).await,
        "clusters" => handle_clusters(&state, &options).await,
        "find" => handle_find(&state, &options).await,
        _ => StatusCode::NOT_ACCEPTABLE.into_response(),
    }
}

async fn handle_post(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let options = header(&headers, "X-Options").to_string();

    match header(&headers, "X-Action") {
        "register" => handle_register(&state, &options).await,
        "unfreeze" => handle_unfreeze(&state, &options).await,
        "snapshot" => handle_snapshot(&state, &options).await,
        _ => StatusCode::NOT_ACCEPTABLE.into_response(),
    }
}

async fn handle_delete(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let options = header(&headers, "X-Options").to_string();
    if options.is_empty() {
        return StatusCode::UNPROCESSABLE_ENTITY.into_response();
    }

    let result = match header(&headers, "X-Action") {
        "cluster" => state.manager.unregister_cluster(&options).await,
        "node" => state.manager.unregister_node(&options).await,
        _ => return StatusCode::NOT_ACCEPTABLE.into_response(),
    };

    match result {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(CODE_REGISTER, &e),
    }
}

async fn handle_sync(state: &AppState, options: &str) -> Response {
    let result: Result<()> = if options.is_empty() {
        let failures = state.manager.sync_clusters().await;
        if failures.is_empty() {
            Ok(())
        } else {
            for (cluster_id, err) in &failures {
                error!(cluster_id = %cluster_id, error = %err, "Sync failed");
            }
            Err(CairnError::Sync(format!("{} clusters failed", failures.len())))
        }
    } else {
        state.manager.sync_cluster(options).await
    };

    match result {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(CODE_SYNC, &e),
    }
}

async fn handle_check(state: &AppState) -> Response {
    let cursor = match &state.cursor {
        Some(cursor) => Arc::clone(cursor),
        None => {
            return error_response(
                CODE_CHECK,
                &CairnError::Internal("no metadata cursor configured".into()),
            )
        }
    };

    match state.manager.check_consistency(cursor.as_ref()).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(CODE_CHECK, &e),
    }
}

async fn handle_move(state: &AppState, options: &str) -> Response {
    let (source, target) = match options.split_once(',') {
        Some((s, t)) if !s.is_empty() && !t.is_empty() => (s, t),
        _ => return StatusCode::UNPROCESSABLE_ENTITY.into_response(),
    };

    match state.manager.move_cluster(source, target).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(CODE_MOVE, &e),
    }
}

async fn handle_balance(state: &AppState, options: &str) -> Response {
    let cluster_ids: Vec<String> = options
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect();

    // A single id cannot balance against anything.
    if cluster_ids.len() == 1 {
        return StatusCode::UNPROCESSABLE_ENTITY.into_response();
    }

    match state.manager.balance_clusters(&cluster_ids).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(CODE_BALANCE, &e),
    }
}

async fn handle_clusters(state: &AppState, options: &str) -> Response {
    let result = if options.is_empty() {
        state.manager.get_clusters().await
    } else {
        state.manager.get_cluster(options).await.map(|c| vec![c])
    };

    match result {
        Ok(clusters) => Json(clusters).into_response(),
        Err(e) => error_response(CODE_CLUSTERS, &e),
    }
}

async fn handle_find(state: &AppState, options: &str) -> Response {
    if options.len() != crate::types::HASH_HEX_LEN {
        return StatusCode::UNPROCESSABLE_ENTITY.into_response();
    }

    match state.manager.find(options, MapType::Create).await {
        Ok((cluster_id, address)) => {
            let mut headers = HeaderMap::new();
            if let (Ok(cluster), Ok(addr)) = (cluster_id.parse(), address.parse()) {
                headers.insert("X-Cluster-Id", cluster);
                headers.insert("X-Address", addr);
            }
            (StatusCode::OK, headers).into_response()
        }
        Err(e) => error_response(CODE_FIND, &e),
    }
}

async fn handle_register(state: &AppState, options: &str) -> Response {
    // "addr,addr" registers a cluster; "clusterId=addr,addr" adds nodes.
    let result = match options.split_once('=') {
        Some((cluster_id, addresses)) if !cluster_id.is_empty() => {
            let addresses: Vec<String> =
                addresses.split(',').filter(|s| !s.is_empty()).map(String::from).collect();
            if addresses.is_empty() {
                return StatusCode::UNPROCESSABLE_ENTITY.into_response();
            }
            state
                .manager
                .register_nodes_to(cluster_id, &addresses)
                .await
                .map(|_| None)
        }
        _ => {
            let addresses: Vec<String> =
                options.split(',').filter(|s| !s.is_empty()).map(String::from).collect();
            if addresses.is_empty() {
                return StatusCode::UNPROCESSABLE_ENTITY.into_response();
            }
            state.manager.register(&addresses).await.map(Some)
        }
    };

    match result {
        Ok(Some(cluster)) => Json(cluster).into_response(),
        Ok(None) => StatusCode::OK.into_response(),
        Err(e) => error_response(CODE_REGISTER, &e),
    }
}

async fn handle_unfreeze(state: &AppState, options: &str) -> Response {
    let cluster_ids: Vec<String> = options
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect();

    match state.manager.unfreeze_clusters(&cluster_ids).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(CODE_UNFREEZE, &e),
    }
}

async fn handle_snapshot(state: &AppState, options: &str) -> Response {
    let parts: Vec<&str> = options.split(',').collect();

    let result = match parts.as_slice() {
        ["create", cluster_id] => state.manager.create_snapshot(cluster_id).await,
        ["delete", cluster_id, index] => match index.parse() {
            Ok(index) => state.manager.delete_snapshot(cluster_id, index).await,
            Err(_) => return StatusCode::UNPROCESSABLE_ENTITY.into_response(),
        },
        ["restore", cluster_id, index] => match index.parse() {
            Ok(index) => state.manager.restore_snapshot(cluster_id, index).await,
            Err(_) => return StatusCode::UNPROCESSABLE_ENTITY.into_response(),
        },
        _ => return StatusCode::UNPROCESSABLE_ENTITY.into_response(),
    };

    match result {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(CODE_SNAPSHOT, &e),
    }
}

// ----------------------------------------------------------------------
// Head contract: reserve / commit / discard / map
// ----------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ReserveRequest {
    pub size: u64,
}

async fn handle_reserve(
    State(state): State<AppState>,
    Json(request): Json<ReserveRequest>,
) -> Response {
    match state.manager.reserve(request.size).await {
        Ok(map) => Json(map).into_response(),
        Err(e) => error_response(CODE_RESERVE, &e),
    }
}

async fn handle_commit(
    State(state): State<AppState>,
    Path(reservation_id): Path<String>,
    Json(cluster_usage): Json<HashMap<String, u64>>,
) -> Response {
    match state.manager.commit(&reservation_id, &cluster_usage).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(CODE_RESERVE, &e),
    }
}

async fn handle_discard(
    State(state): State<AppState>,
    Path(reservation_id): Path<String>,
) -> Response {
    match state.manager.discard(&reservation_id).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(CODE_RESERVE, &e),
    }
}

#[derive(Deserialize)]
pub struct MapRequest {
    pub hashes: Vec<String>,
    pub map_type: MapType,
}

async fn handle_map(
    State(state): State<AppState>,
    Json(request): Json<MapRequest>,
) -> Response {
    match state
        .manager
        .map(&request.hashes, request.map_type)
        .await
    {
        Ok(mapping) => Json(mapping).into_response(),
        Err(e) => error_response(CODE_FIND, &e),
    }
}
