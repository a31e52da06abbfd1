//! Axum read API over the cache services.
//!
//! Routes (all under `/api/v1`):
//!   GET /health                  → service status
//!   GET /wallet/{address}        → WalletData
//!   GET /wallet/{address}/stats  → WalletStats
//!   GET /wallets/top?limit=      → top wallets (default 10, clamped to 1..=100)
//!   GET /deals?wallet=&status=&work_status=&token=&limit=
//!   GET /deals/{address}         → Deal
//!   GET /arbiters?active=true    → arbiters
//!   GET /arbiters/{address}      → Arbiter
//!   GET /ws                      → WebSocket, kept open until the client closes
//!
//! Every body is the `{success, data?, error?}` envelope. Malformed addresses
//! are rejected with 400 before any lookup; everything else that fails is 500.

use crate::cache::CacheError;
use crate::models::{Arbiter, Deal, WalletData, WalletStats};
use crate::services::{require_address, ArbiterService, EscrowService, WalletService};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

const DEFAULT_TOP_LIMIT: usize = 10;
const MAX_TOP_LIMIT: usize = 100;

/// Shared state for the API routes.
#[derive(Clone)]
pub struct AppState {
    pub wallets: Arc<WalletService>,
    pub escrow: Arc<EscrowService>,
    pub arbiters: Arc<ArbiterService>,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    /// Map a service error, prefixing the message with what was being done.
    fn from_cache(context: &str, err: CacheError) -> Self {
        let status = if err.is_invalid_input() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            message: format!("{context}: {err}"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(status = %self.status, error = %self.message, "request failed");
        }
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(self.message),
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// Build the Axum router.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/wallet/{address}", get(wallet_data))
        .route("/wallet/{address}/stats", get(wallet_stats))
        .route("/wallets/top", get(top_wallets))
        .route("/deals", get(deals))
        .route("/deals/{address}", get(deal))
        .route("/arbiters", get(arbiters))
        .route("/arbiters/{address}", get(arbiter))
        .route("/ws", get(ws_upgrade));

    Router::new()
        .nest("/api/v1", api)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Serve until `shutdown` is cancelled, then stop accepting and let
/// in-flight requests finish.
pub async fn serve(
    state: AppState,
    bind: SocketAddr,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %bind, "API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("API server stopped");
    Ok(())
}

// --- Handlers ---

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    timestamp: String,
}

async fn health() -> Json<ApiResponse<Health>> {
    ApiResponse::ok(Health {
        status: "healthy",
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now().to_rfc3339(),
    })
}

async fn wallet_data(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> ApiResult<WalletData> {
    require_address(&address).map_err(|_| ApiError::bad_request("invalid wallet address"))?;
    let data = state
        .wallets
        .get_wallet_data(&address)
        .await
        .map_err(|e| ApiError::from_cache("failed to fetch wallet data", e))?;
    Ok(ApiResponse::ok(data))
}

async fn wallet_stats(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> ApiResult<WalletStats> {
    require_address(&address).map_err(|_| ApiError::bad_request("invalid wallet address"))?;
    let stats = state
        .wallets
        .get_wallet_stats(&address)
        .await
        .map_err(|e| ApiError::from_cache("failed to fetch wallet stats", e))?;
    Ok(ApiResponse::ok(stats))
}

async fn top_wallets(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Vec<WalletData>> {
    let limit = clamp_top_limit(params.get("limit").map(String::as_str));
    let wallets = state
        .wallets
        .get_top_wallets(limit)
        .await
        .map_err(|e| ApiError::from_cache("failed to fetch top wallets", e))?;
    Ok(ApiResponse::ok(wallets))
}

async fn deals(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Vec<Deal>> {
    let result = match params.get("wallet").filter(|w| !w.is_empty()) {
        Some(wallet) => {
            let wallet = require_address(wallet)
                .map_err(|_| ApiError::bad_request("invalid wallet address"))?;
            state.escrow.get_deals_by_wallet(&wallet).await
        }
        None => state.escrow.get_all_deals().await.map(|outcome| outcome.items),
    };
    let deals = result.map_err(|e| ApiError::from_cache("failed to fetch deals", e))?;

    let filter = DealFilter::from_query(&params);
    debug!(filter = ?filter, total = deals.len(), "filtering deals");
    Ok(ApiResponse::ok(filter.apply(deals)))
}

async fn deal(State(state): State<AppState>, Path(address): Path<String>) -> ApiResult<Deal> {
    let contract =
        require_address(&address).map_err(|_| ApiError::bad_request("invalid contract address"))?;
    let deal = state
        .escrow
        .get_deal_by_address(&contract)
        .await
        .map_err(|e| ApiError::from_cache("failed to fetch deal", e))?;
    Ok(ApiResponse::ok(deal))
}

async fn arbiters(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Vec<Arbiter>> {
    let active_only = params.get("active").map(String::as_str) == Some("true");
    let result = if active_only {
        state.arbiters.get_active_arbiters().await
    } else {
        state.arbiters.get_all_arbiters().await.map(|outcome| outcome.items)
    };
    let arbiters = result.map_err(|e| ApiError::from_cache("failed to fetch arbiters", e))?;
    Ok(ApiResponse::ok(arbiters))
}

async fn arbiter(State(state): State<AppState>, Path(address): Path<String>) -> ApiResult<Arbiter> {
    let address =
        require_address(&address).map_err(|_| ApiError::bad_request("invalid arbiter address"))?;
    let arbiter = state
        .arbiters
        .get_arbiter_by_address(&address)
        .await
        .map_err(|e| ApiError::from_cache("failed to fetch arbiter", e))?;
    Ok(ApiResponse::ok(arbiter))
}

/// Accepts the upgrade and reads until the client goes away. Nothing is
/// pushed on this socket.
async fn ws_upgrade(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(hold_socket)
}

async fn hold_socket(mut socket: WebSocket) {
    debug!("websocket client connected");
    while let Some(Ok(msg)) = socket.recv().await {
        if let Message::Close(_) = msg {
            break;
        }
    }
    debug!("websocket client disconnected");
}

// --- Query handling ---

/// `limit` for the top-wallets route: default 10, anything unparseable falls
/// back to the default, parsed values are clamped to 1..=100.
pub fn clamp_top_limit(raw: Option<&str>) -> usize {
    match raw.map(|s| s.trim().parse::<i64>()) {
        Some(Ok(n)) => n.clamp(1, MAX_TOP_LIMIT as i64) as usize,
        _ => DEFAULT_TOP_LIMIT,
    }
}

/// In-memory filters applied to a deal list, in this order: status,
/// work status, token, limit. Numeric values that fail to parse are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DealFilter {
    pub status: Option<i32>,
    pub work_status: Option<i32>,
    pub token: Option<String>,
    pub limit: Option<i64>,
}

impl DealFilter {
    pub fn from_query(params: &HashMap<String, String>) -> Self {
        Self {
            status: params.get("status").and_then(|s| s.parse().ok()),
            work_status: params.get("work_status").and_then(|s| s.parse().ok()),
            token: params.get("token").cloned(),
            limit: params.get("limit").and_then(|s| s.parse().ok()),
        }
    }

    /// Order of `deals` is preserved. `limit` only truncates when it is
    /// positive and smaller than what is left.
    pub fn apply(&self, deals: Vec<Deal>) -> Vec<Deal> {
        let mut filtered: Vec<Deal> = deals
            .into_iter()
            .filter(|d| self.status.map_or(true, |s| d.status == s))
            .filter(|d| self.work_status.map_or(true, |w| d.work_status == w))
            .filter(|d| {
                self.token
                    .as_deref()
                    .map_or(true, |t| d.token_address.eq_ignore_ascii_case(t))
            })
            .collect();

        if let Some(limit) = self.limit {
            if limit > 0 && (limit as usize) < filtered.len() {
                filtered.truncate(limit as usize);
            }
        }
        filtered
    }
}
