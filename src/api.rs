//! Read-only HTTP query API over a `VaultLedger`

use crate::error::LedgerError;
use crate::types::{
    BalanceResponse, ErrorResponse, HealthResponse, ListVaultsQuery, VaultListResponse,
};
use crate::vault::{AssetType, VaultId, VaultLedger, VaultSnapshot};
use axum::{
    extract::{Path, Query, State},
    http::{header, Method, StatusCode},
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Create the router with all query endpoints
pub fn create_router(ledger: Arc<VaultLedger>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .route("/vaults", get(list_vaults_handler))
        .route("/vaults/{id}", get(get_vault_handler))
        .route("/vaults/{id}/balance", get(get_balance_handler))
        .with_state(ledger)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Serve the query API on `listener` until the process stops
pub async fn serve(listener: TcpListener, ledger: Arc<VaultLedger>) -> std::io::Result<()> {
    tracing::info!(address = %listener.local_addr()?, "Serving vault queries");
    axum::serve(listener, create_router(ledger)).await
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn list_vaults_handler(
    State(ledger): State<Arc<VaultLedger>>,
    Query(query): Query<ListVaultsQuery>,
) -> Result<Json<VaultListResponse>, ApiError> {
    let filter = query
        .asset_type
        .as_deref()
        .map(AssetType::parse)
        .transpose()
        .map_err(ledger_error)?;

    let vaults = ledger
        .list_vaults(filter.as_ref())
        .await
        .map_err(ledger_error)?;
    Ok(Json(VaultListResponse { vaults }))
}

async fn get_vault_handler(
    State(ledger): State<Arc<VaultLedger>>,
    Path(id): Path<String>,
) -> Result<Json<VaultSnapshot>, ApiError> {
    let vault_id = parse_vault_id(&id)?;
    ledger.get_vault(&vault_id).await.map(Json).map_err(ledger_error)
}

async fn get_balance_handler(
    State(ledger): State<Arc<VaultLedger>>,
    Path(id): Path<String>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let vault_id = parse_vault_id(&id)?;
    let balance = ledger.get_balance(&vault_id).await.map_err(ledger_error)?;
    Ok(Json(BalanceResponse { vault_id, balance }))
}

fn parse_vault_id(id: &str) -> Result<VaultId, ApiError> {
    id.parse::<VaultId>().map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(
                ErrorResponse::new("INVALID_VAULT_ID", "vault id must be a UUID")
                    .with_details(e.to_string()),
            ),
        )
    })
}

/// Convert ledger error to HTTP response
fn ledger_error(err: LedgerError) -> ApiError {
    let status = match &err {
        LedgerError::VaultNotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::InvalidAssetType(_) | LedgerError::ZeroAmount => StatusCode::BAD_REQUEST,
        LedgerError::AssetTypeMismatch { .. }
        | LedgerError::InsufficientBalance { .. }
        | LedgerError::StaleSequence { .. }
        | LedgerError::DuplicateVault => StatusCode::CONFLICT,
        LedgerError::Unauthorized | LedgerError::Verification(_) => StatusCode::FORBIDDEN,
        LedgerError::Overflow | LedgerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorResponse::new(err.error_code(), err.to_string())))
}
