//! Query handlers. All of them are read-only.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use historyindex_core::types::is_valid_hash;
use historyindex_core::{AddressTxn, Block, OutPoint, ParserState, TxRecord, UxOut};

use crate::error::ApiError;
use crate::AppState;

/// Empty query values count as missing.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn require_address(address: Option<String>) -> Result<String, ApiError> {
    non_empty(address).ok_or_else(|| ApiError::bad_request("Param: address is empty"))
}

// ─── /block ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct BlockQuery {
    hash: Option<String>,
    seq: Option<String>,
}

pub async fn block(
    State(state): State<AppState>,
    query: Result<Query<BlockQuery>, QueryRejection>,
) -> Result<Json<Block>, ApiError> {
    let Query(q) = query?;
    let found = match (non_empty(q.hash), non_empty(q.seq)) {
        (None, None) => {
            return Err(ApiError::bad_request(
                "should specify one filter, hash or seq",
            ))
        }
        (Some(_), Some(_)) => {
            return Err(ApiError::bad_request(
                "should only specify one filter, hash or seq",
            ))
        }
        (Some(hash), None) => {
            if !is_valid_hash(&hash) {
                return Err(ApiError::bad_request(format!("invalid block hash: {hash}")));
            }
            state.chain.block_by_hash(&hash.to_ascii_lowercase()).await?
        }
        (None, Some(seq)) => {
            let seq: u64 = seq
                .parse()
                .map_err(|e| ApiError::bad_request(format!("invalid seq {seq:?}: {e}")))?;
            state.chain.block_at_height(seq).await?
        }
    };
    found.map(Json).ok_or(ApiError::NotFound)
}

// ─── /last_blocks ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LastBlocksQuery {
    num: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BlocksResponse {
    pub blocks: Vec<Block>,
}

pub async fn last_blocks(
    State(state): State<AppState>,
    query: Result<Query<LastBlocksQuery>, QueryRejection>,
) -> Result<Json<BlocksResponse>, ApiError> {
    let Query(q) = query?;
    let num = non_empty(q.num).ok_or_else(|| ApiError::bad_request("Param: num is empty"))?;
    let n: u64 = num
        .parse()
        .map_err(|e| ApiError::bad_request(format!("invalid num {num:?}: {e}")))?;

    let blocks = state
        .chain
        .last_blocks(n)
        .await
        .map_err(|e| ApiError::bad_request(format!("Get last {n} blocks failed: {e}")))?;
    Ok(Json(BlocksResponse { blocks }))
}

// ─── /uxout ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct UxOutQuery {
    uxid: Option<String>,
}

pub async fn uxout(
    State(state): State<AppState>,
    query: Result<Query<UxOutQuery>, QueryRejection>,
) -> Result<Json<UxOut>, ApiError> {
    let Query(q) = query?;
    let uxid = non_empty(q.uxid).ok_or_else(|| ApiError::bad_request("Param: uxid is empty"))?;
    let outpoint: OutPoint = uxid
        .parse()
        .map_err(|e| ApiError::bad_request(format!("invalid uxid {uxid:?}: {e}")))?;

    state
        .history
        .uxout(&outpoint)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

// ─── /address_txns, /address_uxouts ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AddressQuery {
    address: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddressTxnsResponse {
    pub address: String,
    pub transactions: Vec<AddressTxn>,
}

pub async fn address_txns(
    State(state): State<AppState>,
    query: Result<Query<AddressQuery>, QueryRejection>,
) -> Result<Json<AddressTxnsResponse>, ApiError> {
    let Query(q) = query?;
    let address = require_address(q.address)?;
    let transactions = state.history.address_transactions(&address).await?;
    Ok(Json(AddressTxnsResponse {
        address,
        transactions,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddressUxOutsResponse {
    pub address: String,
    pub uxouts: Vec<UxOut>,
}

pub async fn address_uxouts(
    State(state): State<AppState>,
    query: Result<Query<AddressQuery>, QueryRejection>,
) -> Result<Json<AddressUxOutsResponse>, ApiError> {
    let Query(q) = query?;
    let address = require_address(q.address)?;
    let uxouts = state.history.address_unspent(&address).await?;
    Ok(Json(AddressUxOutsResponse { address, uxouts }))
}

// ─── /transaction ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct TransactionQuery {
    txid: Option<String>,
}

pub async fn transaction(
    State(state): State<AppState>,
    query: Result<Query<TransactionQuery>, QueryRejection>,
) -> Result<Json<TxRecord>, ApiError> {
    let Query(q) = query?;
    let txid = non_empty(q.txid).ok_or_else(|| ApiError::bad_request("Param: txid is empty"))?;
    if !is_valid_hash(&txid) {
        return Err(ApiError::bad_request(format!("invalid txid: {txid}")));
    }
    state
        .history
        .transaction(&txid.to_ascii_lowercase())
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

// ─── /health ─────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub head_height: u64,
    pub parsed_height: Option<u64>,
    pub parser_state: Option<ParserState>,
    pub last_error: Option<String>,
}

/// 200 while the index is healthy, 503 once the parser stopped on a fatal error.
pub async fn health(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<HealthResponse>), ApiError> {
    let head_height = state.chain.head_height().await?;
    let status = state.parser.as_ref().map(|p| p.status());

    let code = match &status {
        Some(s) if s.is_degraded() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    Ok((
        code,
        Json(HealthResponse {
            head_height,
            parsed_height: status.as_ref().map(|s| s.parsed_height),
            parser_state: status.as_ref().map(|s| s.state),
            last_error: status.and_then(|s| s.last_error),
        }),
    ))
}
