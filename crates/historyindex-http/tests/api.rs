//! In-process tests for the query API.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use historyindex_core::{
    Block, BlockSource, ChainReader, IndexStore, MemoryChain, StoreError, Transaction, TxOutput,
};
use historyindex_http::{router, AppState};
use historyindex_storage::InMemoryHistoryStore;

// ─── Helpers ──────────────────────────────────────────────────────────────────

struct Fixture {
    app: Router,
    blocks: Vec<Block>,
}

async fn fixture() -> Fixture {
    let coinbase = Transaction::new(vec![], vec![TxOutput::new("alice", 100, 8)]);
    let genesis = Block::genesis(1_700_000_000, vec![coinbase.clone()]);
    let pay = Transaction::new(
        vec![coinbase.outpoint(0)],
        vec![TxOutput::new("bob", 70, 4), TxOutput::new("alice", 30, 4)],
    );
    let b2 = Block::new(&genesis.header, 1_700_000_010, vec![pay]);
    let blocks = vec![genesis, b2];

    let chain = Arc::new(MemoryChain::from_blocks(blocks.clone()).unwrap());
    let history = Arc::new(InMemoryHistoryStore::new());
    for block in &blocks {
        history.apply_block(block).await.unwrap();
        history.set_parsed_height(block.height()).await.unwrap();
    }

    Fixture {
        app: router(AppState::new(chain, history)),
        blocks,
    }
}

async fn call(app: &Router, method: Method, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    call(app, Method::GET, uri).await
}

fn error_of(body: &Value) -> &str {
    body["error"].as_str().unwrap()
}

/// Chain whose reads always fail.
struct BrokenChain;

#[async_trait]
impl BlockSource for BrokenChain {
    async fn head_height(&self) -> Result<u64, StoreError> {
        Err(StoreError::Backend("disk gone".into()))
    }

    async fn block_at_height(&self, _height: u64) -> Result<Option<Block>, StoreError> {
        Err(StoreError::Backend("disk gone".into()))
    }
}

#[async_trait]
impl ChainReader for BrokenChain {
    async fn block_by_hash(&self, _hash: &str) -> Result<Option<Block>, StoreError> {
        Err(StoreError::Backend("disk gone".into()))
    }

    async fn last_blocks(&self, _n: u64) -> Result<Vec<Block>, StoreError> {
        Err(StoreError::Backend("disk gone".into()))
    }
}

fn broken_app() -> Router {
    router(AppState::new(
        Arc::new(BrokenChain),
        Arc::new(InMemoryHistoryStore::new()),
    ))
}

// ─── /block ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn block_by_seq_and_hash() {
    let fx = fixture().await;

    let (status, body) = get(&fx.app, "/block?seq=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["header"]["hash"], fx.blocks[1].hash());

    let uri = format!("/block?hash={}", fx.blocks[0].hash().to_ascii_uppercase());
    let (status, body) = get(&fx.app, &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["header"]["height"], 1);
}

#[tokio::test]
async fn block_filter_errors() {
    let fx = fixture().await;

    let (status, body) = get(&fx.app, "/block").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_of(&body), "should specify one filter, hash or seq");

    let uri = format!("/block?seq=1&hash={}", fx.blocks[0].hash());
    let (status, body) = get(&fx.app, &uri).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_of(&body), "should only specify one filter, hash or seq");

    let (status, _) = get(&fx.app, "/block?hash=xyz").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = get(&fx.app, "/block?seq=seq").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_of(&body).starts_with("invalid seq"));

    let (status, body) = get(&fx.app, "/block?seq=1&seq=2").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_of(&body).contains("duplicate field"));
}

#[tokio::test]
async fn block_not_found() {
    let fx = fixture().await;

    let (status, body) = get(&fx.app, "/block?seq=9").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_of(&body), "Not Found");

    let uri = format!("/block?hash={}", "ab".repeat(32));
    let (status, _) = get(&fx.app, &uri).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn block_backend_error_is_500() {
    let (status, body) = get(&broken_app(), "/block?seq=1").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_of(&body), "backend error: disk gone");
}

#[tokio::test]
async fn post_is_method_not_allowed() {
    let fx = fixture().await;
    let (status, _) = call(&fx.app, Method::POST, "/block?seq=1").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    let (status, _) = call(&fx.app, Method::POST, "/last_blocks?num=1").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

// ─── /last_blocks ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn last_blocks_newest_first() {
    let fx = fixture().await;

    let (status, body) = get(&fx.app, "/last_blocks?num=5").await;
    assert_eq!(status, StatusCode::OK);
    let heights: Vec<u64> = body["blocks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["header"]["height"].as_u64().unwrap())
        .collect();
    assert_eq!(heights, vec![2, 1]);

    let (_, body) = get(&fx.app, "/last_blocks?num=1").await;
    assert_eq!(body["blocks"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn last_blocks_errors() {
    let fx = fixture().await;

    let (status, body) = get(&fx.app, "/last_blocks").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_of(&body), "Param: num is empty");

    let (status, _) = get(&fx.app, "/last_blocks?num=badNumValue").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = get(&broken_app(), "/last_blocks?num=1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_of(&body), "Get last 1 blocks failed: backend error: disk gone");
}

// ─── Index queries ────────────────────────────────────────────────────────────

#[tokio::test]
async fn uxout_lookup() {
    let fx = fixture().await;
    let coinbase = &fx.blocks[0].transactions[0];
    let pay = &fx.blocks[1].transactions[0];

    let (status, body) = get(&fx.app, &format!("/uxout?uxid={}", coinbase.outpoint(0))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["spent_tx"], pay.hash.as_str());
    assert_eq!(body["spent_height"], 2);

    let (status, _) = get(&fx.app, &format!("/uxout?uxid={}", pay.outpoint(7))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get(&fx.app, "/uxout?uxid=nonsense").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn address_queries() {
    let fx = fixture().await;

    let (status, body) = get(&fx.app, "/address_txns?address=alice").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["address"], "alice");
    assert_eq!(body["transactions"].as_array().unwrap().len(), 2);

    let (status, body) = get(&fx.app, "/address_uxouts?address=bob").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["uxouts"][0]["coins"], 70);

    let (status, body) = get(&fx.app, "/address_txns?address=").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_of(&body), "Param: address is empty");

    let (status, body) = get(&fx.app, "/address_uxouts?address=alice&address=bob").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_of(&body).contains("duplicate field"));
}

#[tokio::test]
async fn transaction_lookup() {
    let fx = fixture().await;
    let pay = &fx.blocks[1].transactions[0];

    let (status, body) = get(&fx.app, &format!("/transaction?txid={}", pay.hash)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["height"], 2);
    assert_eq!(body["tx"]["hash"], pay.hash.as_str());

    let (status, _) = get(&fx.app, &format!("/transaction?txid={}", "0".repeat(64))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get(&fx.app, "/transaction?txid=123").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ─── /health ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_without_parser() {
    let fx = fixture().await;
    let (status, body) = get(&fx.app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["head_height"], 2);
    assert!(body["parser_state"].is_null());
}

#[tokio::test]
async fn health_reports_degraded_parser() {
    use historyindex_core::{CancellationToken, FatalPolicy, ParserBuilder};

    let fx = fixture().await;
    let chain = Arc::new(MemoryChain::from_blocks(fx.blocks.clone()).unwrap());
    let history = Arc::new(InMemoryHistoryStore::new());
    // Index claims more blocks than the chain has.
    history.set_parsed_height(5).await.unwrap();

    let (parser, handle) = ParserBuilder::new()
        .on_fatal(FatalPolicy::Degrade)
        .build(chain.clone(), history.clone());
    let shutdown = CancellationToken::new();
    parser.run(shutdown.clone()).await.unwrap_err();
    assert!(!shutdown.is_cancelled());

    let app = router(AppState::new(chain, history).with_parser(handle));
    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["parser_state"], "stopped");
    assert!(body["last_error"].as_str().unwrap().contains("5"));
}
