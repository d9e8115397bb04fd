//! historyindex-http: read-only HTTP query API.
//!
//! Serves blocks from the canonical chain and transactions, outputs and
//! address history from the derived index. Every route is `GET`; other
//! methods get `405 Method Not Allowed`. Errors are JSON objects of the form
//! `{"error": "<message>"}`.
//!
//! | route | query |
//! |---|---|
//! | `/block` | `hash=H` or `seq=N` |
//! | `/last_blocks` | `num=N` |
//! | `/uxout` | `uxid=<tx_hash>:<index>` |
//! | `/address_txns` | `address=A` |
//! | `/address_uxouts` | `address=A` |
//! | `/transaction` | `txid=H` |
//! | `/health` | |

pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use historyindex_core::{CancellationToken, ChainReader, HistoryReader, ParserHandle};

pub use error::ApiError;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub chain: Arc<dyn ChainReader>,
    pub history: Arc<dyn HistoryReader>,
    /// Present when the API runs next to a live parser.
    pub parser: Option<ParserHandle>,
}

impl AppState {
    pub fn new(chain: Arc<dyn ChainReader>, history: Arc<dyn HistoryReader>) -> Self {
        Self {
            chain,
            history,
            parser: None,
        }
    }

    pub fn with_parser(mut self, parser: ParserHandle) -> Self {
        self.parser = Some(parser);
        self
    }
}

/// Build the query router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/block", get(handlers::block))
        .route("/last_blocks", get(handlers::last_blocks))
        .route("/uxout", get(handlers::uxout))
        .route("/address_txns", get(handlers::address_txns))
        .route("/address_uxouts", get(handlers::address_uxouts))
        .route("/transaction", get(handlers::transaction))
        .route("/health", get(handlers::health))
        .with_state(state)
}

/// Serve `app` on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    info!(addr = ?listener.local_addr().ok(), "http api listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("http api stopped");
    Ok(())
}
