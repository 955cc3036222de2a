//! gzvrpc: JSON-RPC client for Gzv nodes.
//!
//! [`dial`] picks HTTP, WebSocket or IPC from the endpoint and returns a
//! [`Client`]. Bare method names are qualified with the configured namespace
//! (`nonce` → `Gzv_nonce`).
//!
//! # Quick start
//! ```rust,no_run
//! use gzvrpc::{dial, ClientConfig, RpcTransport};
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), gzvrpc::RpcError> {
//! let client = dial("ws://127.0.0.1:8102", ClientConfig::default()).await?;
//! let nonce: u64 = client.call("nonce", vec![json!("0xabc")]).await?;
//! client.close().await;
//! # Ok(())
//! # }
//! ```

mod dial;

pub use dial::{dial, Client};

pub use gzvrpc_core::{
    BatchElem, ClientConfig, Envelope, HealthStatus, JsonRpcError, RpcError, RpcId, RpcTransport,
};
pub use gzvrpc_duplex::{Connector, DuplexClient, DuplexConn, Subscription, SubscriptionState};
pub use gzvrpc_http::HttpRpcClient;
