//! HTTP JSON-RPC client backed by `reqwest`.
//!
//! Every call is one POST; a batch is one POST of a JSON array. The
//! transport is stateless: no subscriptions, no reconnection, no retries.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::time::Instant;

use gzvrpc_core::codec::{decode_frame, Outgoing};
use gzvrpc_core::config::ClientConfig;
use gzvrpc_core::envelope::Envelope;
use gzvrpc_core::error::RpcError;
use gzvrpc_core::transport::{with_deadline, RpcTransport};

/// HTTP JSON-RPC client.
pub struct HttpRpcClient {
    url: String,
    http: reqwest::Client,
    config: ClientConfig,
    ids: AtomicU64,
}

impl HttpRpcClient {
    /// Create a new client for the given JSON-RPC endpoint URL.
    pub fn new(url: impl Into<String>, config: ClientConfig) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| RpcError::Http(e.to_string()))?;

        Ok(Self {
            url: url.into(),
            http,
            config,
            ids: AtomicU64::new(0),
        })
    }

    /// Create with default configuration.
    pub fn default_for(url: impl Into<String>) -> Result<Self, RpcError> {
        Self::new(url, ClientConfig::default())
    }

    async fn post(&self, payload: &Outgoing) -> Result<Vec<Envelope>, RpcError> {
        let body = payload.encode()?;
        let resp = self
            .http
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| self.map_reqwest(e))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(url = %self.url, status, "HTTP request rejected");
            return Err(RpcError::Http(format!("HTTP {status}: {body}")));
        }

        let text = resp.text().await.map_err(|e| self.map_reqwest(e))?;
        decode_frame(&text)
    }

    fn map_reqwest(&self, err: reqwest::Error) -> RpcError {
        if err.is_timeout() {
            RpcError::Timeout {
                ms: self.config.request_timeout_ms,
            }
        } else {
            RpcError::Http(err.to_string())
        }
    }
}

#[async_trait]
impl RpcTransport for HttpRpcClient {
    async fn send(&self, req: Envelope, deadline: Option<Instant>) -> Result<Envelope, RpcError> {
        let key = req.id_key();
        let payload = Outgoing::Single(req);
        let responses = with_deadline(deadline, self.post(&payload)).await??;
        responses
            .into_iter()
            .find(|resp| resp.id_key() == key)
            .ok_or(RpcError::NoResult)
    }

    async fn send_batch(
        &self,
        reqs: Vec<Envelope>,
        deadline: Option<Instant>,
    ) -> Result<Vec<Envelope>, RpcError> {
        if reqs.is_empty() {
            return Ok(vec![]);
        }
        let payload = Outgoing::Batch(reqs);
        with_deadline(deadline, self.post(&payload)).await?
    }

    fn next_id(&self) -> u64 {
        self.ids.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn url(&self) -> &str {
        &self.url
    }
}
