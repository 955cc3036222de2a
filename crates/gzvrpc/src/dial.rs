//! Endpoint dispatch: one [`Client`] type over every supported transport.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use url::Url;

use gzvrpc_core::config::ClientConfig;
use gzvrpc_core::envelope::Envelope;
use gzvrpc_core::error::RpcError;
use gzvrpc_core::transport::{HealthStatus, RpcTransport};
use gzvrpc_duplex::{DuplexClient, Subscription};
use gzvrpc_http::HttpRpcClient;

/// A connected JSON-RPC client.
///
/// Calls, batches and `supported_modules` come from [`RpcTransport`];
/// subscriptions are only available on duplex transports.
pub enum Client {
    Http(HttpRpcClient),
    Duplex(DuplexClient),
}

/// Connect to `endpoint`, picking the transport from its scheme:
///
/// | endpoint               | transport              |
/// |------------------------|------------------------|
/// | `http://`, `https://`  | HTTP                   |
/// | `ws://`, `wss://`      | WebSocket              |
/// | filesystem path        | Unix domain socket     |
///
/// Duplex endpoints are dialled immediately, so an unreachable node fails
/// here rather than on the first call.
pub async fn dial(endpoint: &str, config: ClientConfig) -> Result<Client, RpcError> {
    if endpoint.is_empty() {
        return Err(RpcError::InvalidUrl("empty endpoint".into()));
    }

    tracing::debug!(endpoint, "dialling");
    match Url::parse(endpoint) {
        Ok(url) => match url.scheme() {
            "http" | "https" => Ok(Client::Http(HttpRpcClient::new(endpoint, config)?)),
            "ws" | "wss" => Ok(Client::Duplex(
                DuplexClient::websocket(endpoint, config).await?,
            )),
            other => Err(RpcError::UnsupportedScheme(other.to_string())),
        },
        Err(url::ParseError::RelativeUrlWithoutBase) => dial_ipc(endpoint, config).await,
        Err(e) => Err(RpcError::InvalidUrl(format!("{endpoint}: {e}"))),
    }
}

#[cfg(unix)]
async fn dial_ipc(path: &str, config: ClientConfig) -> Result<Client, RpcError> {
    Ok(Client::Duplex(DuplexClient::ipc(path, config).await?))
}

#[cfg(not(unix))]
async fn dial_ipc(_path: &str, _config: ClientConfig) -> Result<Client, RpcError> {
    Err(RpcError::UnsupportedScheme("ipc".into()))
}

impl Client {
    /// Subscribe to `<namespace>_subscribe`. Fails with
    /// [`RpcError::NotificationsUnsupported`] over HTTP.
    pub async fn subscribe<T>(
        &self,
        namespace: &str,
        sink: mpsc::Sender<T>,
        params: Vec<Value>,
    ) -> Result<Subscription<T>, RpcError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        match self {
            Self::Http(_) => Err(RpcError::NotificationsUnsupported),
            Self::Duplex(client) => client.subscribe(namespace, sink, params).await,
        }
    }

    /// Shut the client down. Outstanding duplex operations resolve with
    /// [`RpcError::ClientClosed`]; a no-op over HTTP.
    pub async fn close(&self) {
        if let Self::Duplex(client) = self {
            client.close().await;
        }
    }

    fn transport(&self) -> &dyn RpcTransport {
        match self {
            Self::Http(client) => client,
            Self::Duplex(client) => client,
        }
    }
}

#[async_trait]
impl RpcTransport for Client {
    async fn send(&self, req: Envelope, deadline: Option<Instant>) -> Result<Envelope, RpcError> {
        self.transport().send(req, deadline).await
    }

    async fn send_batch(
        &self,
        reqs: Vec<Envelope>,
        deadline: Option<Instant>,
    ) -> Result<Vec<Envelope>, RpcError> {
        self.transport().send_batch(reqs, deadline).await
    }

    fn next_id(&self) -> u64 {
        self.transport().next_id()
    }

    fn config(&self) -> &ClientConfig {
        self.transport().config()
    }

    fn health(&self) -> HealthStatus {
        self.transport().health()
    }

    fn url(&self) -> &str {
        self.transport().url()
    }
}
