//! Duplex JSON-RPC client: calls, batches and subscriptions multiplexed over
//! one persistent connection, with transparent reconnect.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use gzvrpc_core::codec::Outgoing;
use gzvrpc_core::config::ClientConfig;
use gzvrpc_core::envelope::{Envelope, SUBSCRIBE_METHOD_SUFFIX, UNSUBSCRIBE_METHOD_SUFFIX};
use gzvrpc_core::error::RpcError;
use gzvrpc_core::transport::{with_deadline, HealthStatus, RpcTransport};

use crate::dispatcher::{Dispatcher, SendRequest, SubscriptionStart};
use crate::subscription::{Forwarder, Subscription, SubscriptionState};
use crate::transport::{Connector, WsConnector};

/// Cheap handle for submitting calls to the dispatcher. Shared by the client
/// and every subscription forwarder.
#[derive(Clone)]
pub(crate) struct Caller {
    ids: Arc<AtomicU64>,
    requests: mpsc::UnboundedSender<SendRequest>,
    config: Arc<ClientConfig>,
}

impl Caller {
    fn next_id(&self) -> u64 {
        self.ids.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Hand `payload` to the dispatcher and wait for every response.
    pub(crate) async fn request(
        &self,
        payload: Outgoing,
        subscription: Option<SubscriptionStart>,
        deadline: Option<Instant>,
    ) -> Result<Vec<Envelope>, RpcError> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(SendRequest {
                payload,
                reply,
                subscription,
                deadline,
            })
            .map_err(|_| RpcError::ClientClosed)?;

        let outcome = with_deadline(deadline, rx).await?;
        outcome.map_err(|_| RpcError::ClientClosed)?
    }

    pub(crate) async fn unsubscribe(&self, namespace: &str, id: &str) -> Result<(), RpcError> {
        let env = Envelope::request(
            self.next_id(),
            format!("{namespace}{UNSUBSCRIBE_METHOD_SUFFIX}"),
            vec![Value::String(id.to_string())],
        );
        let deadline = Instant::now() + self.config.subscribe_timeout();
        self.request(Outgoing::Single(env), None, Some(deadline))
            .await
            .map(drop)
    }
}

/// JSON-RPC client over a persistent duplex transport.
///
/// Owns a background dispatcher task holding the connection, the
/// correlation table and the subscription registry. When the connection
/// dies, outstanding calls and subscriptions fail with the transport error
/// and the next call reconnects through the [`Connector`]. Calls in flight
/// at the moment of failure are never replayed.
pub struct DuplexClient {
    endpoint: String,
    caller: Caller,
    shutdown: watch::Sender<bool>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    connected: Arc<AtomicBool>,
    registered: Arc<AtomicUsize>,
}

impl DuplexClient {
    /// Dial through `connector` and start the dispatcher.
    pub async fn connect(
        connector: Arc<dyn Connector>,
        config: ClientConfig,
    ) -> Result<Self, RpcError> {
        let endpoint = connector.endpoint().to_string();
        let conn = tokio::time::timeout(config.dial_timeout(), connector.connect())
            .await
            .map_err(|_| RpcError::Timeout {
                ms: config.dial_timeout_ms,
            })??;
        tracing::info!(endpoint = %endpoint, "connected");

        let config = Arc::new(config);
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let connected = Arc::new(AtomicBool::new(true));
        let registered = Arc::new(AtomicUsize::new(0));

        let dispatcher = Dispatcher::new(
            connector,
            config.clone(),
            requests_rx,
            shutdown_rx,
            connected.clone(),
            registered.clone(),
        );
        let handle = tokio::spawn(dispatcher.run(conn));

        Ok(Self {
            endpoint,
            caller: Caller {
                ids: Arc::new(AtomicU64::new(0)),
                requests: requests_tx,
                config,
            },
            shutdown: shutdown_tx,
            dispatcher: Mutex::new(Some(handle)),
            connected,
            registered,
        })
    }

    /// Connect to a `ws://` / `wss://` endpoint.
    pub async fn websocket(url: impl Into<String>, config: ClientConfig) -> Result<Self, RpcError> {
        Self::connect(Arc::new(WsConnector::new(url)), config).await
    }

    /// Connect to a Unix domain socket.
    #[cfg(unix)]
    pub async fn ipc(
        path: impl Into<std::path::PathBuf>,
        config: ClientConfig,
    ) -> Result<Self, RpcError> {
        Self::connect(Arc::new(crate::transport::IpcConnector::new(path)), config).await
    }

    /// Subscribe to `<namespace>_subscribe` with `params`.
    ///
    /// Elements are decoded to `T` and delivered in order on `sink`. If the
    /// consumer falls `subscription_buffer` elements behind, the
    /// subscription fails with [`RpcError::SubscriptionOverflow`].
    pub async fn subscribe<T>(
        &self,
        namespace: &str,
        sink: mpsc::Sender<T>,
        params: Vec<Value>,
    ) -> Result<Subscription<T>, RpcError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let env = Envelope::request(
            self.caller.next_id(),
            format!("{namespace}{SUBSCRIBE_METHOD_SUFFIX}"),
            params,
        );

        let (quit_tx, quit_rx) = oneshot::channel();
        let (state_tx, state_rx) = watch::channel(SubscriptionState::Active);
        let forwarder = Forwarder::new(
            namespace.to_string(),
            sink,
            quit_rx,
            state_tx,
            self.caller.clone(),
            self.caller.config.subscription_buffer,
        );
        let start: SubscriptionStart =
            Box::new(move |id, incoming| forwarder.run(id, incoming).boxed());

        let deadline = Instant::now() + self.caller.config.subscribe_timeout();
        let mut responses = self
            .caller
            .request(Outgoing::Single(env), Some(start), Some(deadline))
            .await?;
        let resp = responses.pop().ok_or(RpcError::NoResult)?;
        let id: String = serde_json::from_value(resp.into_result()?)?;

        Ok(Subscription::new(namespace.to_string(), id, quit_tx, state_rx))
    }

    /// Shut down: every outstanding call and subscription resolves with
    /// [`RpcError::ClientClosed`]. Returns once the dispatcher has exited.
    /// Closing twice is a no-op.
    pub async fn close(&self) {
        self.shutdown.send_replace(true);
        let mut slot = self.dispatcher.lock().await;
        if let Some(handle) = slot.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "dispatcher task failed");
            }
            tracing::info!(endpoint = %self.endpoint, "client closed");
        }
    }

    /// `true` while a connection is live.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Subscriptions the session currently routes notifications to.
    pub fn subscription_count(&self) -> usize {
        self.registered.load(Ordering::Acquire)
    }
}

impl Drop for DuplexClient {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

#[async_trait]
impl RpcTransport for DuplexClient {
    async fn send(
        &self,
        req: Envelope,
        deadline: Option<Instant>,
    ) -> Result<Envelope, RpcError> {
        let mut responses = self
            .caller
            .request(Outgoing::Single(req), None, deadline)
            .await?;
        responses.pop().ok_or(RpcError::NoResult)
    }

    async fn send_batch(
        &self,
        reqs: Vec<Envelope>,
        deadline: Option<Instant>,
    ) -> Result<Vec<Envelope>, RpcError> {
        if reqs.is_empty() {
            return Ok(vec![]);
        }
        self.caller
            .request(Outgoing::Batch(reqs), None, deadline)
            .await
    }

    fn next_id(&self) -> u64 {
        self.caller.next_id()
    }

    fn config(&self) -> &ClientConfig {
        &self.caller.config
    }

    fn health(&self) -> HealthStatus {
        if self.is_connected() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }

    fn url(&self) -> &str {
        &self.endpoint
    }
}
