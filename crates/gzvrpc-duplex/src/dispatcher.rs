//! The dispatcher: the single task that owns all mutable session state.
//!
//! Only this task touches the correlation table (`waiting` / `calls`), the
//! subscription registry (`subs`) and the current transport (`sink`,
//! `reader`). Everything else talks to it over channels, so none of these
//! tables sit behind a lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::{FutureExt, SinkExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

use gzvrpc_core::codec::Outgoing;
use gzvrpc_core::config::ClientConfig;
use gzvrpc_core::envelope::{Envelope, EnvelopeKind};
use gzvrpc_core::error::RpcError;

use crate::reader::{read_loop, ReadEvent, ReadKind};
use crate::subscription::Incoming;
use crate::transport::{Connector, DuplexConn, FrameSink, FrameStream};

/// Starts the forwarding task of a subscription once the node has assigned
/// its id. Type-erases the element type so the dispatcher stays untyped.
/// The task resolves to the subscription id when it exits.
pub(crate) type SubscriptionStart = Box<
    dyn FnOnce(String, mpsc::UnboundedReceiver<Incoming>) -> BoxFuture<'static, String> + Send,
>;

/// Reply slot of a pending call: every response, or one terminal error.
pub(crate) type Reply = oneshot::Sender<Result<Vec<Envelope>, RpcError>>;

/// A call handed to the dispatcher for registration and sending.
pub(crate) struct SendRequest {
    pub payload: Outgoing,
    pub reply: Reply,
    /// Set when this call establishes a subscription.
    pub subscription: Option<SubscriptionStart>,
    pub deadline: Option<Instant>,
}

/// A registered call waiting for `remaining` more responses.
struct PendingCall {
    keys: Vec<String>,
    remaining: usize,
    responses: Vec<Envelope>,
    reply: Reply,
    subscription: Option<SubscriptionStart>,
}

/// Result of a delegated write; `fresh` is set when the write reconnected.
struct WriteOutcome {
    sink: Option<FrameSink>,
    fresh: Option<FrameStream>,
    result: Result<(), RpcError>,
}

impl WriteOutcome {
    fn failed(err: RpcError) -> Self {
        Self {
            sink: None,
            fresh: None,
            result: Err(err),
        }
    }
}

/// The write currently in flight. While set, no new calls are accepted.
struct InFlight {
    call: u64,
    /// Generation of the connection the write started on, `None` if it had
    /// to reconnect first.
    started_on: Option<u64>,
    task: BoxFuture<'static, WriteOutcome>,
}

pub(crate) struct Dispatcher {
    connector: Arc<dyn Connector>,
    config: Arc<ClientConfig>,
    requests: mpsc::UnboundedReceiver<SendRequest>,
    shutdown: watch::Receiver<bool>,
    reads_tx: mpsc::UnboundedSender<ReadEvent>,
    reads: mpsc::UnboundedReceiver<ReadEvent>,
    connected: Arc<AtomicBool>,
    /// Size of `subs`, published for the client.
    registered: Arc<AtomicUsize>,

    sink: Option<FrameSink>,
    reader: Option<JoinHandle<()>>,
    generation: u64,
    /// Generation of the live connection; `None` while disconnected.
    live: Option<u64>,
    writing: Option<InFlight>,

    waiting: HashMap<String, u64>,
    calls: HashMap<u64, PendingCall>,
    next_call: u64,
    subs: HashMap<String, mpsc::UnboundedSender<Incoming>>,
    forwarders: JoinSet<String>,
}

impl Dispatcher {
    pub(crate) fn new(
        connector: Arc<dyn Connector>,
        config: Arc<ClientConfig>,
        requests: mpsc::UnboundedReceiver<SendRequest>,
        shutdown: watch::Receiver<bool>,
        connected: Arc<AtomicBool>,
        registered: Arc<AtomicUsize>,
    ) -> Self {
        let (reads_tx, reads) = mpsc::unbounded_channel();
        Self {
            connector,
            config,
            requests,
            shutdown,
            reads_tx,
            reads,
            connected,
            registered,
            sink: None,
            reader: None,
            generation: 0,
            live: None,
            writing: None,
            waiting: HashMap::new(),
            calls: HashMap::new(),
            next_call: 0,
            subs: HashMap::new(),
            forwarders: JoinSet::new(),
        }
    }

    pub(crate) async fn run(mut self, conn: DuplexConn) {
        self.sink = Some(conn.sink);
        self.adopt(conn.stream).await;

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.changed() => break,

                outcome = next_write(&mut self.writing) => self.finish_write(outcome).await,

                Some(event) = self.reads.recv() => self.handle_read(event).await,

                Some(req) = self.requests.recv(), if self.writing.is_none() => self.start_write(req),

                Some(joined) = self.forwarders.join_next(), if !self.forwarders.is_empty() => {
                    match joined {
                        Ok(id) => self.forget_subscription(&id),
                        Err(e) => tracing::warn!(error = %e, "subscription forwarder failed"),
                    }
                }
            }
        }

        self.drain_and_exit().await;
    }

    // ---- send path ----

    fn start_write(&mut self, req: SendRequest) {
        let SendRequest {
            payload,
            reply,
            subscription,
            deadline,
        } = req;

        let keys = payload.id_keys();
        if keys.is_empty() {
            let _ = reply.send(Err(RpcError::Other("request carries no id".into())));
            return;
        }
        let frame = match payload.encode() {
            Ok(frame) => frame,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        let call = self.next_call;
        self.next_call += 1;
        for key in &keys {
            self.waiting.insert(key.clone(), call);
        }
        self.calls.insert(
            call,
            PendingCall {
                remaining: keys.len(),
                keys,
                responses: Vec::new(),
                reply,
                subscription,
            },
        );

        let write_timeout = deadline
            .map(|at| at.saturating_duration_since(Instant::now()))
            .unwrap_or_else(|| self.config.write_timeout());
        let task = write_frame(
            self.connector.clone(),
            self.sink.take(),
            frame,
            self.config.dial_timeout(),
            write_timeout,
        )
        .boxed();

        self.writing = Some(InFlight {
            call,
            started_on: self.live,
            task,
        });
    }

    async fn finish_write(&mut self, outcome: WriteOutcome) {
        let Some(write) = self.writing.take() else {
            return;
        };
        let WriteOutcome {
            sink,
            fresh,
            result,
        } = outcome;

        let on_live = match fresh {
            Some(stream) => {
                tracing::info!(endpoint = self.connector.endpoint(), "reconnected");
                self.sink = sink;
                self.adopt(stream).await;
                true
            }
            None if write.started_on.is_some() && write.started_on == self.live => {
                self.sink = sink;
                true
            }
            // connection dropped while writing, or the reconnect failed
            None => false,
        };

        let Err(err) = result else {
            return;
        };
        self.fail_call(write.call, err.clone());
        if on_live {
            tracing::warn!(error = %err, "write failed, dropping connection");
            self.drop_connection(err).await;
        } else if write.started_on.is_none() {
            tracing::error!(
                endpoint = self.connector.endpoint(),
                error = %err,
                "reconnect failed"
            );
        }
    }

    fn fail_call(&mut self, call: u64, err: RpcError) {
        if let Some(pending) = self.calls.remove(&call) {
            for key in &pending.keys {
                self.waiting.remove(key);
            }
            let _ = pending.reply.send(Err(err));
        }
    }

    // ---- read path ----

    async fn handle_read(&mut self, event: ReadEvent) {
        if Some(event.generation) != self.live {
            tracing::debug!(generation = event.generation, "dropping event from stale reader");
            return;
        }
        match event.kind {
            ReadKind::Batch(batch) => {
                for env in batch {
                    match env.kind() {
                        EnvelopeKind::Response => self.handle_response(env),
                        EnvelopeKind::Notification => self.handle_notification(env),
                        kind => tracing::debug!(?kind, "dropping unexpected envelope"),
                    }
                }
            }
            ReadKind::Failed(err) => {
                tracing::warn!(
                    endpoint = self.connector.endpoint(),
                    error = %err,
                    "read failed, dropping connection"
                );
                self.drop_connection(err).await;
            }
        }
    }

    fn handle_response(&mut self, env: Envelope) {
        let Some(key) = env.id_key() else {
            return;
        };
        let Some(call) = self.waiting.remove(&key) else {
            tracing::warn!(id = %key, "dropping unsolicited response");
            return;
        };

        let start = self
            .calls
            .get_mut(&call)
            .and_then(|pending| pending.subscription.take());
        if let Some(start) = start {
            // Register before the subscriber sees the id, so no notification
            // sent right after the response can be missed.
            if env.error.is_none() {
                match subscription_id(&env) {
                    Ok(id) => self.register_subscription(id, start),
                    Err(e) => {
                        self.fail_call(call, e);
                        return;
                    }
                }
            }
        }

        let done = match self.calls.get_mut(&call) {
            Some(pending) => {
                pending.responses.push(env);
                pending.remaining -= 1;
                pending.remaining == 0
            }
            None => false,
        };
        if done {
            if let Some(pending) = self.calls.remove(&call) {
                let _ = pending.reply.send(Ok(pending.responses));
            }
        }
    }

    fn register_subscription(&mut self, id: String, start: SubscriptionStart) {
        let (tx, rx) = mpsc::unbounded_channel();
        tracing::debug!(subscription = %id, "subscription established");
        self.subs.insert(id.clone(), tx);
        self.publish_registered();
        self.forwarders.spawn(start(id, rx));
    }

    /// Drop the registry entry of an exited forwarder. An entry whose
    /// receiver is still open belongs to a newer subscription with the same id.
    fn forget_subscription(&mut self, id: &str) {
        if self.subs.get(id).is_some_and(|tx| tx.is_closed()) {
            tracing::debug!(subscription = %id, "subscription forgotten");
            self.subs.remove(id);
            self.publish_registered();
        }
    }

    fn publish_registered(&self) {
        self.registered.store(self.subs.len(), Ordering::Release);
    }

    fn handle_notification(&mut self, env: Envelope) {
        let params = match env.subscription_params() {
            Some(Ok(params)) => params,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "dropping invalid subscription message");
                return;
            }
            None => {
                tracing::debug!(method = ?env.method, "dropping non-subscription message");
                return;
            }
        };

        let Some(tx) = self.subs.get(&params.subscription) else {
            tracing::debug!(subscription = %params.subscription, "notification for unknown subscription");
            return;
        };
        if tx.send(Incoming::Notification(params.result)).is_err() {
            tracing::debug!(subscription = %params.subscription, "subscription gone, forgetting it");
            self.subs.remove(&params.subscription);
            self.publish_registered();
        }
    }

    // ---- connection lifecycle ----

    /// Make `stream` the current connection's read side. Any previous reader
    /// is stopped and awaited first, so two readers never run at once.
    async fn adopt(&mut self, stream: FrameStream) {
        self.stop_reader().await;
        self.generation += 1;
        self.live = Some(self.generation);
        self.connected.store(true, Ordering::Release);
        self.reader = Some(tokio::spawn(read_loop(
            self.generation,
            stream,
            self.reads_tx.clone(),
        )));
    }

    async fn stop_reader(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
            let _ = reader.await;
        }
    }

    /// Abandon the current connection and fail everything that depended on it.
    /// The next write reconnects.
    async fn drop_connection(&mut self, err: RpcError) {
        self.sink = None;
        self.live = None;
        self.connected.store(false, Ordering::Release);
        self.stop_reader().await;
        self.close_request_ops(err);
    }

    fn close_request_ops(&mut self, err: RpcError) {
        self.waiting.clear();
        for (_, pending) in self.calls.drain() {
            let _ = pending.reply.send(Err(err.clone()));
        }
        for (_, sub) in self.subs.drain() {
            let _ = sub.send(Incoming::Terminate(err.clone()));
        }
        self.publish_registered();
    }

    async fn drain_and_exit(mut self) {
        tracing::debug!(
            calls = self.calls.len(),
            subscriptions = self.subs.len(),
            "dispatcher shutting down"
        );
        // an unfinished write is abandoned along with its connection
        self.writing = None;
        self.requests.close();
        while let Ok(req) = self.requests.try_recv() {
            let _ = req.reply.send(Err(RpcError::ClientClosed));
        }
        self.close_request_ops(RpcError::ClientClosed);

        self.sink = None;
        self.live = None;
        self.connected.store(false, Ordering::Release);
        self.stop_reader().await;

        while let Some(joined) = self.forwarders.join_next().await {
            if let Err(e) = joined {
                tracing::warn!(error = %e, "subscription forwarder failed");
            }
        }
        tracing::debug!("dispatcher stopped");
    }
}

async fn next_write(writing: &mut Option<InFlight>) -> WriteOutcome {
    match writing {
        Some(write) => (&mut write.task).await,
        None => std::future::pending().await,
    }
}

/// Write one frame, reconnecting first if the connection is gone.
async fn write_frame(
    connector: Arc<dyn Connector>,
    sink: Option<FrameSink>,
    frame: String,
    dial_timeout: Duration,
    write_timeout: Duration,
) -> WriteOutcome {
    let (mut sink, fresh) = match sink {
        Some(sink) => (sink, None),
        None => match tokio::time::timeout(dial_timeout, connector.connect()).await {
            Ok(Ok(conn)) => (conn.sink, Some(conn.stream)),
            Ok(Err(e)) => return WriteOutcome::failed(e),
            Err(_) => {
                return WriteOutcome::failed(RpcError::Timeout {
                    ms: dial_timeout.as_millis() as u64,
                })
            }
        },
    };

    let result = match tokio::time::timeout(write_timeout, sink.send(frame)).await {
        Ok(result) => result,
        Err(_) => Err(RpcError::Timeout {
            ms: write_timeout.as_millis() as u64,
        }),
    };
    WriteOutcome {
        sink: Some(sink),
        fresh,
        result,
    }
}

fn subscription_id(env: &Envelope) -> Result<String, RpcError> {
    let value = env.result.clone().ok_or(RpcError::NoResult)?;
    Ok(serde_json::from_value(value)?)
}
