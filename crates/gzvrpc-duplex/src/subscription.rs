//! Subscriptions: typed consumer handles and the per-subscription
//! forwarding loop.
//!
//! The dispatcher hands raw notification payloads to a forwarding task over
//! an unbounded channel, so ingestion never blocks the shared read path. The
//! forwarding task decodes each payload, queues it in a bounded `VecDeque`
//! and feeds the consumer's channel as fast as the consumer drains it. A
//! consumer that falls `capacity` elements behind kills the subscription
//! with [`RpcError::SubscriptionOverflow`].

use std::collections::VecDeque;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};

use gzvrpc_core::error::RpcError;

use crate::client::Caller;

/// What the dispatcher pushes to a forwarding task.
#[derive(Debug)]
pub(crate) enum Incoming {
    Notification(Value),
    /// Engine-side termination (transport death, client shutdown).
    Terminate(RpcError),
}

/// Lifecycle of a subscription as observed by its consumer.
#[derive(Debug, Clone)]
pub enum SubscriptionState {
    Active,
    /// Terminated; `Some` when the engine ended it with an error.
    Closed(Option<RpcError>),
}

/// Consumer handle of an established subscription.
///
/// Elements arrive on the `mpsc::Sender<T>` passed to `subscribe`, in the
/// order the node sent them. Dropping the handle unsubscribes.
#[derive(Debug)]
pub struct Subscription<T> {
    namespace: String,
    id: String,
    quit: Option<oneshot::Sender<()>>,
    state: watch::Receiver<SubscriptionState>,
    _element: PhantomData<fn() -> T>,
}

impl<T> Subscription<T> {
    pub(crate) fn new(
        namespace: String,
        id: String,
        quit: oneshot::Sender<()>,
        state: watch::Receiver<SubscriptionState>,
    ) -> Self {
        Self {
            namespace,
            id,
            quit: Some(quit),
            state,
            _element: PhantomData,
        }
    }

    /// Server-assigned subscription id.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Stop delivery and ask the node to drop the subscription.
    ///
    /// No-op if the subscription already terminated.
    pub fn unsubscribe(&mut self) {
        if let Some(quit) = self.quit.take() {
            let _ = quit.send(());
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(*self.state.borrow(), SubscriptionState::Closed(_))
    }

    /// Wait for the subscription to terminate.
    ///
    /// Resolves to the engine error (overflow, transport loss, client
    /// shutdown), or `None` after a graceful unsubscribe. Can be awaited any
    /// number of times.
    pub async fn err(&mut self) -> Option<RpcError> {
        let state = self
            .state
            .wait_for(|s| matches!(s, SubscriptionState::Closed(_)))
            .await
            .ok()?;
        match &*state {
            SubscriptionState::Closed(err) => err.clone(),
            SubscriptionState::Active => None,
        }
    }
}

/// Forwarding loop of one subscription.
pub(crate) struct Forwarder<T> {
    namespace: String,
    sink: mpsc::Sender<T>,
    quit: oneshot::Receiver<()>,
    state: watch::Sender<SubscriptionState>,
    caller: Caller,
    capacity: usize,
}

impl<T> Forwarder<T>
where
    T: DeserializeOwned + Send + 'static,
{
    pub(crate) fn new(
        namespace: String,
        sink: mpsc::Sender<T>,
        quit: oneshot::Receiver<()>,
        state: watch::Sender<SubscriptionState>,
        caller: Caller,
        capacity: usize,
    ) -> Self {
        Self {
            namespace,
            sink,
            quit,
            state,
            caller,
            capacity: capacity.max(1),
        }
    }

    /// Run until terminated, publish the outcome, then unsubscribe server-side
    /// if the termination calls for it. Resolves to the subscription id.
    pub(crate) async fn run(
        mut self,
        id: String,
        mut incoming: mpsc::UnboundedReceiver<Incoming>,
    ) -> String {
        tracing::debug!(subscription = %id, namespace = %self.namespace, "forwarding started");
        let (unsubscribe, err) = self.forward(&mut incoming).await;
        drop(incoming);

        match &err {
            Some(e) => tracing::debug!(subscription = %id, error = %e, "subscription terminated"),
            None => tracing::debug!(subscription = %id, "subscription closed"),
        }
        self.state.send_replace(SubscriptionState::Closed(err));

        if unsubscribe {
            if let Err(e) = self.caller.unsubscribe(&self.namespace, &id).await {
                tracing::debug!(subscription = %id, error = %e, "server-side unsubscribe failed");
            }
        }
        id
    }

    /// Returns whether to unsubscribe server-side, and the terminal error.
    async fn forward(
        &mut self,
        incoming: &mut mpsc::UnboundedReceiver<Incoming>,
    ) -> (bool, Option<RpcError>) {
        let mut buffer: VecDeque<T> = VecDeque::new();
        loop {
            tokio::select! {
                _ = &mut self.quit => return (true, None),

                msg = incoming.recv() => match msg {
                    Some(Incoming::Notification(raw)) => {
                        let element = match serde_json::from_value::<T>(raw) {
                            Ok(element) => element,
                            Err(e) => return (true, Some(e.into())),
                        };
                        if buffer.len() == self.capacity {
                            return (true, Some(RpcError::SubscriptionOverflow { capacity: self.capacity }));
                        }
                        buffer.push_back(element);
                    }
                    Some(Incoming::Terminate(err)) => return (false, Some(err)),
                    None => return (false, Some(RpcError::ClientClosed)),
                },

                permit = self.sink.reserve(), if !buffer.is_empty() => match permit {
                    Ok(permit) => {
                        if let Some(element) = buffer.pop_front() {
                            permit.send(element);
                        }
                    }
                    // consumer dropped its receiver
                    Err(_) => return (true, None),
                },
            }
        }
    }
}
