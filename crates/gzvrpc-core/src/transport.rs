//! The `RpcTransport` trait: the seam shared by the HTTP and duplex clients.

use std::collections::HashMap;
use std::future::Future;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;

use crate::config::ClientConfig;
use crate::envelope::{qualify_method, Envelope, MODULES_METHOD};
use crate::error::RpcError;

/// Connection health as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// A duplex connection is live.
    Healthy,
    /// The duplex connection died; the next call will try to reconnect.
    Unhealthy,
    /// Stateless transport (HTTP), nothing to report.
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// One element of a [`RpcTransport::batch_call`].
///
/// `result`/`error` are filled in per element; a batch only fails as a whole
/// for I/O errors.
#[derive(Debug, Clone)]
pub struct BatchElem {
    pub method: String,
    pub params: Vec<Value>,
    pub result: Option<Value>,
    pub error: Option<RpcError>,
}

impl BatchElem {
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            params,
            result: None,
            error: None,
        }
    }

    /// Decode this element's result, or return its error.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, RpcError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        let value = self.result.clone().ok_or(RpcError::NoResult)?;
        Ok(serde_json::from_value(value)?)
    }
}

/// Bound `fut` by an optional deadline. Expiry abandons only the local wait.
pub async fn with_deadline<F: Future>(
    deadline: Option<Instant>,
    fut: F,
) -> Result<F::Output, RpcError> {
    match deadline {
        None => Ok(fut.await),
        Some(at) => {
            let budget = at.saturating_duration_since(Instant::now());
            tokio::time::timeout_at(at, fut)
                .await
                .map_err(|_| RpcError::Timeout {
                    ms: budget.as_millis() as u64,
                })
        }
    }
}

/// The async trait every JSON-RPC client implements.
///
/// Implementors provide the raw envelope exchange and id allocation; the
/// typed `call`/`batch_call`/`supported_modules` operations are shared.
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    /// Send one request and wait for its response.
    async fn send(
        &self,
        req: Envelope,
        deadline: Option<Instant>,
    ) -> Result<Envelope, RpcError>;

    /// Send requests as one wire batch and wait for every response.
    ///
    /// Responses may come back in any order.
    async fn send_batch(
        &self,
        reqs: Vec<Envelope>,
        deadline: Option<Instant>,
    ) -> Result<Vec<Envelope>, RpcError>;

    /// Allocate the next request id. Ids are never reused by one client.
    fn next_id(&self) -> u64;

    fn config(&self) -> &ClientConfig;

    fn health(&self) -> HealthStatus {
        HealthStatus::Unknown
    }

    /// Endpoint this client talks to.
    fn url(&self) -> &str;

    /// Build a request envelope, qualifying bare method names.
    fn envelope(&self, method: &str, params: Vec<Value>) -> Envelope {
        let method = qualify_method(self.config().namespace.as_deref(), method);
        Envelope::request(self.next_id(), method, params)
    }

    /// Call a method and deserialize the result.
    async fn call<T>(&self, method: &str, params: Vec<Value>) -> Result<T, RpcError>
    where
        Self: Sized,
        T: DeserializeOwned + Send,
    {
        self.call_with_deadline(None, method, params).await
    }

    /// Like [`call`](Self::call), abandoning the wait at `deadline`.
    async fn call_with_deadline<T>(
        &self,
        deadline: Option<Instant>,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, RpcError>
    where
        Self: Sized,
        T: DeserializeOwned + Send,
    {
        let req = self.envelope(method, params);
        let resp = self.send(req, deadline).await?;
        let value = resp.into_result()?;
        Ok(serde_json::from_value(value)?)
    }

    /// Send every element as one batch; per-element errors land in the elements.
    async fn batch_call(&self, batch: &mut [BatchElem]) -> Result<(), RpcError>
    where
        Self: Sized,
    {
        self.batch_call_with_deadline(None, batch).await
    }

    async fn batch_call_with_deadline(
        &self,
        deadline: Option<Instant>,
        batch: &mut [BatchElem],
    ) -> Result<(), RpcError>
    where
        Self: Sized,
    {
        if batch.is_empty() {
            return Ok(());
        }
        let reqs: Vec<Envelope> = batch
            .iter()
            .map(|elem| self.envelope(&elem.method, elem.params.clone()))
            .collect();
        let keys: Vec<String> = reqs.iter().filter_map(Envelope::id_key).collect();

        let responses = self.send_batch(reqs, deadline).await?;
        let mut by_key: HashMap<String, Envelope> = responses
            .into_iter()
            .filter_map(|resp| resp.id_key().map(|key| (key, resp)))
            .collect();

        for (elem, key) in batch.iter_mut().zip(keys) {
            match by_key.remove(&key).map(Envelope::into_result) {
                Some(Ok(value)) => {
                    elem.result = Some(value);
                    elem.error = None;
                }
                Some(Err(err)) => elem.error = Some(err),
                None => elem.error = Some(RpcError::NoResult),
            }
        }
        Ok(())
    }

    /// Namespaces served by the node, mapped to their versions (`rpc_modules`).
    async fn supported_modules(&self) -> Result<HashMap<String, String>, RpcError>
    where
        Self: Sized,
    {
        let deadline = Instant::now() + self.config().subscribe_timeout();
        self.call_with_deadline(Some(deadline), MODULES_METHOD, vec![])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    /// Answers from a fixed method → response table, reversing batch order.
    struct Canned {
        ids: AtomicU64,
        config: ClientConfig,
        seen: Mutex<Vec<String>>,
    }

    impl Canned {
        fn new() -> Self {
            Self {
                ids: AtomicU64::new(0),
                config: ClientConfig::default(),
                seen: Mutex::new(vec![]),
            }
        }

        fn answer(&self, req: Envelope) -> Envelope {
            let method = req.method.clone().unwrap_or_default();
            self.seen.lock().unwrap().push(method.clone());
            let mut resp = Envelope {
                version: "2.0".into(),
                id: req.id,
                ..Envelope::default()
            };
            match method.as_str() {
                "Gzv_nonce" => resp.result = Some(json!(42)),
                "Gzv_missing" => {
                    resp.error = Some(crate::envelope::JsonRpcError {
                        code: -32000,
                        message: "not found".into(),
                        data: None,
                    })
                }
                "rpc_modules" => resp.result = Some(json!({"Gzv": "1.0", "rpc": "1.0"})),
                _ => {}
            }
            resp
        }
    }

    #[async_trait]
    impl RpcTransport for Canned {
        async fn send(
            &self,
            req: Envelope,
            _deadline: Option<Instant>,
        ) -> Result<Envelope, RpcError> {
            Ok(self.answer(req))
        }

        async fn send_batch(
            &self,
            reqs: Vec<Envelope>,
            _deadline: Option<Instant>,
        ) -> Result<Vec<Envelope>, RpcError> {
            Ok(reqs.into_iter().rev().map(|r| self.answer(r)).collect())
        }

        fn next_id(&self) -> u64 {
            self.ids.fetch_add(1, Ordering::Relaxed) + 1
        }

        fn config(&self) -> &ClientConfig {
            &self.config
        }

        fn url(&self) -> &str {
            "canned://"
        }
    }

    #[tokio::test]
    async fn call_qualifies_and_decodes() {
        let client = Canned::new();
        let nonce: u64 = client.call("nonce", vec![json!("0xabc")]).await.unwrap();
        assert_eq!(nonce, 42);
        assert_eq!(client.seen.lock().unwrap()[0], "Gzv_nonce");
    }

    #[tokio::test]
    async fn call_surfaces_rpc_error_and_no_result() {
        let client = Canned::new();
        let err = client.call::<u64>("missing", vec![]).await.unwrap_err();
        assert_eq!(err.rpc_code(), Some(-32000));

        let err = client.call::<u64>("empty", vec![]).await.unwrap_err();
        assert!(matches!(err, RpcError::NoResult));
    }

    #[tokio::test]
    async fn batch_results_are_matched_by_id() {
        let client = Canned::new();
        let mut batch = vec![
            BatchElem::new("nonce", vec![]),
            BatchElem::new("missing", vec![]),
            BatchElem::new("nonce", vec![]),
        ];
        client.batch_call(&mut batch).await.unwrap();
        assert_eq!(batch[0].decode::<u64>().unwrap(), 42);
        assert_eq!(batch[1].error.as_ref().and_then(RpcError::rpc_code), Some(-32000));
        assert_eq!(batch[2].decode::<u64>().unwrap(), 42);
    }

    #[tokio::test]
    async fn supported_modules_decodes_map() {
        let client = Canned::new();
        let modules = client.supported_modules().await.unwrap();
        assert_eq!(modules.get("Gzv").map(String::as_str), Some("1.0"));
    }

    #[tokio::test]
    async fn deadline_expiry_is_a_timeout() {
        let at = Instant::now() + std::time::Duration::from_millis(10);
        let res = with_deadline(Some(at), std::future::pending::<()>()).await;
        assert!(matches!(res, Err(RpcError::Timeout { .. })));
    }
}
