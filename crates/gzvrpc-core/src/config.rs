//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables shared by the HTTP and duplex clients.
///
/// Deserializable from JSON with every field optional:
/// ```
/// let cfg: gzvrpc_core::ClientConfig =
///     serde_json::from_str(r#"{ "subscription_buffer": 128 }"#).unwrap();
/// assert_eq!(cfg.namespace.as_deref(), Some("Gzv"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Namespace prepended to bare method names (`nonce` → `Gzv_nonce`).
    #[serde(default = "default_namespace")]
    pub namespace: Option<String>,
    /// Upper bound on establishing (or re-establishing) a duplex connection.
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,
    /// Write timeout used when a call carries no deadline of its own.
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Overall bound on `<ns>_subscribe` and `rpc_modules` calls.
    #[serde(default = "default_subscribe_timeout_ms")]
    pub subscribe_timeout_ms: u64,
    /// Per-request timeout of the HTTP client.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Notifications buffered per subscription before it fails with overflow.
    #[serde(default = "default_subscription_buffer")]
    pub subscription_buffer: usize,
}

fn default_namespace() -> Option<String> { Some("Gzv".into()) }
fn default_dial_timeout_ms() -> u64 { 10_000 }
fn default_write_timeout_ms() -> u64 { 10_000 }
fn default_subscribe_timeout_ms() -> u64 { 5_000 }
fn default_request_timeout_ms() -> u64 { 30_000 }
fn default_subscription_buffer() -> usize { 8_000 }

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            dial_timeout_ms: default_dial_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            subscribe_timeout_ms: default_subscribe_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            subscription_buffer: default_subscription_buffer(),
        }
    }
}

impl ClientConfig {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.subscribe_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_gives_defaults() {
        let cfg: ClientConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.namespace.as_deref(), Some("Gzv"));
        assert_eq!(cfg.subscription_buffer, 8_000);
        assert_eq!(cfg.subscribe_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn namespace_can_be_disabled() {
        let cfg: ClientConfig = serde_json::from_str(r#"{"namespace": null}"#).unwrap();
        assert!(cfg.namespace.is_none());
    }
}
