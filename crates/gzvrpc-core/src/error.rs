//! Client-level error types.

use thiserror::Error;

use crate::envelope::JsonRpcError;

/// Errors that can occur while talking to a node.
///
/// The type is `Clone` so a single terminal condition (transport death,
/// client shutdown) can resolve every outstanding waiter with the same error.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// Connection refused/reset, or a read/write on the duplex transport failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// HTTP request failed or returned a non-success status.
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON-RPC error object returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// The response carried neither `result` nor `error`.
    #[error("no result in JSON-RPC response")]
    NoResult,

    /// The client was closed while the operation was outstanding.
    #[error("client is closed")]
    ClientClosed,

    /// A subscription consumer fell too far behind.
    #[error("subscription queue overflow (capacity {capacity})")]
    SubscriptionOverflow { capacity: usize },

    /// The transport cannot carry server-push notifications (HTTP).
    #[error("notifications not supported by this transport")]
    NotificationsUnsupported,

    /// The local wait (deadline, dial or write timeout) elapsed.
    #[error("timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// A frame or result could not be (de)serialized.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// `dial` was given a URL whose scheme has no transport.
    #[error("no known transport for URL scheme {0:?}")]
    UnsupportedScheme(String),

    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(String),

    #[error("{0}")]
    Other(String),
}

impl RpcError {
    /// Returns `true` if the error means the underlying transport is unusable.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Http(_) | Self::Timeout { .. }
        )
    }

    /// Returns `true` if this is a node-side execution error.
    pub fn is_execution_error(&self) -> bool {
        matches!(self, Self::Rpc(_))
    }

    /// The JSON-RPC error code, if the node returned an error object.
    pub fn rpc_code(&self) -> Option<i64> {
        match self {
            Self::Rpc(err) => Some(err.code),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        Self::Deserialization(err.to_string())
    }
}

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        Self::Connection(err.to_string())
    }
}

impl From<JsonRpcError> for RpcError {
    fn from(err: JsonRpcError) -> Self {
        Self::Rpc(err)
    }
}
