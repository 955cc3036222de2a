//! JSON-RPC 2.0 envelope: the one wire shape shared by requests, responses
//! and notifications.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::RpcError;

/// Protocol version written on every outgoing envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Method suffix used to establish a subscription (`<ns>_subscribe`).
pub const SUBSCRIBE_METHOD_SUFFIX: &str = "_subscribe";
/// Method suffix used to cancel a subscription (`<ns>_unsubscribe`).
pub const UNSUBSCRIBE_METHOD_SUFFIX: &str = "_unsubscribe";
/// Method suffix carried by server-push notifications (`<ns>_subscription`).
pub const NOTIFICATION_METHOD_SUFFIX: &str = "_subscription";
/// Lists the API namespaces the node serves.
pub const MODULES_METHOD: &str = "rpc_modules";

/// JSON-RPC request ID: string or number. A `null` id is treated as absent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(u64),
    String(String),
}

impl RpcId {
    /// Ids are allocated as counters but always sent as decimal strings.
    pub fn from_counter(n: u64) -> Self {
        Self::String(n.to_string())
    }

    /// Correlation key: `"7"` and `7` name the same request.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for RpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// What an envelope is, judged by which fields it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    Request,
    Response,
    Notification,
    Invalid,
}

/// One JSON-RPC message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "jsonrpc", default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RpcId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// `Some(Value::Null)` when the node sent `"result": null`.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// `params` of a `<ns>_subscription` notification.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionParams {
    pub subscription: String,
    #[serde(default)]
    pub result: Value,
}

impl Envelope {
    /// Build a request envelope with a counter-allocated id.
    pub fn request(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            version: JSONRPC_VERSION.into(),
            id: Some(RpcId::from_counter(id)),
            method: Some(method.into()),
            params: Some(Value::Array(params)),
            ..Self::default()
        }
    }

    pub fn kind(&self) -> EnvelopeKind {
        match (&self.id, &self.method) {
            (Some(_), Some(_)) => EnvelopeKind::Request,
            (None, Some(_)) => EnvelopeKind::Notification,
            (Some(_), None) if self.params.is_none() => EnvelopeKind::Response,
            _ => EnvelopeKind::Invalid,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.kind() == EnvelopeKind::Notification
    }

    pub fn is_response(&self) -> bool {
        self.kind() == EnvelopeKind::Response
    }

    /// Correlation key of this envelope, if it carries an id.
    pub fn id_key(&self) -> Option<String> {
        self.id.as_ref().map(RpcId::key)
    }

    /// Decode the payload of a subscription notification.
    ///
    /// Returns `None` for anything that is not a `<ns>_subscription` push.
    pub fn subscription_params(&self) -> Option<Result<SubscriptionParams, RpcError>> {
        let method = self.method.as_deref()?;
        if self.id.is_some() || !method.ends_with(NOTIFICATION_METHOD_SUFFIX) {
            return None;
        }
        let params = self.params.clone().unwrap_or(Value::Null);
        Some(serde_json::from_value(params).map_err(RpcError::from))
    }

    /// Unwrap the result value, surfacing the node's error object.
    pub fn into_result(self) -> Result<Value, RpcError> {
        if let Some(err) = self.error {
            return Err(RpcError::Rpc(err));
        }
        self.result.ok_or(RpcError::NoResult)
    }
}

/// Qualify a bare method name with the default namespace.
///
/// `nonce` becomes `Gzv_nonce`; names that already carry a namespace
/// (`rpc_modules`) pass through untouched.
pub fn qualify_method(namespace: Option<&str>, method: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() && !method.contains('_') => format!("{ns}_{method}"),
        _ => method.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_wire_shape() {
        let req = Envelope::request(1, "Gzv_nonce", vec![json!("0xabc")]);
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(
            json,
            r#"{"jsonrpc":"2.0","id":"1","method":"Gzv_nonce","params":["0xabc"]}"#
        );
        assert_eq!(req.kind(), EnvelopeKind::Request);
    }

    #[test]
    fn classify_response_and_notification() {
        let resp: Envelope =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":"1","result":42}"#).unwrap();
        assert!(resp.is_response());
        assert_eq!(resp.id_key().as_deref(), Some("1"));

        let note: Envelope = serde_json::from_str(
            r#"{"jsonrpc":"2.0","method":"Gzv_subscription","params":{"subscription":"0x9","result":{"n":1}}}"#,
        )
        .unwrap();
        assert!(note.is_notification());
        let params = note.subscription_params().unwrap().unwrap();
        assert_eq!(params.subscription, "0x9");
        assert_eq!(params.result["n"], 1);
    }

    #[test]
    fn numeric_and_string_ids_share_a_key() {
        let a: Envelope = serde_json::from_str(r#"{"id":7,"result":1}"#).unwrap();
        let b: Envelope = serde_json::from_str(r#"{"id":"7","result":1}"#).unwrap();
        assert_eq!(a.id_key(), b.id_key());
    }

    #[test]
    fn null_id_is_not_a_response() {
        let env: Envelope =
            serde_json::from_str(r#"{"id":null,"error":{"code":-32700,"message":"parse"}}"#)
                .unwrap();
        assert_eq!(env.kind(), EnvelopeKind::Invalid);
    }

    #[test]
    fn into_result_variants() {
        let ok: Envelope = serde_json::from_str(r#"{"id":"1","result":null}"#).unwrap();
        assert_eq!(ok.into_result().unwrap(), Value::Null);

        let empty: Envelope = serde_json::from_str(r#"{"id":"1"}"#).unwrap();
        assert!(matches!(empty.into_result(), Err(RpcError::NoResult)));

        let failed: Envelope = serde_json::from_str(
            r#"{"id":"1","error":{"code":-32000,"message":"not found"}}"#,
        )
        .unwrap();
        assert_eq!(failed.into_result().unwrap_err().rpc_code(), Some(-32000));
    }

    #[test]
    fn non_subscription_notification_is_ignored() {
        let env: Envelope =
            serde_json::from_str(r#"{"method":"Gzv_event","params":[]}"#).unwrap();
        assert!(env.subscription_params().is_none());
    }

    #[test]
    fn method_qualification() {
        assert_eq!(qualify_method(Some("Gzv"), "nonce"), "Gzv_nonce");
        assert_eq!(qualify_method(Some("Gzv"), "rpc_modules"), "rpc_modules");
        assert_eq!(qualify_method(None, "nonce"), "nonce");
    }
}
