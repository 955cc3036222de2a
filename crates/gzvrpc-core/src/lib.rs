//! gzvrpc-core: wire types and shared traits for gzvrpc.
//!
//! # Overview
//!
//! - [`Envelope`]: the JSON-RPC 2.0 message shape and its classification
//! - [`codec`]: frame decoding (single / batch) and stream framing
//! - [`RpcError`]: the error taxonomy every client returns
//! - [`ClientConfig`]: timeouts, default namespace, subscription buffer
//! - [`RpcTransport`]: the trait behind `call`, `batch_call` and
//!   `supported_modules`, implemented by the HTTP and duplex clients

pub mod codec;
pub mod config;
pub mod envelope;
pub mod error;
pub mod transport;

pub use codec::{decode_frame, FrameBuffer, Outgoing};
pub use config::ClientConfig;
pub use envelope::{Envelope, EnvelopeKind, JsonRpcError, RpcId, SubscriptionParams};
pub use error::RpcError;
pub use transport::{with_deadline, BatchElem, HealthStatus, RpcTransport};
