//! gzvrpc-duplex: persistent JSON-RPC sessions over WebSocket or IPC.
//!
//! # Features
//! - Concurrent calls and batches multiplexed over one connection
//! - Typed subscriptions with bounded per-subscription buffering
//! - Lazy reconnect on the next call after the connection dies
//! - Pluggable [`Connector`] for custom duplex transports

pub mod client;
mod dispatcher;
mod reader;
pub mod subscription;
pub mod transport;

pub use client::DuplexClient;
pub use subscription::{Subscription, SubscriptionState};
#[cfg(unix)]
pub use transport::IpcConnector;
pub use transport::{Connector, DuplexConn, FrameSink, FrameStream, WsConnector};
