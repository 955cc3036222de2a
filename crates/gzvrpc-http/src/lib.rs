//! gzvrpc-http: one-shot HTTP JSON-RPC transport.

pub mod client;

pub use client::HttpRpcClient;
