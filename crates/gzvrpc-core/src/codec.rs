//! Frame encoding and decoding.
//!
//! A frame is one top-level JSON value: either a single envelope or a batch
//! (array). Message-oriented transports deliver one frame per message;
//! byte-stream transports use [`FrameBuffer`] to find frame boundaries.

use serde::de::IgnoredAny;
use serde_json::Value;

use crate::envelope::Envelope;
use crate::error::RpcError;

/// Outgoing payload: one request or a wire batch.
#[derive(Debug, Clone)]
pub enum Outgoing {
    Single(Envelope),
    Batch(Vec<Envelope>),
}

impl Outgoing {
    /// Correlation keys of every request in the payload.
    pub fn id_keys(&self) -> Vec<String> {
        match self {
            Self::Single(env) => env.id_key().into_iter().collect(),
            Self::Batch(envs) => envs.iter().filter_map(Envelope::id_key).collect(),
        }
    }

    pub fn encode(&self) -> Result<String, RpcError> {
        let text = match self {
            Self::Single(env) => serde_json::to_string(env)?,
            Self::Batch(envs) => serde_json::to_string(envs)?,
        };
        Ok(text)
    }
}

/// Decode one frame into its envelopes.
///
/// Unparseable JSON is an error (the stream can no longer be trusted).
/// Elements that parse as JSON but are not envelopes are dropped with a
/// warning.
pub fn decode_frame(frame: &str) -> Result<Vec<Envelope>, RpcError> {
    let value: Value = serde_json::from_str(frame)?;
    let elements = match value {
        Value::Array(items) => items,
        single => vec![single],
    };
    let mut envelopes = Vec::with_capacity(elements.len());
    for element in elements {
        match serde_json::from_value::<Envelope>(element) {
            Ok(env) => envelopes.push(env),
            Err(e) => tracing::warn!(error = %e, "dropping malformed JSON-RPC element"),
        }
    }
    Ok(envelopes)
}

/// Accumulates bytes from a stream transport and splits off complete JSON
/// values.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Split off the next complete top-level value, if one is buffered.
    pub fn next_frame(&mut self) -> Result<Option<String>, RpcError> {
        let mut values = serde_json::Deserializer::from_slice(&self.buf).into_iter::<IgnoredAny>();
        match values.next() {
            None => {
                // whitespace only
                self.buf.clear();
                Ok(None)
            }
            Some(Ok(_)) => {
                let end = values.byte_offset();
                let raw: Vec<u8> = self.buf.drain(..end).collect();
                let text = String::from_utf8(raw)
                    .map_err(|e| RpcError::Deserialization(e.to_string()))?;
                Ok(Some(text.trim().to_string()))
            }
            Some(Err(e)) if e.is_eof() => Ok(None),
            Some(Err(e)) => Err(e.into()),
        }
    }
}
