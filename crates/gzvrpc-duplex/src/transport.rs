//! Duplex transport abstraction and the built-in connectors.
//!
//! A live connection is split into a [`FrameSink`] (owned by the dispatcher,
//! one writer at a time) and a [`FrameStream`] (owned by the reader task).
//! A [`Connector`] produces fresh connections, both for the initial dial and
//! for every reconnect.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use gzvrpc_core::error::RpcError;

/// Write half: accepts one encoded frame per item.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = RpcError> + Send>>;

/// Read half: yields one top-level JSON value per item.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, RpcError>> + Send>>;

/// A freshly established duplex connection.
pub struct DuplexConn {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Establishes duplex connections to one endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<DuplexConn, RpcError>;

    /// Endpoint description used in logs and `url()`.
    fn endpoint(&self) -> &str;
}

/// WebSocket connector (`ws://` / `wss://`).
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<DuplexConn, RpcError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| RpcError::Connection(e.to_string()))?;
        let (sink, stream) = ws_stream.split();

        let sink = sink
            .sink_map_err(|e| RpcError::Connection(e.to_string()))
            .with(|frame: String| future::ready(Ok::<_, RpcError>(Message::Text(frame.into()))));

        let stream = stream.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text.to_string())),
                Ok(Message::Binary(bytes)) => Some(
                    String::from_utf8(bytes.to_vec())
                        .map_err(|e| RpcError::Deserialization(e.to_string())),
                ),
                Ok(Message::Close(_)) => Some(Err(RpcError::Connection(
                    "connection closed by peer".into(),
                ))),
                // ping / pong / raw frames carry no envelopes
                Ok(_) => None,
                Err(e) => Some(Err(RpcError::Connection(e.to_string()))),
            })
        });

        Ok(DuplexConn {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

#[cfg(unix)]
pub use ipc::IpcConnector;

#[cfg(unix)]
mod ipc {
    use std::path::PathBuf;

    use async_trait::async_trait;
    use futures::{sink, stream};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixStream;

    use gzvrpc_core::codec::FrameBuffer;
    use gzvrpc_core::error::RpcError;

    use super::{Connector, DuplexConn};

    const READ_CHUNK: usize = 16 * 1024;

    /// Unix domain socket connector. Frames are newline-separated JSON values
    /// on the way out and arbitrary concatenated JSON on the way in.
    #[derive(Debug, Clone)]
    pub struct IpcConnector {
        path: PathBuf,
        endpoint: String,
    }

    impl IpcConnector {
        pub fn new(path: impl Into<PathBuf>) -> Self {
            let path = path.into();
            let endpoint = path.display().to_string();
            Self { path, endpoint }
        }
    }

    #[async_trait]
    impl Connector for IpcConnector {
        async fn connect(&self) -> Result<DuplexConn, RpcError> {
            let conn = UnixStream::connect(&self.path).await?;
            let (read_half, write_half) = conn.into_split();

            let sink = sink::unfold(write_half, |mut writer, frame: String| async move {
                writer.write_all(frame.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                Ok::<_, RpcError>(writer)
            });

            let stream = stream::unfold(
                Some((read_half, FrameBuffer::new())),
                |state| async move {
                    let (mut reader, mut frames) = state?;
                    let mut chunk = vec![0u8; READ_CHUNK];
                    loop {
                        match frames.next_frame() {
                            Ok(Some(frame)) => return Some((Ok(frame), Some((reader, frames)))),
                            Ok(None) => {}
                            Err(e) => return Some((Err(e), None)),
                        }
                        match reader.read(&mut chunk).await {
                            Ok(0) => return None,
                            Ok(n) => frames.extend(&chunk[..n]),
                            Err(e) => return Some((Err(RpcError::from(e)), None)),
                        }
                    }
                },
            );

            Ok(DuplexConn {
                sink: Box::pin(sink),
                stream: Box::pin(stream),
            })
        }

        fn endpoint(&self) -> &str {
            &self.endpoint
        }
    }
}
