//! Reader task: one per physical connection.

use futures::StreamExt;
use tokio::sync::mpsc;

use gzvrpc_core::codec::decode_frame;
use gzvrpc_core::envelope::Envelope;
use gzvrpc_core::error::RpcError;

use crate::transport::FrameStream;

/// Something the reader of connection `generation` observed.
#[derive(Debug)]
pub(crate) struct ReadEvent {
    pub generation: u64,
    pub kind: ReadKind,
}

#[derive(Debug)]
pub(crate) enum ReadKind {
    Batch(Vec<Envelope>),
    Failed(RpcError),
}

/// Decode frames until the stream fails, then report the failure exactly once.
pub(crate) async fn read_loop(
    generation: u64,
    mut stream: FrameStream,
    events: mpsc::UnboundedSender<ReadEvent>,
) {
    let failure = loop {
        let frame = match stream.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => break e,
            None => break RpcError::Connection("connection closed".into()),
        };
        tracing::trace!(generation, len = frame.len(), "frame received");

        match decode_frame(&frame) {
            Ok(batch) if batch.is_empty() => continue,
            Ok(batch) => {
                let event = ReadEvent {
                    generation,
                    kind: ReadKind::Batch(batch),
                };
                if events.send(event).is_err() {
                    // dispatcher is gone
                    return;
                }
            }
            Err(e) => break e,
        }
    };

    tracing::debug!(generation, error = %failure, "reader stopped");
    let _ = events.send(ReadEvent {
        generation,
        kind: ReadKind::Failed(failure),
    });
}
