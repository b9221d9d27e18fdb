// src/stream/tee.rs

//! Split one [`ChunkStream`] into independent views.

use std::io;

use futures::stream::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::trace;

use super::{Chunk, ChunkStream};

type Branch = mpsc::UnboundedSender<io::Result<Chunk>>;

/// Fork `source` into `branches` views with tee semantics.
///
/// A background pump task reads the source as fast as it produces data and
/// hands every chunk to each view's own unbounded queue. Consumers therefore
/// proceed at their own pace: nothing is dropped, and a slow or idle view only
/// costs memory, never progress for its siblings. Dropping a view simply
/// detaches it; the pump stops once every view is gone.
///
/// A source error is delivered to every live view, after which all views end.
///
/// Must be called from within a Tokio runtime.
pub fn tee(source: ChunkStream, branches: usize) -> Vec<ChunkStream> {
    let (senders, receivers): (Vec<Branch>, Vec<_>) =
        (0..branches).map(|_| mpsc::unbounded_channel()).unzip();

    if branches > 0 {
        tokio::spawn(pump(source, senders));
    }

    receivers
        .into_iter()
        .map(|rx| UnboundedReceiverStream::new(rx).boxed())
        .collect()
}

async fn pump(mut source: ChunkStream, mut senders: Vec<Branch>) {
    while let Some(item) = source.next().await {
        match item {
            Ok(chunk) => {
                senders.retain(|tx| tx.send(Ok(Chunk::clone(&chunk))).is_ok());
                if senders.is_empty() {
                    trace!("all tee branches dropped; stopping pump");
                    return;
                }
            }
            Err(err) => {
                for tx in &senders {
                    let _ = tx.send(Err(io::Error::new(err.kind(), err.to_string())));
                }
                return;
            }
        }
    }
}
