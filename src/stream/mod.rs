// src/stream/mod.rs

//! Byte-stream fan-out and fan-in.
//!
//! Every stream in this module is a [`ChunkStream`]: a boxed, `Send` stream of
//! `io::Result<Chunk>`. Subprocess pipes are adapted with [`from_reader`].
//!
//! - [`tee`] splits one stream into independent views (each view has its own
//!   unbounded buffer, so a slow consumer never stalls the others).
//! - [`concat`] drains sources strictly one after another.
//! - [`merge`] interleaves sources in arrival order.
//! - [`lines`] turns a stream into complete text lines.
//!
//! An error from any source is terminal for `concat` and `merge`.

pub mod combine;
pub mod lines;
pub mod tee;

use std::io;
use std::pin::Pin;
use std::sync::Arc;

use futures::stream::{Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt};

pub use combine::{Concat, Merge, concat, merge};
pub use lines::{LineSplitter, for_each_line};
pub use tee::tee;

/// One immutable piece of output, cheap to share between tee branches.
pub type Chunk = Arc<[u8]>;

/// The stream type all multiplexer operations consume and produce.
pub type ChunkStream = Pin<Box<dyn Stream<Item = io::Result<Chunk>> + Send>>;

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Adapt an async reader (e.g. a child's stdout pipe) into a [`ChunkStream`].
///
/// The stream ends at EOF; a read error is yielded once and ends the stream.
pub fn from_reader<R>(reader: R) -> ChunkStream
where
    R: AsyncRead + Send + Unpin + 'static,
{
    futures::stream::unfold(Some(reader), |state| async move {
        let mut reader = state?;
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        match reader.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(Chunk::from(buf)), Some(reader)))
            }
            Err(err) => Some((Err(err), None)),
        }
    })
    .boxed()
}

/// Build a stream from in-memory chunks.
pub fn from_chunks<I, B>(chunks: I) -> ChunkStream
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let items: Vec<io::Result<Chunk>> = chunks
        .into_iter()
        .map(|c| Ok(Chunk::from(c.as_ref())))
        .collect();
    futures::stream::iter(items).boxed()
}

/// Drain a stream into one byte buffer.
pub async fn collect_bytes(mut stream: ChunkStream) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk?);
    }
    Ok(out)
}

/// Drain a stream into a string, replacing invalid UTF-8 sequences.
///
/// Decoding happens once at the end so multi-byte characters split across
/// chunks survive intact.
pub async fn collect_text(stream: ChunkStream) -> io::Result<String> {
    let bytes = collect_bytes(stream).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
