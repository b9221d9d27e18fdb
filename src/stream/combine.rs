// src/stream/combine.rs

//! Fan-in: sequential concatenation and arrival-order merging.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{SelectAll, Stream, StreamExt};

use super::{Chunk, ChunkStream};

/// Concatenate `sources` strictly in order.
///
/// Source `i` is fully drained before a single chunk of source `i + 1` is
/// read, even if later sources are ready sooner.
pub fn concat(sources: Vec<ChunkStream>) -> ChunkStream {
    Box::pin(Concat::new(sources))
}

/// Interleave `sources` in the order their chunks become available.
pub fn merge(sources: Vec<ChunkStream>) -> ChunkStream {
    Box::pin(Merge::new(sources))
}

/// Sequential concatenation of chunk streams. See [`concat`].
pub struct Concat {
    sources: VecDeque<ChunkStream>,
    failed: bool,
}

impl Concat {
    pub fn new(sources: Vec<ChunkStream>) -> Self {
        Self {
            sources: sources.into(),
            failed: false,
        }
    }
}

impl Stream for Concat {
    type Item = io::Result<Chunk>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.failed {
            return Poll::Ready(None);
        }

        while let Some(current) = this.sources.front_mut() {
            match current.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => return Poll::Ready(Some(Ok(chunk))),
                Poll::Ready(Some(Err(err))) => {
                    // Terminal: never skip ahead to the next source.
                    this.failed = true;
                    this.sources.clear();
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(None) => {
                    this.sources.pop_front();
                }
                Poll::Pending => return Poll::Pending,
            }
        }

        Poll::Ready(None)
    }
}

/// Arrival-order merge of chunk streams. See [`merge`].
pub struct Merge {
    inner: SelectAll<ChunkStream>,
    failed: bool,
}

impl Merge {
    pub fn new(sources: Vec<ChunkStream>) -> Self {
        Self {
            inner: futures::stream::select_all(sources),
            failed: false,
        }
    }
}

impl Stream for Merge {
    type Item = io::Result<Chunk>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.failed {
            return Poll::Ready(None);
        }

        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Err(err))) => {
                this.failed = true;
                this.inner = SelectAll::new();
                Poll::Ready(Some(Err(err)))
            }
            other => other,
        }
    }
}
