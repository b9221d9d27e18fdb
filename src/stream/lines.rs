// src/stream/lines.rs

//! Line splitting over chunked byte streams.

use std::io;

use futures::stream::StreamExt;

use super::ChunkStream;

/// Buffers partial lines across chunk boundaries.
///
/// Lines are split on `\n`; the separator is not included. Bytes are kept
/// undecoded until a line is complete, so multi-byte UTF-8 characters that
/// straddle two chunks decode correctly.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns every line completed by it.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..line.len() - 1]).into_owned());
        }
        lines
    }

    /// Flush the trailing partial line, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Invoke `on_line` once per completed line, plus once for a trailing partial
/// line when the stream closes.
pub async fn for_each_line<F>(mut stream: ChunkStream, mut on_line: F) -> io::Result<()>
where
    F: FnMut(&str),
{
    let mut splitter = LineSplitter::new();
    while let Some(chunk) = stream.next().await {
        for line in splitter.push(&chunk?) {
            on_line(&line);
        }
    }
    if let Some(rest) = splitter.finish() {
        on_line(&rest);
    }
    Ok(())
}
