//! Splits a source file or byte stream into fixed-size chunks.

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt, stream};
use std::{io, path::Path, pin::Pin};
use tokio::fs::File;
use tokio_util::io::ReaderStream;

/// Partitioning of a file of known size into chunks of `chunk_size` bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkPlan {
    file_size: u64,
    chunk_size: u64,
}

impl ChunkPlan {
    /// Returns `None` when `chunk_size` is zero.
    pub fn new(file_size: u64, chunk_size: u64) -> Option<Self> {
        (chunk_size > 0).then_some(Self {
            file_size,
            chunk_size,
        })
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// `ceil(file_size / chunk_size)`.
    pub fn total_chunks(&self) -> u64 {
        self.file_size.div_ceil(self.chunk_size)
    }

    /// Byte range covered by chunk `index`, or `None` past the end.
    #[cfg(test)]
    pub fn range(&self, index: u64) -> Option<std::ops::Range<u64>> {
        if index >= self.total_chunks() {
            return None;
        }
        let start = index * self.chunk_size;
        let end = (start + self.chunk_size).min(self.file_size);
        Some(start..end)
    }

    #[cfg(test)]
    pub fn ranges(&self) -> impl Iterator<Item = std::ops::Range<u64>> + '_ {
        (0..self.total_chunks()).filter_map(|i| self.range(i))
    }
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

struct SplitState<S> {
    source: Pin<Box<S>>,
    buf: BytesMut,
    chunk_size: usize,
    exhausted: bool,
}

/// Re-slice `source` into chunks of exactly `chunk_size` bytes (the last one
/// may be shorter). Empty input yields no chunks. A read error is yielded
/// once and ends the stream.
pub fn split_into_chunks<S>(source: S, chunk_size: usize) -> ChunkStream
where
    S: Stream<Item = io::Result<Bytes>> + Send + 'static,
{
    assert!(chunk_size > 0, "chunk size must be positive");

    let state = SplitState {
        source: Box::pin(source),
        buf: BytesMut::new(),
        chunk_size,
        exhausted: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        while !state.exhausted && state.buf.len() < state.chunk_size {
            match state.source.next().await {
                Some(Ok(bytes)) => state.buf.extend_from_slice(&bytes),
                Some(Err(err)) => {
                    state.exhausted = true;
                    state.buf.clear();
                    return Some((Err(err), state));
                }
                None => state.exhausted = true,
            }
        }

        if state.buf.is_empty() {
            return None;
        }
        let take = state.buf.len().min(state.chunk_size);
        let chunk = state.buf.split_to(take).freeze();
        Some((Ok(chunk), state))
    }))
}

/// Open a local file and stream it as chunks. Also returns the file size.
pub async fn chunk_file(path: &Path, chunk_size: usize) -> io::Result<(u64, ChunkStream)> {
    let file = File::open(path).await?;
    let size = file.metadata().await?.len();
    Ok((size, split_into_chunks(ReaderStream::new(file), chunk_size)))
}
