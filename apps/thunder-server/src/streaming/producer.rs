//! Chunked byte producer
//!
//! Turns a [`StreamRange`] into a lazy stream of byte blocks by issuing
//! sequential chunk reads against a shard session. Reads are never
//! pipelined: chunk `n + 1` is requested only after chunk `n` has been
//! consumed downstream.
//!
//! Flood waits are absorbed by sleeping and re-reading the same chunk. Any
//! other upstream failure, including a read that exceeds the fetch timeout,
//! ends the stream with an error rather than a short body.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, Stream};
use tokio::time::timeout;

use super::pool::WorkloadGuard;
use super::range::StreamRange;
use crate::upstream::{FileLocation, ShardSession, UpstreamError};

/// Boxed stream of byte blocks handed to the HTTP layer
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, UpstreamError>> + Send>>;

struct ChunkReader {
    session: Arc<dyn ShardSession>,
    location: FileLocation,
    range: StreamRange,
    fetch_timeout: Duration,
    offset: u64,
    /// 1-based index of the next chunk
    part: u64,
    workload: WorkloadGuard,
}

impl ChunkReader {
    async fn next_block(mut self) -> Result<Option<(Bytes, Self)>, UpstreamError> {
        if self.part > self.range.part_count {
            return Ok(None);
        }

        let chunk = self.fetch_chunk().await?;
        if chunk.is_empty() {
            tracing::debug!(
                offset = self.offset,
                part = self.part,
                parts = self.range.part_count,
                "Upstream returned an empty chunk, ending stream"
            );
            self.part = self.range.part_count + 1;
            return Ok(None);
        }

        let block = self.trim(chunk);
        self.part += 1;
        self.offset += self.range.chunk_size;
        Ok(Some((block, self)))
    }

    async fn fetch_chunk(&self) -> Result<Bytes, UpstreamError> {
        let limit = u32::try_from(self.range.chunk_size).unwrap_or(u32::MAX);
        loop {
            let fetch = self.session.fetch(&self.location, self.offset, limit);
            match timeout(self.fetch_timeout, fetch).await {
                Ok(Ok(chunk)) => return Ok(chunk),
                Ok(Err(UpstreamError::FloodWait(wait))) => {
                    tracing::warn!(
                        offset = self.offset,
                        wait_secs = wait.as_secs(),
                        "Flood wait during chunk fetch"
                    );
                    tokio::time::sleep(wait).await;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    tracing::debug!(
                        offset = self.offset,
                        timeout_secs = self.fetch_timeout.as_secs(),
                        "Chunk fetch timed out"
                    );
                    return Err(UpstreamError::Timeout);
                }
            }
        }
    }

    /// Drop the bytes outside the requested range
    fn trim(&self, chunk: Bytes) -> Bytes {
        let len = chunk.len();
        let first = (self.range.first_cut as usize).min(len);
        let last = (self.range.last_cut as usize).min(len);

        match (self.part == 1, self.part == self.range.part_count) {
            (true, true) => chunk.slice(first..last.max(first)),
            (true, false) => chunk.slice(first..),
            (false, true) => chunk.slice(..last),
            (false, false) => chunk,
        }
    }
}

impl Drop for ChunkReader {
    fn drop(&mut self) {
        if self.part <= self.range.part_count {
            tracing::debug!(
                connection = self.workload.connection().index(),
                part = self.part,
                parts = self.range.part_count,
                "Chunk stream closed early"
            );
        }
    }
}

/// Stream `range` of the object at `location` through `session`
///
/// `workload` is held for the lifetime of the stream and released when the
/// stream finishes, fails, or is dropped.
pub fn produce(
    session: Arc<dyn ShardSession>,
    location: FileLocation,
    range: StreamRange,
    fetch_timeout: Duration,
    workload: WorkloadGuard,
) -> ByteStream {
    let reader = ChunkReader {
        session,
        location,
        offset: range.offset,
        range,
        fetch_timeout,
        part: 1,
        workload,
    };
    Box::pin(stream::try_unfold(reader, ChunkReader::next_block))
}
