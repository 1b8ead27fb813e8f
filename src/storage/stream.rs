//! Fixed-size re-chunking of byte streams.
//!
//! Request bodies and downloads arrive in whatever chunk sizes the
//! transport produces.  Block uploads want uniform blocks, so [`rechunk`]
//! buffers the input and yields chunks of exactly `chunk_size` bytes, with
//! a shorter final chunk holding the remainder.

use bytes::{Bytes, BytesMut};
use futures::stream::{self, StreamExt};

use super::backend::ByteStream;

struct Rechunker {
    inner: ByteStream,
    buffer: BytesMut,
    chunk_size: usize,
    finished: bool,
}

async fn next_chunk(mut state: Rechunker) -> anyhow::Result<Option<(Bytes, Rechunker)>> {
    if state.finished {
        return Ok(None);
    }
    while state.buffer.len() < state.chunk_size {
        match state.inner.next().await {
            Some(chunk) => state.buffer.extend_from_slice(&chunk?),
            None => {
                state.finished = true;
                if state.buffer.is_empty() {
                    return Ok(None);
                }
                let last = state.buffer.split().freeze();
                return Ok(Some((last, state)));
            }
        }
    }
    let chunk = state.buffer.split_to(state.chunk_size).freeze();
    Ok(Some((chunk, state)))
}

/// Re-chunk `inner` into blocks of `chunk_size` bytes (minimum 1).
pub fn rechunk(inner: ByteStream, chunk_size: usize) -> ByteStream {
    let chunk_size = chunk_size.max(1);
    let state = Rechunker {
        inner,
        buffer: BytesMut::with_capacity(chunk_size),
        chunk_size,
        finished: false,
    };
    stream::try_unfold(state, next_chunk).boxed()
}

/// Wrap in-memory bytes as a single-chunk stream.
pub fn once(data: Bytes) -> ByteStream {
    stream::once(async move { Ok(data) }).boxed()
}
