//! Byte-stream ergonomics over message frames.
//!
//! Outbound, each chunk produced by a byte source becomes one binary frame.
//! Concurrent stream sends hold a write lock for their whole duration, so
//! their frames never interleave. Inbound, the broker's taps expose message
//! payloads as a [`ByteStream`] that can be piped into any `AsyncWrite`.

use std::fmt::Display;
use std::io;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use horizon_relay_core::logging::targets;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::backpressure::BackpressureGate;
use crate::broker::ByteStream;
use crate::config::SendOptions;
use crate::error::{NetworkError, Result};
use crate::manager::ClientShared;
use crate::transport::Frame;

const SEND_STREAM: &str = "send a stream";

#[derive(Debug, Default)]
pub(crate) struct StreamAdapter {
    gate: BackpressureGate,
    write_lock: tokio::sync::Mutex<()>,
}

impl StreamAdapter {
    /// Send every chunk of `source` as a binary frame. Returns the total
    /// number of bytes sent.
    pub async fn send_stream<S, B, E>(
        &self,
        shared: &ClientShared,
        source: S,
        options: SendOptions,
    ) -> Result<u64>
    where
        S: Stream<Item = std::result::Result<B, E>>,
        B: Into<Bytes>,
        E: Display,
    {
        options.validate()?;
        let _guard = self.write_lock.lock().await;
        shared.open_handle(SEND_STREAM)?;

        let mut source = std::pin::pin!(source);
        let mut total = 0u64;
        while let Some(chunk) = source.next().await {
            let chunk: Bytes = chunk
                .map_err(|e| NetworkError::Stream(format!("byte source failed: {e}")))?
                .into();
            total += self.send_chunk(shared, chunk, &options).await?;
        }
        tracing::trace!(target: targets::OUTBOUND, total, "stream sent");
        Ok(total)
    }

    /// Read `reader` to its end in `options.chunk_size` pieces, sending each
    /// as a binary frame.
    pub async fn send_reader<R>(
        &self,
        shared: &ClientShared,
        mut reader: R,
        options: SendOptions,
    ) -> Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        options.validate()?;
        let _guard = self.write_lock.lock().await;
        shared.open_handle(SEND_STREAM)?;

        let mut buf = vec![0u8; options.chunk_size];
        let mut total = 0u64;
        loop {
            let n = reader
                .read(&mut buf)
                .await
                .map_err(|e| NetworkError::Stream(format!("byte source failed: {e}")))?;
            if n == 0 {
                break;
            }
            let chunk = Bytes::copy_from_slice(&buf[..n]);
            total += self.send_chunk(shared, chunk, &options).await?;
        }
        tracing::trace!(target: targets::OUTBOUND, total, "reader sent");
        Ok(total)
    }

    async fn send_chunk(
        &self,
        shared: &ClientShared,
        chunk: Bytes,
        options: &SendOptions,
    ) -> Result<u64> {
        if chunk.is_empty() {
            return Ok(0);
        }
        let handle = shared.open_handle(SEND_STREAM)?;
        let len = chunk.len() as u64;
        self.gate
            .send(shared, &handle, Frame::Binary(chunk), options)
            .await?;
        Ok(len)
    }
}

/// Copy `bytes` into `destination` until the connection closes.
///
/// A destination that stops accepting data ends the copy with
/// [`NetworkError::Cancelled`].
pub(crate) async fn pipe_to<W>(mut bytes: ByteStream, mut destination: W) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut total = 0u64;
    while let Some(chunk) = bytes.next().await {
        destination.write_all(&chunk).await.map_err(write_error)?;
        total += chunk.len() as u64;
    }
    destination.flush().await.map_err(write_error)?;
    Ok(total)
}

fn write_error(err: io::Error) -> NetworkError {
    match err.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted => NetworkError::Cancelled,
        _ => NetworkError::Io(err.to_string()),
    }
}
