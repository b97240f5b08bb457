//! Socket source: line-delimited envelopes over a TCP stream.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time::timeout;
use tracing::info;

use crate::error::{Result, SyncError};
use crate::source::Source;

/// Live producer connection over TCP.
///
/// Reads are bounded by `read_timeout` so a dead connection is noticed
/// within one interval and the read loop keeps control. Lines are bounded
/// by `max_line_len`: an over-limit line is discarded up to its terminator
/// and surfaced as a non-fatal decode error, so one runaway message never
/// grows memory without bound. Reconnection policy is the caller's
/// concern; the source reports and stops.
pub struct SocketSource {
    reader: BufReader<ReadHalf<TcpStream>>,
    writer: WriteHalf<TcpStream>,
    read_timeout: Duration,
    max_line_len: usize,
    peer: String,
    buf: Vec<u8>,
}

impl SocketSource {
    /// Connect to a telemetry producer.
    pub async fn connect<A: ToSocketAddrs + std::fmt::Display>(
        addr: A,
        read_timeout: Duration,
        max_line_len: usize,
    ) -> Result<Self> {
        let peer = addr.to_string();
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        info!(peer = %peer, "Connected to telemetry producer");
        Ok(Self::from_stream_with_peer(stream, read_timeout, max_line_len, peer))
    }

    /// Wrap an already-established stream (tests, in-process producers).
    pub fn from_stream(stream: TcpStream, read_timeout: Duration, max_line_len: usize) -> Self {
        let peer =
            stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "unknown".to_string());
        Self::from_stream_with_peer(stream, read_timeout, max_line_len, peer)
    }

    fn from_stream_with_peer(
        stream: TcpStream,
        read_timeout: Duration,
        max_line_len: usize,
        peer: String,
    ) -> Self {
        let (read_half, writer) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer,
            read_timeout,
            max_line_len,
            peer,
            buf: Vec::new(),
        }
    }

    /// Accumulate one newline-terminated line, honoring `max_line_len`.
    ///
    /// Once the accumulated line exceeds the cap, the rest of it is
    /// consumed (so the stream resyncs at the next terminator) and the
    /// line is reported as a decode error instead of a message.
    async fn fill_line(&mut self) -> Result<Option<String>> {
        let mut over_limit = false;
        loop {
            let Self { reader, buf, max_line_len, .. } = self;
            let chunk = reader.fill_buf().await?;

            if chunk.is_empty() {
                // Peer closed. A partial unterminated line is dropped; it
                // can never decode as a complete envelope anyway.
                if over_limit || buf.is_empty() {
                    buf.clear();
                    return Ok(None);
                }
                return Self::take_line(buf);
            }

            match chunk.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    if !over_limit && buf.len() + pos <= *max_line_len {
                        buf.extend_from_slice(&chunk[..pos]);
                        reader.consume(pos + 1);
                        return Self::take_line(buf);
                    }
                    let limit = *max_line_len;
                    buf.clear();
                    reader.consume(pos + 1);
                    return Err(SyncError::decode(format!("line exceeds {limit} bytes")));
                }
                None => {
                    let len = chunk.len();
                    if !over_limit {
                        buf.extend_from_slice(chunk);
                    }
                    reader.consume(len);
                    if buf.len() > *max_line_len {
                        over_limit = true;
                        buf.clear();
                    }
                }
            }
        }
    }

    fn take_line(buf: &mut Vec<u8>) -> Result<Option<String>> {
        let mut line = String::from_utf8(std::mem::take(buf))
            .map_err(|e| SyncError::decode(format!("invalid utf-8: {e}")))?;
        if line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }
}

#[async_trait::async_trait]
impl Source for SocketSource {
    async fn next_line(&mut self) -> Result<Option<String>> {
        self.buf.clear();
        timeout(self.read_timeout, self.fill_line())
            .await
            .map_err(|_| SyncError::Timeout { duration: self.read_timeout })?
    }

    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    fn description(&self) -> String {
        format!("tcp://{}", self.peer)
    }
}
