//! Newline-delimited JSON over any async byte stream.
//!
//! Each frame is one compact JSON document followed by `\n`. Blank lines are
//! skipped and `\r\n` endings are tolerated, so netcat-style tools can talk to
//! the server directly.

use std::io;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
    sync::Mutex,
};

use crate::connection::{Connection, MessageSink, MessageSource};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 {
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(LINE_ENDINGS);
        if trimmed.is_empty() {
            continue;
        }

        return Ok(Some(trimmed.as_bytes().to_vec()));
    }
}

pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(payload).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Reads one frame and deserializes it. Handy for clients that speak the typed protocol.
pub async fn read_message<R, T>(reader: &mut R) -> io::Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    match read_frame(reader).await? {
        Some(frame) => serde_json::from_slice(&frame).map(Some).map_err(to_io_error),
        None => Ok(None),
    }
}

fn to_io_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

pub struct LineSource<R> {
    reader: R,
}

impl<R> LineSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl<R> MessageSource for LineSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn recv(&mut self) -> io::Result<Option<Vec<u8>>> {
        read_frame(&mut self.reader).await
    }
}

/// Write half behind a mutex so a reply and a broadcast never interleave bytes.
///
/// A write that fails or is cancelled partway leaves a torn frame on the
/// stream. Every later `send` then fails instead of appending to it.
pub struct LineSink<W> {
    state: Mutex<SinkState<W>>,
}

struct SinkState<W> {
    writer: W,
    torn: bool,
}

impl<W> LineSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            state: Mutex::new(SinkState {
                writer,
                torn: false,
            }),
        }
    }
}

#[async_trait]
impl<W> MessageSink for LineSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&self, payload: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock().await;
        if state.torn {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "stream holds a partially written frame",
            ));
        }

        // Cleared only once the whole frame is flushed.
        state.torn = true;
        write_frame(&mut state.writer, payload).await?;
        state.torn = false;
        Ok(())
    }

    async fn close(&self) -> io::Result<()> {
        let mut state = self.state.lock().await;
        state.writer.shutdown().await
    }
}

pub fn connection<R, W>(reader: R, writer: W) -> Connection
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    Connection::new(LineSource::new(reader), LineSink::new(writer))
}

pub fn tcp_connection(stream: TcpStream) -> Connection {
    let (reader, writer) = stream.into_split();
    connection(BufReader::new(reader), writer)
}
