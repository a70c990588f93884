//! Line-delimited message channel.
//!
//! Framing only: one message per `\n`-terminated line in each direction.
//! Decoding lives in [`crate::message`].

use std::io;
use std::string::FromUtf8Error;

use futures::Stream;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// One line taken off the input.
#[derive(Debug)]
pub enum Received {
    Line(String),
    /// Bytes that are not UTF-8 and so cannot be a message.
    NotUtf8(FromUtf8Error),
}

impl Received {
    pub fn into_line(self) -> Result<String, FromUtf8Error> {
        match self {
            Received::Line(line) => Ok(line),
            Received::NotUtf8(err) => Err(err),
        }
    }
}

/// Lazily yields lines from `reader` until end of input.
///
/// Blank lines are skipped. A read error is yielded once; callers are
/// expected to stop there. A line that is not UTF-8 is not a read error.
pub fn receive<R>(reader: R) -> impl Stream<Item = io::Result<Received>>
where
    R: AsyncBufRead + Unpin,
{
    futures::stream::unfold(Some(reader), |reader| async move {
        let mut reader = reader?;
        loop {
            let mut bytes = Vec::new();
            match reader.read_until(b'\n', &mut bytes).await {
                Ok(0) => return None,
                Ok(_) => {
                    let line = match String::from_utf8(bytes) {
                        Ok(line) => line,
                        Err(err) => return Some((Ok(Received::NotUtf8(err)), Some(reader))),
                    };
                    let trimmed = line.trim_end_matches(LINE_ENDINGS);
                    if trimmed.trim().is_empty() {
                        continue;
                    }
                    return Some((Ok(Received::Line(trimmed.to_string())), Some(reader)));
                }
                Err(err) => return Some((Err(err), None)),
            }
        }
    })
}

/// Write half of the channel, shared by every request handler.
///
/// The lock is held for the whole write-and-flush so lines from concurrent
/// handlers never interleave.
pub struct Outbox<W> {
    writer: Mutex<W>,
}

impl<W> Outbox<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Writes `line` plus a newline and flushes.
    pub async fn send(&self, line: &str) -> io::Result<()> {
        let mut encoded = Vec::with_capacity(line.len() + 1);
        encoded.extend_from_slice(line.as_bytes());
        encoded.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(&encoded).await?;
        writer.flush().await
    }
}
