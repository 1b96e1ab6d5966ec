//! Adapters that turn sockets into a message stream plus a message sink.
//!
//! - [`lines`] frames a byte stream as newline-terminated messages, which
//!   keeps the TCP front end usable from netcat-style tools. Backslash, line
//!   feed and carriage return inside a payload travel as the two-byte
//!   escapes `\\`, `\n` and `\r`, so every message comes back out byte for
//!   byte.
//! - [`websocket`] maps an axum WebSocket onto the same shape. Text and
//!   binary frames both count as messages.

use std::{io, pin::Pin};

use axum::extract::ws::{Message as Frame, WebSocket};
use bytes::Bytes;
use futures::{
    future,
    sink::{self, Sink, SinkExt},
    stream::{self, BoxStream, StreamExt},
};
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};

use crate::hub::Message;

/// Default upper bound for a single message, in bytes.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;


pub type MessageStream<E> = BoxStream<'static, Result<Message, E>>;
pub type MessageSink<E> = Pin<Box<dyn Sink<Message, Error = E> + Send>>;

/// Reads and decodes the next line.
///
/// A line ends at `\n` with an optional `\r` in front of it; an empty line
/// is an empty message. Unknown escapes and a trailing lone backslash are
/// kept as typed. Returns `Ok(None)` at end of stream. A decoded payload
/// longer than `max_len` is an `InvalidData` error.
pub async fn read_line_message<R>(reader: &mut R, max_len: usize) -> io::Result<Option<Message>>
where
    R: AsyncBufRead + Unpin,
{
    // Each payload byte is at most two bytes on the wire, plus CRLF.
    let limit = (max_len as u64).saturating_mul(2).saturating_add(2);
    let mut line = Vec::new();
    let bytes = AsyncReadExt::take(&mut *reader, limit)
        .read_until(b'\n', &mut line)
        .await?;
    if bytes == 0 {
        return Ok(None);
    }

    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    } else if bytes as u64 == limit {
        return Err(too_long(max_len));
    }

    let message = unescape(&line);
    if message.len() > max_len {
        return Err(too_long(max_len));
    }
    Ok(Some(Bytes::from(message)))
}

pub async fn write_line_message<W>(writer: &mut W, message: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = Vec::with_capacity(message.len() + 1);
    for &byte in message {
        match byte {
            b'\\' => encoded.extend_from_slice(b"\\\\"),
            b'\n' => encoded.extend_from_slice(b"\\n"),
            b'\r' => encoded.extend_from_slice(b"\\r"),
            _ => encoded.push(byte),
        }
    }
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}

fn unescape(line: &[u8]) -> Vec<u8> {
    let mut decoded = Vec::with_capacity(line.len());
    let mut bytes = line.iter().copied();
    while let Some(byte) = bytes.next() {
        if byte != b'\\' {
            decoded.push(byte);
            continue;
        }
        match bytes.next() {
            Some(b'\\') => decoded.push(b'\\'),
            Some(b'n') => decoded.push(b'\n'),
            Some(b'r') => decoded.push(b'\r'),
            Some(other) => decoded.extend_from_slice(&[b'\\', other]),
            None => decoded.push(b'\\'),
        }
    }
    decoded
}

fn too_long(max_len: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("message exceeds {max_len} bytes"),
    )
}

/// Frames a split byte stream as escaped, newline-delimited messages.
///
/// Dropping the returned sink drops the writer, which for a TCP write half
/// shuts down the sending direction.
pub fn lines<R, W>(
    reader: R,
    writer: W,
    max_len: usize,
) -> (MessageStream<io::Error>, MessageSink<io::Error>)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let reader = stream::unfold(Some(BufReader::new(reader)), move |state| async move {
        let Some(mut reader) = state else {
            return None;
        };
        match read_line_message(&mut reader, max_len).await {
            Ok(Some(message)) => Some((Ok(message), Some(reader))),
            Ok(None) => None,
            // Stop after reporting the error; the reader is not reused.
            Err(err) => Some((Err(err), None)),
        }
    })
    .boxed();

    let writer = sink::unfold(writer, |mut writer, message: Message| async move {
        write_line_message(&mut writer, &message).await?;
        Ok::<_, io::Error>(writer)
    });

    (reader, Box::pin(writer))
}

/// Splits an upgraded WebSocket into a message stream and sink.
///
/// The stream ends at the first close frame. Outgoing messages are sent as
/// text frames when they are valid UTF-8 and as binary frames otherwise.
pub fn websocket(socket: WebSocket) -> (MessageStream<axum::Error>, MessageSink<axum::Error>) {
    let (sink, stream) = socket.split();

    let reader = stream
        .take_while(|frame| future::ready(!matches!(frame, Ok(Frame::Close(_)))))
        .filter_map(|frame| {
            future::ready(match frame {
                Ok(Frame::Text(text)) => Some(Ok(Bytes::from(text))),
                Ok(Frame::Binary(data)) => Some(Ok(Bytes::from(data))),
                Ok(Frame::Ping(_) | Frame::Pong(_) | Frame::Close(_)) => None,
                Err(err) => Some(Err(err)),
            })
        })
        .boxed();

    let writer =
        sink.with(|message: Message| future::ready(Ok::<_, axum::Error>(to_frame(message))));

    (reader, Box::pin(writer))
}

fn to_frame(message: Message) -> Frame {
    match String::from_utf8(message.to_vec()) {
        Ok(text) => Frame::Text(text),
        Err(err) => Frame::Binary(err.into_bytes()),
    }
}
