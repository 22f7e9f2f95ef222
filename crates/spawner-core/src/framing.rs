//! Length-prefixed framing for protocol strings.
//!
//! A string travels as a 4-byte big-endian `u32` length followed by exactly
//! that many raw bytes, with no terminator. Unix stream sockets may split a
//! message across several kernel reads or accept only part of a write, so
//! every helper here loops until the whole buffer has been transferred or the
//! stream fails. A peer that closes mid-frame surfaces as
//! [`std::io::ErrorKind::UnexpectedEof`].
//!
//! Blocking helpers work over [`std::io::Read`]/[`std::io::Write`]; the
//! `_async` variants use tokio's `AsyncRead`/`AsyncWrite` with the same
//! framing.

use crate::protocol::{MessageTag, ProtocolError};
use std::io::{self, Read, Write};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Width of the length prefix in bytes.
pub const LEN_PREFIX_BYTES: usize = 4;

/// Largest payload accepted by the readers (64 MiB).
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

// ── Blocking ─────────────────────────────────────────────────────────────────

/// Write all of `buf`, retrying short writes and `Interrupted`.
pub fn write_all_to<W: Write + ?Sized>(writer: &mut W, buf: &[u8]) -> io::Result<()> {
    let mut written = 0;
    while written < buf.len() {
        match writer.write(&buf[written..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!("stream accepted {written} of {} bytes", buf.len()),
                ));
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    writer.flush()
}

/// Read exactly `len` bytes, retrying short reads and `Interrupted`.
pub fn read_at_least<R: Read + ?Sized>(reader: &mut R, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("peer closed after {filled} of {len} bytes"),
                ));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(buf)
}

/// Write a single message tag byte.
pub fn write_tag<W: Write + ?Sized>(writer: &mut W, tag: MessageTag) -> io::Result<()> {
    write_all_to(writer, &[tag.as_byte()])
}

/// Read and decode a single message tag byte.
pub fn read_tag<R: Read + ?Sized>(reader: &mut R) -> Result<MessageTag, ProtocolError> {
    let byte = read_at_least(reader, 1)?;
    MessageTag::try_from(byte[0])
}

/// Write a length-prefixed byte payload.
pub fn write_bytes<W: Write + ?Sized>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let prefix = encode_len(payload.len())?;
    write_all_to(writer, &prefix)?;
    write_all_to(writer, payload)
}

/// Read a length-prefixed byte payload.
pub fn read_bytes<R: Read + ?Sized>(reader: &mut R) -> io::Result<Vec<u8>> {
    let prefix = read_at_least(reader, LEN_PREFIX_BYTES)?;
    let len = decode_len(&prefix)?;
    read_at_least(reader, len)
}

/// Write a length-prefixed string.
pub fn write_string<W: Write + ?Sized>(writer: &mut W, value: &str) -> io::Result<()> {
    write_bytes(writer, value.as_bytes())
}

/// Read a length-prefixed string; the payload must be valid UTF-8.
pub fn read_string<R: Read + ?Sized>(reader: &mut R) -> io::Result<String> {
    into_utf8(read_bytes(reader)?)
}

// ── Async ────────────────────────────────────────────────────────────────────

/// Write a single message tag byte.
pub async fn write_tag_async<W>(writer: &mut W, tag: MessageTag) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(&[tag.as_byte()]).await?;
    writer.flush().await
}

/// Read and decode a single message tag byte.
pub async fn read_tag_async<R>(reader: &mut R) -> Result<MessageTag, ProtocolError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let byte = reader.read_u8().await?;
    MessageTag::try_from(byte)
}

/// Write a length-prefixed byte payload.
pub async fn write_bytes_async<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let prefix = encode_len(payload.len())?;
    writer.write_all(&prefix).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

/// Read a length-prefixed byte payload.
pub async fn read_bytes_async<R>(reader: &mut R) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut prefix = [0u8; LEN_PREFIX_BYTES];
    reader.read_exact(&mut prefix).await?;
    let len = decode_len(&prefix)?;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Write a length-prefixed string.
pub async fn write_string_async<W>(writer: &mut W, value: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    write_bytes_async(writer, value.as_bytes()).await
}

/// Read a length-prefixed string; the payload must be valid UTF-8.
pub async fn read_string_async<R>(reader: &mut R) -> io::Result<String>
where
    R: AsyncRead + Unpin + ?Sized,
{
    into_utf8(read_bytes_async(reader).await?)
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn encode_len(len: usize) -> io::Result<[u8; LEN_PREFIX_BYTES]> {
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("payload of {len} bytes exceeds frame limit {MAX_FRAME_LEN}"),
        ));
    }
    // MAX_FRAME_LEN < u32::MAX, so the cast is lossless.
    Ok((len as u32).to_be_bytes())
}

fn decode_len(prefix: &[u8]) -> io::Result<usize> {
    let bytes: [u8; LEN_PREFIX_BYTES] = prefix
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "short length prefix"))?;
    let len = u32::from_be_bytes(bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame length {len} exceeds limit {MAX_FRAME_LEN}"),
        ));
    }
    Ok(len)
}

fn into_utf8(bytes: Vec<u8>) -> io::Result<String> {
    String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
