//! Wire framing for the server protocol.
//!
//! Every message on the wire is a byte sequence followed by one bare
//! terminator byte. Text messages are written as-is; arbitrary binary
//! payloads escape literal terminator and escape bytes so the receiver can
//! find the real message boundary. The login digest helpers live here too,
//! next to the bytes they produce.

use bytes::{BufMut, BytesMut};
use std::io::Read;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{ClientError, ClientResult};

// ============================================================================
// Protocol Constants
// ============================================================================

/// Terminates every message on the wire.
pub const TERMINATOR: u8 = 0x00;

/// Prefixes a literal 0x00 or 0xFF byte inside a binary payload.
pub const ESCAPE: u8 = 0xFF;

/// Size of the read-ahead buffer used when decoding incoming frames.
pub(crate) const READ_BUF_SIZE: usize = 4096;

// ============================================================================
// Message Encoding
// ============================================================================

/// Encode a text message: the UTF-8 bytes followed by a bare terminator.
pub(crate) fn encode_text(message: &str) -> BytesMut {
    let mut buf = BytesMut::with_capacity(message.len() + 1);
    buf.put_slice(message.as_bytes());
    buf.put_u8(TERMINATOR);
    buf
}

/// Encode an arbitrary binary payload.
///
/// Every literal 0x00 or 0xFF byte is preceded by the escape byte; the
/// final terminator stays bare so the receiver can spot the boundary.
pub fn encode_payload(payload: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(payload.len() + 1);
    for &byte in payload {
        if byte == TERMINATOR || byte == ESCAPE {
            buf.put_u8(ESCAPE);
        }
        buf.put_u8(byte);
    }
    buf.put_u8(TERMINATOR);
    buf
}

// ============================================================================
// Frame Reader
// ============================================================================

/// Pulls terminated, escape-decoded frames out of a byte stream.
///
/// Bytes are consumed through a fixed read-ahead buffer that refills from
/// the transport only when exhausted. The blocking and async paths share
/// the buffer state; the async path suspends exactly at refill points and
/// never yields a partial frame.
#[derive(Debug)]
pub(crate) struct FrameReader {
    buf: [u8; READ_BUF_SIZE],
    pos: usize,
    len: usize,
}

impl FrameReader {
    pub(crate) fn new() -> Self {
        FrameReader {
            buf: [0; READ_BUF_SIZE],
            pos: 0,
            len: 0,
        }
    }

    /// Discard buffered lookahead; the next read pulls fresh bytes from
    /// the transport.
    pub(crate) fn reset(&mut self) {
        self.pos = 0;
        self.len = 0;
    }

    pub(crate) fn read_byte<R: Read>(&mut self, src: &mut R) -> ClientResult<u8> {
        if self.pos == self.len {
            let n = src.read(&mut self.buf).map_err(ClientError::from_io)?;
            if n == 0 {
                return Err(ClientError::ConnectionClosed);
            }
            self.pos = 0;
            self.len = n;
        }
        let byte = self.buf[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    /// Read one frame, decoding escapes, up to the bare terminator.
    pub(crate) fn read_frame<R: Read>(&mut self, src: &mut R) -> ClientResult<Vec<u8>> {
        let mut frame = Vec::new();
        loop {
            let byte = self.read_byte(src)?;
            if byte == TERMINATOR {
                return Ok(frame);
            }
            if byte == ESCAPE {
                // The next byte is literal, never a terminator or escape.
                frame.push(self.read_byte(src)?);
            } else {
                frame.push(byte);
            }
        }
    }

    pub(crate) async fn read_byte_async<R>(&mut self, src: &mut R) -> ClientResult<u8>
    where
        R: AsyncRead + Unpin,
    {
        if self.pos == self.len {
            let n = src.read(&mut self.buf).await.map_err(ClientError::from_io)?;
            if n == 0 {
                return Err(ClientError::ConnectionClosed);
            }
            self.pos = 0;
            self.len = n;
        }
        let byte = self.buf[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    /// Async twin of [`FrameReader::read_frame`].
    pub(crate) async fn read_frame_async<R>(&mut self, src: &mut R) -> ClientResult<Vec<u8>>
    where
        R: AsyncRead + Unpin,
    {
        let mut frame = Vec::new();
        loop {
            let byte = self.read_byte_async(src).await?;
            if byte == TERMINATOR {
                return Ok(frame);
            }
            if byte == ESCAPE {
                frame.push(self.read_byte_async(src).await?);
            } else {
                frame.push(byte);
            }
        }
    }
}

// ============================================================================
// Login Digest
// ============================================================================

/// Lowercase hex MD5 of a string.
pub(crate) fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Compute the digest the client sends during login.
///
/// The greeting is split on `:`. Two or more parts mean
/// `[hint, nonce]` and the challenge folds the username and hint around
/// the password; a bare greeting is the nonce and the challenge is the
/// password alone. The digest is `md5(md5(challenge) + nonce)` in hex.
pub(crate) fn login_digest(greeting: &str, username: &str, password: &str) -> String {
    let parts: Vec<&str> = greeting.split(':').collect();
    let (challenge, nonce) = if parts.len() > 1 {
        (format!("{}:{}:{}", username, parts[0], password), parts[1])
    } else {
        (password.to_string(), parts[0])
    };
    md5_hex(&format!("{}{}", md5_hex(&challenge), nonce))
}
