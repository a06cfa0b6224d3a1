//! Per-session frame buffers.
//!
//! ## Inbound
//!
//! `FrameBuffer` reads from a non-blocking socket up to an exact byte
//! threshold and never past it. Callers set the threshold to the length of
//! the frame they expect, so a decode only ever sees a complete frame and
//! bytes belonging to later frames stay in the kernel until asked for.
//!
//! ## Outbound
//!
//! `WriteQueue` holds encoded frames waiting for the backend socket to accept
//! them. It has a soft limit: once `is_full` reports true the session stops
//! reading from its client until the queue drains.

use crate::codec::{self, Frame};
use bytes::{Buf, Bytes, BytesMut};
use std::io::{self, Read, Write};

/// Outcome of a `FrameBuffer::fill_to` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// The threshold has been reached.
    Complete,
    /// The socket has no more data for now.
    WouldBlock,
    /// The peer closed its write side.
    Eof,
}

/// Inbound buffer with an exact read threshold.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
}

impl FrameBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Read until exactly `threshold` bytes are buffered.
    ///
    /// Never reads more than `threshold - len()` bytes from `reader`.
    pub fn fill_to<R: Read>(&mut self, reader: &mut R, threshold: usize) -> io::Result<Fill> {
        loop {
            let start = self.buf.len();
            if start >= threshold {
                return Ok(Fill::Complete);
            }

            self.buf.resize(threshold, 0);
            match reader.read(&mut self.buf[start..]) {
                Ok(0) => {
                    self.buf.truncate(start);
                    return Ok(Fill::Eof);
                }
                Ok(n) => self.buf.truncate(start + n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.buf.truncate(start);
                    return Ok(Fill::WouldBlock);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {
                    self.buf.truncate(start);
                }
                Err(e) => {
                    self.buf.truncate(start);
                    return Err(e);
                }
            }
        }
    }

    /// Split off the first `len` bytes if that many are buffered.
    pub fn take_frame(&mut self, len: usize) -> Option<Bytes> {
        if self.buf.len() < len {
            return None;
        }
        Some(self.buf.split_to(len).freeze())
    }

    /// Bytes currently buffered.
    pub fn len(&self) -> usize {
        self.buf.len()
    }
}

/// Outcome of a `WriteQueue::flush` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flush {
    /// Everything queued has been written.
    Drained,
    /// The socket would block with data still queued.
    Blocked,
}

/// Outbound queue of encoded frames.
#[derive(Debug)]
pub struct WriteQueue {
    buf: BytesMut,
    limit: usize,
}

impl WriteQueue {
    /// Create a queue that reports full at `limit` bytes.
    pub fn new(limit: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(limit),
            limit,
        }
    }

    /// Append an encoded frame.
    pub fn push(&mut self, frame: &Frame) {
        codec::encode_into(frame, &mut self.buf);
    }

    /// Write queued bytes until drained or the writer would block.
    pub fn flush<W: Write>(&mut self, writer: &mut W) -> io::Result<Flush> {
        while !self.buf.is_empty() {
            match writer.write(&self.buf) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
                }
                Ok(n) => self.buf.advance(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Flush::Blocked),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(Flush::Drained)
    }

    /// Whether client reads should pause.
    pub fn is_full(&self) -> bool {
        self.buf.len() >= self.limit
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Drop everything still queued.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
