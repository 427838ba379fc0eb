//! Byte accumulator for the inbound stream.
//!
//! A fixed-capacity buffer with explicit read/write cursors. Socket reads
//! land at the write cursor, complete frames are taken from the read cursor,
//! and [`FrameBuffer::compact`] moves the unread tail to the front when the
//! free space at the end runs out.
//!
//! ```text
//!  0          read            write            capacity
//!  |  consumed  |  unread bytes  |     free      |
//! ```

use anyhow::{bail, Result};

use super::codec::LengthPrefix;

/// Inbound reassembly buffer.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: Box<[u8]>,
    read: usize,
    write: usize,
    prefix: LengthPrefix,
}

impl FrameBuffer {
    /// Creates a buffer holding at most `capacity` bytes, framed by `prefix`.
    #[must_use]
    pub fn new(capacity: usize, prefix: LengthPrefix) -> Self {
        Self {
            buf: vec![0; capacity].into_boxed_slice(),
            read: 0,
            write: 0,
            prefix,
        }
    }

    /// Unread bytes.
    pub fn len(&self) -> usize {
        self.write - self.read
    }

    /// Whether no unread bytes are held.
    pub fn is_empty(&self) -> bool {
        self.read == self.write
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Writable space after the write cursor.
    pub fn free_tail(&mut self) -> &mut [u8] {
        &mut self.buf[self.write..]
    }

    /// Marks `n` bytes written into [`free_tail`](Self::free_tail).
    pub fn commit(&mut self, n: usize) {
        self.write = (self.write + n).min(self.buf.len());
    }

    /// Copies `bytes` in, compacting first if needed.
    ///
    /// Fails if the bytes cannot fit even after compacting.
    pub fn extend(&mut self, bytes: &[u8]) -> Result<()> {
        if self.buf.len() - self.write < bytes.len() {
            self.compact();
        }
        if self.buf.len() - self.write < bytes.len() {
            bail!(
                "Frame buffer full: {} unread bytes, {} incoming",
                self.len(),
                bytes.len()
            );
        }
        self.buf[self.write..self.write + bytes.len()].copy_from_slice(bytes);
        self.write += bytes.len();
        Ok(())
    }

    /// Takes the next complete frame body, if one is buffered.
    ///
    /// Fails when the header announces a body that can never fit.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let header = self.prefix.width();
        let unread = &self.buf[self.read..self.write];
        if unread.len() < header {
            return Ok(None);
        }

        let length = self.prefix.read(unread);
        if header + length > self.buf.len() {
            bail!(
                "Frame of {length} bytes exceeds buffer capacity {}",
                self.buf.len()
            );
        }
        if unread.len() < header + length {
            return Ok(None);
        }

        let body = unread[header..header + length].to_vec();
        self.read += header + length;
        if self.read == self.write {
            self.read = 0;
            self.write = 0;
        }
        Ok(Some(body))
    }

    /// Moves unread bytes to the start of the buffer.
    pub fn compact(&mut self) {
        if self.read == 0 {
            return;
        }
        self.buf.copy_within(self.read..self.write, 0);
        self.write -= self.read;
        self.read = 0;
    }
}
