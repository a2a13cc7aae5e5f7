//! Fixed-capacity row buffer
//!
//! The capacity is also the batch size of the wire protocol: one drain
//! becomes one `COPY <n> RECORDS` statement, so `n` is known up front.

use crate::encoder::EncodedLine;
use crate::error::{Error, Result};

/// Ordered, bounded collection of encoded lines awaiting a flush
#[derive(Debug)]
pub struct RowBuffer {
    capacity: usize,
    lines: Vec<EncodedLine>,
    bytes: usize,
}

impl RowBuffer {
    /// Create a buffer holding at most `capacity` lines
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::config("row buffer capacity must be at least 1"));
        }
        Ok(Self {
            capacity,
            // Large default capacities are grown into rather than reserved.
            lines: Vec::with_capacity(capacity.min(4096)),
            bytes: 0,
        })
    }

    /// Append a line, failing with `BufferFull` when at capacity
    pub fn add(&mut self, line: EncodedLine) -> Result<()> {
        if self.is_full() {
            return Err(Error::BufferFull {
                capacity: self.capacity,
            });
        }
        self.bytes += line.len();
        self.lines.push(line);
        Ok(())
    }

    /// Take every buffered line in insertion order, leaving the buffer empty.
    ///
    /// The caller owns the lines from here on and must flush them.
    pub fn drain(&mut self) -> Vec<EncodedLine> {
        self.bytes = 0;
        std::mem::take(&mut self.lines)
    }

    /// Whether no lines are buffered
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Whether the next `add` would fail
    #[inline]
    pub fn is_full(&self) -> bool {
        self.lines.len() >= self.capacity
    }

    /// Number of buffered lines
    #[inline]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Maximum number of lines
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total payload bytes currently buffered
    #[inline]
    pub fn byte_size(&self) -> usize {
        self.bytes
    }
}
