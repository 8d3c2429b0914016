//! Fixed-capacity ring buffer with transactional reads
//!
//! Bytes arriving from the network are written at the write head. The
//! decoder consumes them through a separate peek head, which only becomes
//! permanent once [`RingBuffer::commit`] moves the read head up to it. If a
//! frame turns out to be incomplete, [`RingBuffer::abort`] rewinds the peek
//! head so the same bytes are read again once more data has arrived.
//!
//! ```text
//!        r (committed)      p (peeked)           w (written)
//!        │                  │                    │
//!  ──────▼──────────────────▼────────────────────▼──────────
//!   free │ consumed, not yet│ buffered, not yet  │ free
//!        │ committed        │ peeked             │
//! ```
//!
//! One slot is always left empty so `r == w` unambiguously means "empty";
//! a buffer of capacity `C` holds at most `C - 1` bytes.

use bytes::{BufMut, Bytes, BytesMut};

/// Ring buffer error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    /// Not enough free space for a write
    #[error("{requested} bytes written with only {available} bytes free")]
    Overflow { requested: usize, available: usize },

    /// A peek that no amount of buffered data could ever satisfy
    #[error("{requested} bytes requested from a buffer of capacity {capacity}")]
    RequestTooLarge { requested: usize, capacity: usize },
}

/// Fixed-capacity byte store with committed and tentative read cursors
#[derive(Debug)]
pub struct RingBuffer {
    buf: Box<[u8]>,
    /// Committed read head
    read: usize,
    /// Tentative peek head
    peek: usize,
    /// Write head
    write: usize,
}

impl RingBuffer {
    /// Create a buffer with the given capacity in bytes
    pub fn new(capacity: usize) -> Self {
        // A capacity below 2 could never hold a byte
        let capacity = capacity.max(2);
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            read: 0,
            peek: 0,
            write: 0,
        }
    }

    /// Total capacity of the backing store
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes that can be written before the buffer overflows
    pub fn free_space(&self) -> usize {
        let cap = self.capacity();
        (self.read + cap - self.write - 1) % cap
    }

    /// Bytes between the committed read head and the write head
    pub fn readable_len(&self) -> usize {
        let cap = self.capacity();
        (self.write + cap - self.read) % cap
    }

    /// Bytes between the peek head and the write head
    pub fn peekable_len(&self) -> usize {
        let cap = self.capacity();
        (self.write + cap - self.peek) % cap
    }

    /// Whether nothing is buffered past the committed read head
    pub fn is_empty(&self) -> bool {
        self.read == self.write
    }

    /// Append bytes, wrapping at the end of the backing store
    pub fn write(&mut self, data: &[u8]) -> Result<usize, BufferError> {
        let available = self.free_space();
        if data.len() > available {
            return Err(BufferError::Overflow {
                requested: data.len(),
                available,
            });
        }

        let cap = self.capacity();
        let extent = cap - self.write;
        if data.len() > extent {
            let (head, tail) = data.split_at(extent);
            self.buf[self.write..].copy_from_slice(head);
            self.buf[..tail.len()].copy_from_slice(tail);
            self.write = tail.len();
        } else {
            self.buf[self.write..self.write + data.len()].copy_from_slice(data);
            self.write = (self.write + data.len()) % cap;
        }

        Ok(data.len())
    }

    /// Peek exactly `n` bytes past the peek head
    ///
    /// Returns `Ok(None)` if fewer than `n` bytes are buffered yet. Requests
    /// of `capacity - 1` bytes or more fail outright, since they can never be
    /// satisfied.
    pub fn peek_exact(&mut self, n: usize) -> Result<Option<Bytes>, BufferError> {
        let cap = self.capacity();
        if n >= cap - 1 {
            return Err(BufferError::RequestTooLarge {
                requested: n,
                capacity: cap,
            });
        }

        if self.peekable_len() < n {
            return Ok(None);
        }

        let out = self.copy_out(self.peek, n);
        self.peek = (self.peek + n) % cap;
        Ok(Some(out))
    }

    /// Peek up to (not including) the next `delimiter`
    ///
    /// On success the peek head moves past the delimiter. Returns `None` if
    /// the delimiter has not been written yet.
    pub fn peek_until(&mut self, delimiter: u8) -> Option<Bytes> {
        let cap = self.capacity();
        let available = self.peekable_len();

        for offset in 0..available {
            let pos = (self.peek + offset) % cap;
            if self.buf[pos] == delimiter {
                let out = self.copy_out(self.peek, offset);
                self.peek = (pos + 1) % cap;
                return Some(out);
            }
        }

        None
    }

    /// Make everything peeked so far permanent, freeing its space
    pub fn commit(&mut self) {
        self.read = self.peek;
    }

    /// Discard all peeks since the last commit
    pub fn abort(&mut self) {
        self.peek = self.read;
    }

    /// Move the peek head up to the write head without copying anything
    pub fn skip_peekable(&mut self) {
        self.peek = self.write;
    }

    fn copy_out(&self, start: usize, len: usize) -> Bytes {
        let cap = self.capacity();
        let mut out = BytesMut::with_capacity(len);
        let first = len.min(cap - start);
        out.put_slice(&self.buf[start..start + first]);
        if first < len {
            out.put_slice(&self.buf[..len - first]);
        }
        out.freeze()
    }
}
