//! Buffered frame reader
//!
//! Owns a connection's [`RingBuffer`] and turns raw reads into frames.
//! After a malformed frame, input is dropped up to the next frame
//! terminator so the stream can carry on.

use crate::error::{Error, Result};
use crate::protocol::constants::FRAME_TERMINATOR;
use crate::protocol::{codec, Frame, RingBuffer};

/// Incremental frame reader for one connection
#[derive(Debug)]
pub struct FrameReader {
    ring: RingBuffer,
    resyncing: bool,
}

impl FrameReader {
    /// Create a reader with a decode buffer of `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: RingBuffer::new(capacity),
            resyncing: false,
        }
    }

    /// Bytes that can be pushed before the buffer overflows
    pub fn free_space(&self) -> usize {
        self.ring.free_space()
    }

    /// Bytes received but not yet consumed by a decoded frame
    pub fn buffered(&self) -> usize {
        self.ring.readable_len()
    }

    /// Append received bytes
    ///
    /// Fails with [`Error::BufferOverflow`] if they do not fit.
    pub fn push(&mut self, data: &[u8]) -> Result<()> {
        self.ring.write(data)?;
        Ok(())
    }

    /// Decode the next complete frame, if any
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.resyncing && !self.skip_to_terminator() {
            return Ok(None);
        }

        match codec::decode(&mut self.ring) {
            Err(err @ Error::MalformedFrame(_)) => {
                // decode left the buffer at the start of the bad frame
                self.resyncing = true;
                Err(err)
            }
            other => other,
        }
    }

    /// Drop bytes through the next terminator; false if none arrived yet
    fn skip_to_terminator(&mut self) -> bool {
        let found = self.ring.peek_until(FRAME_TERMINATOR).is_some();
        if !found {
            self.ring.skip_peekable();
        }
        self.ring.commit();
        self.resyncing = !found;
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Command;

    #[test]
    fn test_frames_across_pushes() {
        let mut reader = FrameReader::new(128);

        reader.push(b"CONNECT\nlogin:").unwrap();
        assert!(reader.next_frame().unwrap().is_none());

        reader.push(b"guest\n\n\0SEND\n").unwrap();
        let frame = reader.next_frame().unwrap().unwrap();
        assert_eq!(frame.command, Command::Connect);
        assert_eq!(frame.header("login"), Some("guest"));

        assert!(reader.next_frame().unwrap().is_none());
        assert_eq!(reader.buffered(), 5);
    }

    #[test]
    fn test_overflow() {
        let mut reader = FrameReader::new(16);
        reader.push(b"SEND\nx:aaaaaaa").unwrap();
        assert!(reader.next_frame().unwrap().is_none());

        let err = reader.push(b"bbbb").unwrap_err();
        assert!(matches!(err, Error::BufferOverflow(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_resync_after_malformed_frame() {
        let mut reader = FrameReader::new(256);
        reader
            .push(b"SEND\nbroken header\nmore:stuff\n\nbody\0SEND\ndestination:/q\n\n\0")
            .unwrap();

        assert!(matches!(reader.next_frame(), Err(Error::MalformedFrame(_))));

        let frame = reader.next_frame().unwrap().unwrap();
        assert_eq!(frame.header("destination"), Some("/q"));
        assert!(reader.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_resync_waits_for_terminator() {
        let mut reader = FrameReader::new(256);
        reader.push(b"SEND\nbroken\n").unwrap();
        assert!(reader.next_frame().is_err());

        // Rest of the bad frame trickles in
        reader.push(b"junk").unwrap();
        assert!(reader.next_frame().unwrap().is_none());
        assert_eq!(reader.buffered(), 0);

        reader.push(b"\0ACK\n\n\0").unwrap();
        assert_eq!(reader.next_frame().unwrap().unwrap().command, Command::Ack);
    }
}
