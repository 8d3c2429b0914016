//! Frame encoding and incremental decoding
//!
//! Wire format:
//!
//! ```text
//! COMMAND\n
//! key:value\n        (zero or more, spaces after the colon are dropped)
//! \n
//! body\0
//! ```
//!
//! With a `content-length` header the body is read by length and must be
//! followed by the terminator; without one the body runs up to the first
//! terminator byte.
//!
//! Decoding works on a [`RingBuffer`]: everything is peeked, and the buffer
//! is only committed once a whole frame has been read. An incomplete frame
//! aborts the peeks and yields `Ok(None)`, so the next call starts over from
//! the same frame boundary once more bytes have arrived.

use bytes::{BufMut, Bytes, BytesMut};

use super::constants::{FRAME_TERMINATOR, HEADER_CONTENT_LENGTH, LINE_DELIMITER};
use super::frame::{Command, Frame, Headers};
use super::ring_buffer::RingBuffer;
use crate::error::{Error, Result};

/// Decode one frame from the buffer
///
/// Returns `Ok(None)` when the buffer does not yet hold a complete frame.
/// On error the tentative reads are rolled back, so the buffer still
/// starts at the offending frame; callers decide how much of it to skip.
pub fn decode(buf: &mut RingBuffer) -> Result<Option<Frame>> {
    let decoded = decode_frame(buf);
    if decoded.is_err() {
        buf.abort();
    }
    decoded
}

fn decode_frame(buf: &mut RingBuffer) -> Result<Option<Frame>> {
    // Command line, skipping blank lines left between frames
    let command = loop {
        let Some(line) = buf.peek_until(LINE_DELIMITER) else {
            buf.abort();
            return Ok(None);
        };
        if !line.is_empty() {
            break parse_command(&line)?;
        }
        buf.commit();
    };

    // Headers until the blank line
    let mut headers = Headers::new();
    loop {
        let Some(line) = buf.peek_until(LINE_DELIMITER) else {
            buf.abort();
            return Ok(None);
        };
        if line.is_empty() {
            break;
        }
        let (key, value) = parse_header(&line)?;
        headers.set(key, value);
    }

    let body = match headers.get(HEADER_CONTENT_LENGTH) {
        Some(raw) => {
            let len = parse_content_length(raw)?;

            let Some(body) = buf.peek_exact(len)? else {
                buf.abort();
                return Ok(None);
            };

            let Some(terminator) = buf.peek_exact(1)? else {
                buf.abort();
                return Ok(None);
            };
            if terminator[0] != FRAME_TERMINATOR {
                return Err(Error::malformed("Frame terminator missing"));
            }

            body
        }
        None => {
            let Some(body) = buf.peek_until(FRAME_TERMINATOR) else {
                buf.abort();
                return Ok(None);
            };
            body
        }
    };

    buf.commit();
    Ok(Some(Frame::new(command, headers, body)))
}

/// Serialize a frame
///
/// A `content-length` header is written with the current body length, so a
/// body replaced after construction is still framed correctly.
pub fn encode(frame: &Frame) -> Bytes {
    let command = frame.command.as_str();
    let header_len: usize = frame
        .headers
        .iter()
        .map(|(k, v)| k.len() + v.len() + 2)
        .sum();
    let mut out = BytesMut::with_capacity(command.len() + header_len + frame.body.len() + 3);

    out.put_slice(command.as_bytes());
    out.put_u8(LINE_DELIMITER);

    for (key, value) in frame.headers.iter() {
        out.put_slice(key.as_bytes());
        out.put_u8(b':');
        if key == HEADER_CONTENT_LENGTH {
            out.put_slice(frame.body.len().to_string().as_bytes());
        } else {
            out.put_slice(value.as_bytes());
        }
        out.put_u8(LINE_DELIMITER);
    }
    out.put_u8(LINE_DELIMITER);

    out.put_slice(&frame.body);
    out.put_u8(FRAME_TERMINATOR);

    out.freeze()
}

fn parse_command(line: &[u8]) -> Result<Command> {
    let text = std::str::from_utf8(line)
        .map_err(|_| Error::malformed("Command is not valid UTF-8"))?;
    Ok(Command::from(text))
}

fn parse_header(line: &[u8]) -> Result<(String, String)> {
    let text = std::str::from_utf8(line)
        .map_err(|_| Error::malformed(format!("Header is not valid UTF-8: {:?}", line)))?;

    match text.split_once(':') {
        Some((key, value)) if !key.is_empty() => {
            Ok((key.to_string(), value.trim_start_matches(' ').to_string()))
        }
        _ => Err(Error::malformed(format!("Invalid header: {}", text))),
    }
}

fn parse_content_length(raw: &str) -> Result<usize> {
    raw.trim()
        .parse()
        .map_err(|_| Error::malformed(format!("Invalid content-length: {}", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring_with(data: &[u8]) -> RingBuffer {
        let mut ring = RingBuffer::new(1024);
        ring.write(data).unwrap();
        ring
    }

    fn sample_frame() -> Frame {
        Frame::new(
            Command::Send,
            [("destination", "/queue/news"), ("x-trace", "42")]
                .into_iter()
                .collect(),
            "hello world",
        )
    }

    #[test]
    fn test_decode_without_content_length() {
        let mut ring = ring_with(b"SEND\ndestination:/queue/a\n\nhi\0");
        let frame = decode(&mut ring).unwrap().unwrap();

        assert_eq!(frame.command, Command::Send);
        assert_eq!(frame.header("destination"), Some("/queue/a"));
        assert_eq!(frame.body, &b"hi"[..]);
        // content-length is filled in on construction
        assert_eq!(frame.header("content-length"), Some("2"));
        assert!(ring.is_empty());
    }

    #[test]
    fn test_decode_with_content_length_allows_nul_in_body() {
        let mut ring = ring_with(b"SEND\ncontent-length:3\n\na\0b\0");
        let frame = decode(&mut ring).unwrap().unwrap();
        assert_eq!(frame.body, &b"a\0b"[..]);
    }

    #[test]
    fn test_decode_trims_spaces_after_colon() {
        let mut ring = ring_with(b"SEND\ndestination:   /queue/a\nx-empty:\n\n\0");
        let frame = decode(&mut ring).unwrap().unwrap();
        assert_eq!(frame.header("destination"), Some("/queue/a"));
        assert_eq!(frame.header("x-empty"), Some(""));
    }

    #[test]
    fn test_decode_value_may_contain_colon() {
        let mut ring = ring_with(b"SEND\nreply-to:tcp://host:1\n\n\0");
        let frame = decode(&mut ring).unwrap().unwrap();
        assert_eq!(frame.header("reply-to"), Some("tcp://host:1"));
    }

    #[test]
    fn test_decode_duplicate_header_last_wins() {
        let mut ring = ring_with(b"SEND\nid:1\nid:2\n\n\0");
        let frame = decode(&mut ring).unwrap().unwrap();
        assert_eq!(frame.header("id"), Some("2"));
    }

    #[test]
    fn test_decode_malformed_header() {
        let mut ring = ring_with(b"SEND\nno-colon-here\n\n\0");
        assert!(matches!(decode(&mut ring), Err(Error::MalformedFrame(_))));

        let mut ring = ring_with(b"SEND\n:value\n\n\0");
        assert!(matches!(decode(&mut ring), Err(Error::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_error_rolls_back_peeks() {
        let mut ring = ring_with(b"SEND\nx-ok:1\nno-colon-here\n\n\0");
        let before = ring.readable_len();

        assert!(decode(&mut ring).is_err());
        assert_eq!(ring.readable_len(), before);
        assert_eq!(ring.peekable_len(), before);

        // A second attempt sees the same frame from its first byte
        let err = decode(&mut ring).unwrap_err();
        assert!(matches!(err, Error::MalformedFrame(ref m) if m == "Invalid header: no-colon-here"));
    }

    #[test]
    fn test_decode_terminator_missing() {
        let mut ring = ring_with(b"SEND\ncontent-length:2\n\nabc\0");
        let err = decode(&mut ring).unwrap_err();
        assert!(matches!(err, Error::MalformedFrame(ref m) if m == "Frame terminator missing"));
    }

    #[test]
    fn test_decode_terminator_check_waits_for_body() {
        let mut ring = ring_with(b"SEND\ncontent-length:5\n\nab");
        assert!(decode(&mut ring).unwrap().is_none());
        // Nothing was consumed
        assert_eq!(ring.peekable_len(), ring.readable_len());
    }

    #[test]
    fn test_decode_invalid_content_length() {
        let mut ring = ring_with(b"SEND\ncontent-length:abc\n\n\0");
        assert!(matches!(decode(&mut ring), Err(Error::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_content_length_beyond_capacity() {
        let mut ring = RingBuffer::new(64);
        ring.write(b"SEND\ncontent-length:1000\n\n").unwrap();
        assert!(matches!(decode(&mut ring), Err(Error::FrameTooLarge(_))));
    }

    #[test]
    fn test_decode_skips_blank_lines_between_frames() {
        let mut ring = ring_with(b"\n\nCONNECT\n\n\0\nDISCONNECT\n\n\0");
        assert_eq!(decode(&mut ring).unwrap().unwrap().command, Command::Connect);
        assert_eq!(decode(&mut ring).unwrap().unwrap().command, Command::Disconnect);
        assert!(decode(&mut ring).unwrap().is_none());
    }

    #[test]
    fn test_decode_multiple_frames_in_one_write() {
        let mut data = encode(&sample_frame()).to_vec();
        data.extend_from_slice(&encode(&Frame::empty(Command::Disconnect)));
        let mut ring = ring_with(&data);

        assert_eq!(decode(&mut ring).unwrap().unwrap(), sample_frame());
        assert_eq!(decode(&mut ring).unwrap().unwrap().command, Command::Disconnect);
        assert!(decode(&mut ring).unwrap().is_none());
    }

    #[test]
    fn test_encode_layout() {
        let frame = Frame::empty(Command::Receipt).with_header("receipt-id", "77");
        assert_eq!(
            &encode(&frame)[..],
            &b"RECEIPT\ncontent-length:0\nreceipt-id:77\n\n\0"[..]
        );
    }

    #[test]
    fn test_encode_recomputes_content_length() {
        let mut frame = sample_frame();
        frame.body = Bytes::from_static(b"changed");
        let mut ring = ring_with(&encode(&frame));

        let decoded = decode(&mut ring).unwrap().unwrap();
        assert_eq!(decoded.body, &b"changed"[..]);
        assert_eq!(decoded.header("content-length"), Some("7"));
    }

    #[test]
    fn test_roundtrip() {
        let frame = sample_frame();
        let mut ring = ring_with(&encode(&frame));
        let decoded = decode(&mut ring).unwrap().unwrap();

        assert_eq!(decoded.command, frame.command);
        assert_eq!(decoded.headers, frame.headers);
        assert_eq!(decoded.body, frame.body);
    }

    #[test]
    fn test_partial_delivery_every_split() {
        let frame = sample_frame();
        let encoded = encode(&frame);

        for split in 1..encoded.len() {
            let mut ring = RingBuffer::new(256);

            ring.write(&encoded[..split]).unwrap();
            assert!(decode(&mut ring).unwrap().is_none(), "split at {}", split);

            ring.write(&encoded[split..]).unwrap();
            let decoded = decode(&mut ring).unwrap().unwrap();
            assert_eq!(decoded, frame, "split at {}", split);
            assert!(ring.is_empty());
        }
    }

    #[test]
    fn test_partial_delivery_byte_by_byte() {
        // Frame without content-length, delivered one byte at a time
        let raw = b"SEND\ndestination:/topic/a.b\n\nbody\0";
        let mut ring = RingBuffer::new(64);
        let mut frames = Vec::new();

        for byte in raw.iter() {
            ring.write(&[*byte]).unwrap();
            while let Some(frame) = decode(&mut ring).unwrap() {
                frames.push(frame);
            }
        }

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].body, &b"body"[..]);
        assert_eq!(frames[0].header("destination"), Some("/topic/a.b"));
    }
}
