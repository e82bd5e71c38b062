//! Stream framing for TCP/TLS syslog
//!
//! Octet-counted framing (`<len> <msg>`) is preferred; when the first
//! non-whitespace byte is not an ASCII digit the decoder falls back to
//! newline-terminated frames. A frame larger than the configured cap is a
//! protocol violation and poisons the connection, since the stream can no
//! longer be resynchronized reliably.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    #[error("frame of {size} bytes exceeds cap of {max} bytes")]
    Oversize { size: usize, max: usize },

    #[error("invalid octet count prefix")]
    InvalidOctetCount,
}

/// Incremental frame decoder for one connection.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_frame: usize,
}

impl FrameDecoder {
    pub fn new(max_frame: usize) -> Self {
        Self {
            buf: Vec::with_capacity(1024),
            max_frame,
        }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pull the next complete frame out of the buffer, if any.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, FramingError> {
        // Skip inter-frame whitespace left by newline framing.
        let start = self
            .buf
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(self.buf.len());
        if start > 0 {
            self.buf.drain(..start);
        }
        let first = match self.buf.first() {
            Some(b) => *b,
            None => return Ok(None),
        };
        if first.is_ascii_digit() {
            self.next_octet_counted()
        } else {
            self.next_newline_terminated()
        }
    }

    fn next_octet_counted(&mut self) -> Result<Option<Vec<u8>>, FramingError> {
        let sep = match self.buf.iter().position(|b| *b == b' ') {
            Some(pos) => pos,
            None => {
                // An octet count longer than the cap's digit count cannot be
                // valid; otherwise wait for more bytes.
                if self.buf.len() > 10 {
                    return Err(FramingError::InvalidOctetCount);
                }
                return Ok(None);
            }
        };
        if sep == 0 || sep > 10 || !self.buf[..sep].iter().all(u8::is_ascii_digit) {
            return Err(FramingError::InvalidOctetCount);
        }
        let len: usize = std::str::from_utf8(&self.buf[..sep])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(FramingError::InvalidOctetCount)?;
        if len > self.max_frame {
            return Err(FramingError::Oversize {
                size: len,
                max: self.max_frame,
            });
        }
        let frame_end = sep + 1 + len;
        if self.buf.len() < frame_end {
            return Ok(None);
        }
        let frame = self.buf[sep + 1..frame_end].to_vec();
        self.buf.drain(..frame_end);
        Ok(Some(frame))
    }

    fn next_newline_terminated(&mut self) -> Result<Option<Vec<u8>>, FramingError> {
        match self.buf.iter().position(|b| *b == b'\n') {
            Some(pos) => {
                if pos > self.max_frame {
                    return Err(FramingError::Oversize {
                        size: pos,
                        max: self.max_frame,
                    });
                }
                let mut frame = self.buf[..pos].to_vec();
                self.buf.drain(..=pos);
                if frame.last() == Some(&b'\r') {
                    frame.pop();
                }
                Ok(Some(frame))
            }
            None => {
                if self.buf.len() > self.max_frame {
                    return Err(FramingError::Oversize {
                        size: self.buf.len(),
                        max: self.max_frame,
                    });
                }
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn octet_counted_frames_back_to_back() {
        let mut decoder = FrameDecoder::new(8192);
        decoder.extend(b"10 <13>1 test19 <13>1 second frame!");
        assert_eq!(decoder.next_frame().unwrap().unwrap(), b"<13>1 test".to_vec());
        assert_eq!(
            decoder.next_frame().unwrap().unwrap(),
            b"<13>1 second frame!".to_vec()
        );
        assert_eq!(decoder.next_frame().unwrap(), None);
    }

    #[test]
    fn octet_counted_frame_split_across_reads() {
        let mut decoder = FrameDecoder::new(8192);
        decoder.extend(b"10 <13");
        assert_eq!(decoder.next_frame().unwrap(), None);
        decoder.extend(b">1 abcd");
        assert_eq!(decoder.next_frame().unwrap().unwrap(), b"<13>1 abcd".to_vec());
    }

    #[test]
    fn newline_fallback_when_first_byte_not_digit() {
        let mut decoder = FrameDecoder::new(8192);
        decoder.extend(b"<13>one\r\n<13>two\n");
        assert_eq!(decoder.next_frame().unwrap().unwrap(), b"<13>one".to_vec());
        assert_eq!(decoder.next_frame().unwrap().unwrap(), b"<13>two".to_vec());
        assert_eq!(decoder.next_frame().unwrap(), None);
    }

    #[test]
    fn frame_at_cap_is_accepted_and_over_cap_rejected() {
        let max = 32;
        let mut decoder = FrameDecoder::new(max);
        let body = vec![b'a'; max];
        decoder.extend(format!("{max} ").as_bytes());
        decoder.extend(&body);
        assert_eq!(decoder.next_frame().unwrap().unwrap().len(), max);

        let mut decoder = FrameDecoder::new(max);
        decoder.extend(format!("{} ", max + 1).as_bytes());
        assert_eq!(
            decoder.next_frame(),
            Err(FramingError::Oversize {
                size: max + 1,
                max
            })
        );
    }

    #[test]
    fn unbounded_newline_frame_is_rejected() {
        let mut decoder = FrameDecoder::new(16);
        decoder.extend(&vec![b'x'; 17]);
        assert!(matches!(
            decoder.next_frame(),
            Err(FramingError::Oversize { .. })
        ));
    }

    #[test]
    fn garbage_octet_count_is_rejected() {
        let mut decoder = FrameDecoder::new(8192);
        decoder.extend(b"12345678901 x");
        assert_eq!(decoder.next_frame(), Err(FramingError::InvalidOctetCount));
    }
}
