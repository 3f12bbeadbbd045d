//! Tag-structure codec.
//!
//! Every value on the wire is a one-byte type tag followed by its payload in
//! network byte order.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

pub const TAG_U32: u8 = b'L';
pub const TAG_BOOLEAN_TRUE: u8 = b'1';
pub const TAG_BOOLEAN_FALSE: u8 = b'0';
pub const TAG_STRING: u8 = b't';
pub const TAG_STRING_NULL: u8 = b'N';
pub const TAG_USEC: u8 = b'U';
pub const TAG_CVOLUME: u8 = b'v';

/// Channels a channel volume may carry.
pub const CHANNELS_MAX: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagError {
    #[error("tag structure ended early")]
    Short,
    #[error("expected tag '{expected}', found 0x{found:02x}")]
    UnexpectedTag { expected: char, found: u8 },
    #[error("string is not NUL terminated")]
    UnterminatedString,
    #[error("string is not valid UTF-8")]
    InvalidString,
    #[error("channel volume with {0} channels")]
    InvalidChannels(u8),
    #[error("{0} bytes left after the last field")]
    TrailingData(usize),
}

/// Cursor over a received tag structure.
#[derive(Debug, Clone)]
pub struct TagReader {
    buf: Bytes,
}

impl TagReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    fn tag(&mut self, expected: u8) -> Result<(), TagError> {
        if !self.buf.has_remaining() {
            return Err(TagError::Short);
        }
        let found = self.buf.get_u8();
        if found != expected {
            return Err(TagError::UnexpectedTag {
                expected: expected as char,
                found,
            });
        }
        Ok(())
    }

    pub fn get_u32(&mut self) -> Result<u32, TagError> {
        self.tag(TAG_U32)?;
        if self.buf.remaining() < 4 {
            return Err(TagError::Short);
        }
        Ok(self.buf.get_u32())
    }

    pub fn get_boolean(&mut self) -> Result<bool, TagError> {
        if !self.buf.has_remaining() {
            return Err(TagError::Short);
        }
        match self.buf.get_u8() {
            TAG_BOOLEAN_TRUE => Ok(true),
            TAG_BOOLEAN_FALSE => Ok(false),
            found => Err(TagError::UnexpectedTag {
                expected: TAG_BOOLEAN_TRUE as char,
                found,
            }),
        }
    }

    /// A string, or `None` for the null string.
    pub fn get_string(&mut self) -> Result<Option<String>, TagError> {
        if !self.buf.has_remaining() {
            return Err(TagError::Short);
        }
        match self.buf.get_u8() {
            TAG_STRING_NULL => Ok(None),
            TAG_STRING => {
                let end = self
                    .buf
                    .iter()
                    .position(|b| *b == 0)
                    .ok_or(TagError::UnterminatedString)?;
                let raw = self.buf.split_to(end);
                self.buf.advance(1);
                String::from_utf8(raw.to_vec())
                    .map(Some)
                    .map_err(|_| TagError::InvalidString)
            }
            found => Err(TagError::UnexpectedTag {
                expected: TAG_STRING as char,
                found,
            }),
        }
    }

    /// Microseconds.
    pub fn get_usec(&mut self) -> Result<u64, TagError> {
        self.tag(TAG_USEC)?;
        if self.buf.remaining() < 8 {
            return Err(TagError::Short);
        }
        Ok(self.buf.get_u64())
    }

    /// Per-channel volume.
    pub fn get_cvolume(&mut self) -> Result<Vec<u32>, TagError> {
        self.tag(TAG_CVOLUME)?;
        if !self.buf.has_remaining() {
            return Err(TagError::Short);
        }
        let channels = self.buf.get_u8();
        if channels == 0 || usize::from(channels) > CHANNELS_MAX {
            return Err(TagError::InvalidChannels(channels));
        }
        if self.buf.remaining() < usize::from(channels) * 4 {
            return Err(TagError::Short);
        }
        Ok((0..channels).map(|_| self.buf.get_u32()).collect())
    }

    pub fn is_eof(&self) -> bool {
        !self.buf.has_remaining()
    }

    /// Fail unless every field was consumed.
    pub fn expect_eof(&self) -> Result<(), TagError> {
        match self.buf.remaining() {
            0 => Ok(()),
            left => Err(TagError::TrailingData(left)),
        }
    }
}

/// Builder for an outgoing tag structure.
#[derive(Debug, Clone, Default)]
pub struct TagWriter {
    buf: BytesMut,
}

impl TagWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u8(TAG_U32);
        self.buf.put_u32(value);
        self
    }

    pub fn put_boolean(&mut self, value: bool) -> &mut Self {
        self.buf.put_u8(if value {
            TAG_BOOLEAN_TRUE
        } else {
            TAG_BOOLEAN_FALSE
        });
        self
    }

    pub fn put_string(&mut self, value: Option<&str>) -> &mut Self {
        match value {
            Some(s) => {
                self.buf.put_u8(TAG_STRING);
                self.buf.put_slice(s.as_bytes());
                self.buf.put_u8(0);
            }
            None => self.buf.put_u8(TAG_STRING_NULL),
        }
        self
    }

    pub fn put_usec(&mut self, value: u64) -> &mut Self {
        self.buf.put_u8(TAG_USEC);
        self.buf.put_u64(value);
        self
    }

    /// Per-channel volume. Channels past [`CHANNELS_MAX`] are dropped.
    pub fn put_cvolume(&mut self, volumes: &[u32]) -> &mut Self {
        let channels = volumes.len().min(CHANNELS_MAX);
        self.buf.put_u8(TAG_CVOLUME);
        self.buf.put_u8(channels as u8);
        for v in &volumes[..channels] {
            self.buf.put_u32(*v);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_what_was_written() {
        let mut w = TagWriter::new();
        w.put_u32(7)
            .put_boolean(true)
            .put_string(Some("shutter"))
            .put_string(None)
            .put_usec(90_000)
            .put_cvolume(&[100, 200]);

        let mut r = TagReader::new(w.freeze());
        assert_eq!(r.get_u32(), Ok(7));
        assert_eq!(r.get_boolean(), Ok(true));
        assert_eq!(r.get_string(), Ok(Some("shutter".to_string())));
        assert_eq!(r.get_string(), Ok(None));
        assert_eq!(r.get_usec(), Ok(90_000));
        assert_eq!(r.get_cvolume(), Ok(vec![100, 200]));
        assert!(r.is_eof());
        assert_eq!(r.expect_eof(), Ok(()));
    }

    #[test]
    fn test_wire_layout() {
        let mut w = TagWriter::new();
        w.put_u32(0x0102_0304).put_string(Some("a"));
        assert_eq!(&w.freeze()[..], b"L\x01\x02\x03\x04ta\0");
    }

    #[test]
    fn test_malformed_input() {
        let mut r = TagReader::new(Bytes::from_static(b"L\x00\x01"));
        assert_eq!(r.get_u32(), Err(TagError::Short));

        let mut r = TagReader::new(Bytes::from_static(b"1"));
        assert_eq!(
            r.get_u32(),
            Err(TagError::UnexpectedTag {
                expected: 'L',
                found: b'1'
            })
        );

        let mut r = TagReader::new(Bytes::from_static(b"tabc"));
        assert_eq!(r.get_string(), Err(TagError::UnterminatedString));

        let mut r = TagReader::new(Bytes::from_static(b"v\x00"));
        assert_eq!(r.get_cvolume(), Err(TagError::InvalidChannels(0)));

        let mut r = TagReader::new(Bytes::from_static(b"0L"));
        assert_eq!(r.get_boolean(), Ok(false));
        assert_eq!(r.expect_eof(), Err(TagError::TrailingData(1)));

        let mut r = TagReader::new(Bytes::new());
        assert_eq!(r.get_boolean(), Err(TagError::Short));
    }
}
