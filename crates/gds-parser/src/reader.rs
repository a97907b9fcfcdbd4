//! Forward-only reader over a GDSII record stream: `[u16 length][u16 tag]
//! [payload]`, big-endian throughout.

use byteorder::{BigEndian, ReadBytesExt};
use std::io::Cursor;

use gds_protocol::{ParseError, ParseStage};

#[derive(Debug, Clone, Copy)]
pub struct RecordReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> RecordReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn total_len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    /// Reads the next record, or `None` at end of stream. `stage` is only
    /// used to annotate a malformed-length error with where parsing was.
    pub fn next(&mut self, stage: ParseStage) -> Result<Option<(u16, &'a [u8])>, ParseError> {
        if self.pos >= self.bytes.len() {
            return Ok(None);
        }
        if self.pos + 4 > self.bytes.len() {
            return Err(ParseError::Truncated {
                offset: self.pos,
                expected: 4,
                available: self.bytes.len() - self.pos,
            });
        }
        let mut header = Cursor::new(&self.bytes[self.pos..self.pos + 4]);
        let length = header
            .read_u16::<BigEndian>()
            .expect("slice is exactly 4 bytes") as usize;
        let tag = header.read_u16::<BigEndian>().expect("slice is exactly 4 bytes");

        if length < 4 {
            return Err(ParseError::MalformedLength { stage, offset: self.pos });
        }
        if self.pos + length > self.bytes.len() {
            return Err(ParseError::Truncated {
                offset: self.pos,
                expected: length,
                available: self.bytes.len() - self.pos,
            });
        }

        let payload = &self.bytes[self.pos + 4..self.pos + length];
        self.pos += length;
        Ok(Some((tag, payload)))
    }
}
