//! Byte cursor over SCALE-encoded input.
//!
//! [`ByteReader`] is the lowest layer of the metadata decoder: a cursor
//! over an immutable slice with the handful of SCALE primitives the
//! decoder needs (compact integers, length-prefixed strings and vectors,
//! one-byte option tags). It owns no data and never copies payload bytes.
//!
//! Every failure carries the offset and the attempted operation so that
//! tolerant callers can log exactly where a blob stopped making sense.

use crate::error::{ReaderError, ReaderResult};

/// Cursor over an immutable byte slice.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Wrap a slice, cursor at offset 0.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current offset.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Move the cursor to an absolute offset. Used by tolerant callers to
    /// restore a pre-step position after a failed optional read.
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos.min(self.data.len());
    }

    /// Bytes left after the cursor.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Total input length.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when the cursor is at the end of input.
    pub fn is_empty(&self) -> bool {
        self.pos == self.data.len()
    }

    /// Read one byte without advancing.
    pub fn peek(&self) -> ReaderResult<u8> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(ReaderError::OutOfBounds {
                op: "peek",
                offset: self.pos,
            })
    }

    /// Read one byte.
    pub fn u8(&mut self) -> ReaderResult<u8> {
        let b = self
            .data
            .get(self.pos)
            .copied()
            .ok_or(ReaderError::OutOfBounds {
                op: "u8",
                offset: self.pos,
            })?;
        self.pos += 1;
        Ok(b)
    }

    /// Read four little-endian bytes as a u32.
    pub fn u32_le(&mut self) -> ReaderResult<u32> {
        let bytes = self.take(4, "u32_le")?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Return a non-owning view of `n` bytes and advance past them.
    pub fn bytes(&mut self, n: usize, op: &'static str) -> ReaderResult<&'a [u8]> {
        self.take(n, op)
    }

    fn take(&mut self, n: usize, op: &'static str) -> ReaderResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(ReaderError::OutOfBounds {
                op,
                offset: self.pos,
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Decode a SCALE compact integer, narrowed to u32.
    ///
    /// Mode 3 (big-integer) payloads wider than 4 bytes are consumed in
    /// full but only the low 4 bytes contribute to the value.
    pub fn compact_u32(&mut self) -> ReaderResult<u32> {
        let start = self.pos;
        let b0 = self.u8().map_err(|_| ReaderError::OutOfBounds {
            op: "compact",
            offset: start,
        })?;
        match b0 & 0b11 {
            0b00 => Ok(u32::from(b0 >> 2)),
            0b01 => {
                let b1 = self.compact_byte(start)?;
                Ok(u32::from(b0 >> 2) | (u32::from(b1) << 6))
            }
            0b10 => {
                let b1 = self.compact_byte(start)?;
                let b2 = self.compact_byte(start)?;
                let b3 = self.compact_byte(start)?;
                Ok(u32::from(b0 >> 2)
                    | (u32::from(b1) << 6)
                    | (u32::from(b2) << 14)
                    | (u32::from(b3) << 22))
            }
            _ => {
                let payload = usize::from(b0 >> 2) + 4;
                let bytes = self.bytes(payload, "compact payload").map_err(|_| {
                    ReaderError::OutOfBounds {
                        op: "compact payload",
                        offset: start,
                    }
                })?;
                let mut value: u32 = 0;
                for (i, b) in bytes.iter().take(4).enumerate() {
                    value |= u32::from(*b) << (8 * i);
                }
                Ok(value)
            }
        }
    }

    fn compact_byte(&mut self, start: usize) -> ReaderResult<u8> {
        self.u8().map_err(|_| ReaderError::OutOfBounds {
            op: "compact",
            offset: start,
        })
    }

    /// Decode a compact that is used as an in-buffer length or type id.
    ///
    /// A length can never need a big-integer payload wider than 4 bytes;
    /// such an encoding means the stream is garbage and the caller should
    /// stop instead of trying to consume gigabytes.
    pub fn compact_len(&mut self) -> ReaderResult<u32> {
        let b0 = self.peek().map_err(|_| ReaderError::OutOfBounds {
            op: "compact",
            offset: self.pos,
        })?;
        if b0 & 0b11 == 0b11 {
            let payload = usize::from(b0 >> 2) + 4;
            if payload > 4 {
                return Err(ReaderError::InvalidCompactMode {
                    offset: self.pos,
                    payload,
                });
            }
        }
        self.compact_u32()
    }

    /// Decode a compact-length-prefixed UTF-8 string. Decodes strictly:
    /// invalid UTF-8 is an error, not replaced.
    pub fn text(&mut self) -> ReaderResult<String> {
        let len = self.compact_len()? as usize;
        let start = self.pos;
        let bytes = self.bytes(len, "text bytes")?;
        core::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| ReaderError::InvalidUtf8 { offset: start })
    }

    /// Decode a compact-length-prefixed vector of `elem`-decoded items.
    pub fn vec<T>(
        &mut self,
        mut elem: impl FnMut(&mut Self) -> ReaderResult<T>,
    ) -> ReaderResult<Vec<T>> {
        let len = self.compact_len()? as usize;
        let mut out = Vec::with_capacity(len.min(self.remaining()));
        for _ in 0..len {
            out.push(elem(self)?);
        }
        Ok(out)
    }

    /// Decode a one-byte-tagged `Option`. Tag 0 is `None`, tag 1 decodes
    /// the payload, anything else is an error.
    pub fn option<T>(
        &mut self,
        elem: impl FnOnce(&mut Self) -> ReaderResult<T>,
    ) -> ReaderResult<Option<T>> {
        let offset = self.pos;
        match self.u8().map_err(|_| ReaderError::OutOfBounds {
            op: "option tag",
            offset,
        })? {
            0 => Ok(None),
            1 => elem(self).map(Some),
            tag => Err(ReaderError::InvalidOptionTag { tag, offset }),
        }
    }

    /// Read a compact length and forward-seek that many bytes.
    pub fn skip_bytes(&mut self) -> ReaderResult<()> {
        let len = self.compact_len()? as usize;
        self.take(len, "skip bytes")?;
        Ok(())
    }

    /// Skip a compact-length-prefixed vector of `text`s (docs, paths).
    pub fn skip_texts(&mut self) -> ReaderResult<()> {
        let len = self.compact_len()? as usize;
        for _ in 0..len {
            self.skip_bytes()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// SCALE-encode a compact u32 the way the chain does, for round-trip
    /// checks against the decoder.
    pub(crate) fn encode_compact(n: u32) -> Vec<u8> {
        if n < 64 {
            vec![(n as u8) << 2]
        } else if n < 16384 {
            let v = (n << 2) | 0b01;
            vec![v as u8, (v >> 8) as u8]
        } else if n < 1 << 30 {
            let v = (n << 2) | 0b10;
            v.to_le_bytes().to_vec()
        } else {
            let mut out = vec![0b11];
            out.extend_from_slice(&n.to_le_bytes());
            out
        }
    }

    #[test]
    fn compact_roundtrip_mode_boundaries() {
        for n in [0u32, 1, 63, 64, 16383, 16384, 1_073_741_823, u32::MAX] {
            let encoded = encode_compact(n);
            let mut r = ByteReader::new(&encoded);
            assert_eq!(r.compact_u32().unwrap(), n, "value {n}");
            assert!(r.is_empty(), "value {n} left trailing bytes");
        }
    }

    #[test]
    fn compact_mode3_narrows_and_consumes_surplus() {
        // 6-byte big-integer payload: only the low 4 bytes contribute.
        let bytes = [0b0000_1011, 0x78, 0x56, 0x34, 0x12, 0xff, 0xff, 0x09];
        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.compact_u32().unwrap(), 0x1234_5678);
        // surplus consumed, next byte is past the payload
        assert_eq!(r.u8().unwrap(), 0x09);
    }

    #[test]
    fn compact_len_rejects_wide_mode3() {
        let bytes = [0b0000_1011, 0, 0, 0, 0, 0, 0];
        let mut r = ByteReader::new(&bytes);
        assert_eq!(
            r.compact_len(),
            Err(ReaderError::InvalidCompactMode {
                offset: 0,
                payload: 6
            })
        );
        // cursor untouched on rejection
        assert_eq!(r.pos(), 0);
    }

    #[test]
    fn compact_truncated_reports_start_offset() {
        let bytes = [0x00, 0b0000_0010]; // mode 2 needs 3 more bytes
        let mut r = ByteReader::new(&bytes);
        r.u8().unwrap();
        assert_eq!(
            r.compact_u32(),
            Err(ReaderError::OutOfBounds {
                op: "compact",
                offset: 1
            })
        );
    }

    #[test]
    fn u8_at_end_is_out_of_bounds() {
        let mut r = ByteReader::new(&[1]);
        assert_eq!(r.u8().unwrap(), 1);
        assert_eq!(
            r.u8(),
            Err(ReaderError::OutOfBounds { op: "u8", offset: 1 })
        );
    }

    #[test]
    fn u32_le_reads_little_endian() {
        let mut r = ByteReader::new(&[0x78, 0x56, 0x34, 0x12]);
        assert_eq!(r.u32_le().unwrap(), 0x1234_5678);
    }

    #[test]
    fn text_reads_utf8_strictly() {
        // "System", compact length 6
        let mut bytes = encode_compact(6);
        bytes.extend_from_slice(b"System");
        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.text().unwrap(), "System");

        // invalid continuation byte
        let bad = [0x04, 0xff];
        let mut r = ByteReader::new(&bad);
        assert_eq!(r.text(), Err(ReaderError::InvalidUtf8 { offset: 1 }));
    }

    #[test]
    fn vec_decodes_len_elements() {
        let mut bytes = encode_compact(3);
        bytes.extend_from_slice(&[10, 20, 30]);
        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.vec(|r| r.u8()).unwrap(), vec![10, 20, 30]);
    }

    #[test]
    fn option_tags() {
        let mut r = ByteReader::new(&[0]);
        assert_eq!(r.option(|r| r.u8()).unwrap(), None);

        let mut r = ByteReader::new(&[1, 42]);
        assert_eq!(r.option(|r| r.u8()).unwrap(), Some(42));

        let mut r = ByteReader::new(&[2, 42]);
        assert_eq!(
            r.option(|r| r.u8()),
            Err(ReaderError::InvalidOptionTag { tag: 2, offset: 0 })
        );
    }

    #[test]
    fn skip_bytes_must_stay_in_bounds() {
        let mut bytes = encode_compact(4);
        bytes.extend_from_slice(&[1, 2]);
        let mut r = ByteReader::new(&bytes);
        assert!(matches!(
            r.skip_bytes(),
            Err(ReaderError::OutOfBounds { op: "skip bytes", .. })
        ));
    }

    #[test]
    fn peek_does_not_advance() {
        let mut r = ByteReader::new(&[7, 8]);
        assert_eq!(r.peek().unwrap(), 7);
        assert_eq!(r.peek().unwrap(), 7);
        assert_eq!(r.u8().unwrap(), 7);
        assert_eq!(r.peek().unwrap(), 8);
    }

    #[test]
    fn seek_clamps_to_input_length() {
        let mut r = ByteReader::new(&[1, 2, 3]);
        r.seek(100);
        assert_eq!(r.pos(), 3);
        assert!(r.is_empty());
    }
}
