use std::io::{self, Read};
use std::marker::PhantomData;

use byteorder::ByteOrder;

use crate::error::ParseError;

/// A bounds-checked reader over the bytes of a single record.
///
/// Every read checks that the requested bytes lie within the record, and
/// reports a [`ParseError`] naming the record type and the offset otherwise.
#[derive(Debug, Clone)]
pub struct RecordCursor<'a, T: ByteOrder> {
    data: &'a [u8],
    pos: usize,
    record_type: u32,
    _endian: PhantomData<T>,
}

impl<'a, T: ByteOrder> RecordCursor<'a, T> {
    pub fn new(data: &'a [u8], record_type: u32) -> Self {
        Self {
            data,
            pos: 0,
            record_type,
            _endian: PhantomData,
        }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// An error saying that `expected` bytes were needed at the current position.
    pub fn error(&self, expected: usize) -> ParseError {
        ParseError {
            record_type: self.record_type,
            offset: self.pos,
            expected,
            available: self.remaining(),
        }
    }

    pub fn read_slice(&mut self, len: usize) -> Result<&'a [u8], ParseError> {
        if len > self.remaining() {
            return Err(self.error(len));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn skip(&mut self, len: usize) -> Result<(), ParseError> {
        self.read_slice(len).map(|_| ())
    }

    pub fn read_u8(&mut self) -> Result<u8, ParseError> {
        Ok(self.read_slice(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, ParseError> {
        Ok(T::read_u16(self.read_slice(2)?))
    }

    pub fn read_u32(&mut self) -> Result<u32, ParseError> {
        Ok(T::read_u32(self.read_slice(4)?))
    }

    pub fn read_i32(&mut self) -> Result<i32, ParseError> {
        Ok(T::read_i32(self.read_slice(4)?))
    }

    pub fn read_u64(&mut self) -> Result<u64, ParseError> {
        Ok(T::read_u64(self.read_slice(8)?))
    }

    /// Reads `len` bytes holding a NUL-padded string and returns the bytes
    /// before the first NUL.
    pub fn read_padded_string(&mut self, len: usize) -> Result<Vec<u8>, ParseError> {
        let bytes = self.read_slice(len)?;
        let actual_len = memchr::memchr(0, bytes).unwrap_or(bytes.len());
        Ok(bytes[..actual_len].to_vec())
    }

    /// Returns all remaining bytes.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }

    /// Returns a cursor over the next `len` bytes, and advances past them.
    pub fn split_off(&mut self, len: usize) -> Result<RecordCursor<'a, T>, ParseError> {
        let record_type = self.record_type;
        let data = self.read_slice(len)?;
        Ok(RecordCursor::new(data, record_type))
    }
}

/// Rounds `len` up to the next multiple of 8.
pub fn align8(len: usize) -> usize {
    (len + 7) & !7
}

/// Appends `s` followed by at least one NUL byte, padded so that the
/// written length is a multiple of 8.
pub fn write_padded_string(buf: &mut Vec<u8>, s: &[u8]) {
    let padded_len = align8(s.len() + 1);
    buf.extend_from_slice(s);
    buf.resize(buf.len() + padded_len - s.len(), 0);
}

/// Reads exactly `len` bytes. The buffer grows with the data actually
/// read, so a corrupt length fails with `UnexpectedEof` instead of a huge
/// allocation.
pub fn read_bytes<R: Read>(reader: R, len: u64) -> io::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    reader.take(len).read_to_end(&mut bytes)?;
    if (bytes.len() as u64) < len {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    Ok(bytes)
}

#[cfg(test)]
mod test {
    use byteorder::LittleEndian;

    use super::*;

    #[test]
    fn short_reader_is_eof() {
        let data = [1u8, 2, 3];
        assert_eq!(read_bytes(&data[..], 2).unwrap(), vec![1, 2]);
        let err = read_bytes(&data[..], u64::MAX).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn reads_past_end_report_offset() {
        let data = [1, 0, 0, 0, 2, 0];
        let mut cursor = RecordCursor::<LittleEndian>::new(&data, 3);
        assert_eq!(cursor.read_u32().unwrap(), 1);
        let err = cursor.read_u32().unwrap_err();
        assert_eq!(
            err,
            ParseError {
                record_type: 3,
                offset: 4,
                expected: 4,
                available: 2
            }
        );
        assert_eq!(cursor.read_u16().unwrap(), 2);
        assert!(cursor.is_empty());
    }

    #[test]
    fn padded_strings() {
        let mut buf = Vec::new();
        write_padded_string(&mut buf, b"sleep");
        assert_eq!(buf, b"sleep\0\0\0");
        buf.clear();
        write_padded_string(&mut buf, b"12345678");
        assert_eq!(buf.len(), 16);

        let mut cursor = RecordCursor::<LittleEndian>::new(&buf, 3);
        assert_eq!(cursor.read_padded_string(16).unwrap(), b"12345678");
    }
}
