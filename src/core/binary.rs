//! Little-endian primitive codec.
//!
//! Every header and fixed-layout message body is built from these helpers.
//! Reads fail with [`ProtocolError::TruncatedInput`] when the buffer runs out and
//! writes fail with [`ProtocolError::WriteFailed`] when the sink rejects bytes.
//! After either error the stream position is undefined and the buffer should
//! be discarded.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};

use crate::error::{ProtocolError, Result};

fn read_err(e: io::Error) -> ProtocolError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        ProtocolError::TruncatedInput
    } else {
        ProtocolError::Io(e)
    }
}

/// Cursor over a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct BinaryReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> BinaryReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    pub fn remaining(&self) -> usize {
        self.cursor
            .get_ref()
            .len()
            .saturating_sub(self.position())
    }

    /// The unread tail of the buffer.
    pub fn rest(&self) -> &'a [u8] {
        let data: &'a [u8] = *self.cursor.get_ref();
        &data[self.position().min(data.len())..]
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.cursor.read_u8().map_err(read_err)
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        self.cursor.read_i8().map_err(read_err)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.cursor.read_u16::<LittleEndian>().map_err(read_err)
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        self.cursor.read_i16::<LittleEndian>().map_err(read_err)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.cursor.read_u32::<LittleEndian>().map_err(read_err)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.cursor.read_i32::<LittleEndian>().map_err(read_err)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.cursor.read_u64::<LittleEndian>().map_err(read_err)
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.cursor.read_i64::<LittleEndian>().map_err(read_err)
    }

    /// Borrow exactly `len` bytes without copying.
    pub fn read_slice(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(ProtocolError::TruncatedInput);
        }
        let start = self.position();
        let data: &'a [u8] = *self.cursor.get_ref();
        self.cursor.set_position((start + len) as u64);
        Ok(&data[start..start + len])
    }

    /// Read exactly `len` bytes into a fresh buffer.
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; len];
        self.cursor.read_exact(&mut out).map_err(read_err)?;
        Ok(out)
    }

    /// Read a `u32` length followed by that many bytes.
    pub fn read_len_prefixed(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u32()? as usize;
        self.read_slice(len)
    }

    /// Read bytes up to (and consuming) a NUL terminator.
    pub fn read_cstring(&mut self) -> Result<String> {
        let rest = self.rest();
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(ProtocolError::TruncatedInput)?;
        let text = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.cursor.set_position((self.position() + end + 1) as u64);
        Ok(text)
    }
}

/// Little-endian writer over any [`Write`] sink.
#[derive(Debug)]
pub struct BinaryWriter<W> {
    inner: W,
}

impl<W: Write> BinaryWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub fn write_u8(&mut self, v: u8) -> Result<()> {
        self.inner.write_u8(v).map_err(ProtocolError::WriteFailed)
    }

    pub fn write_i8(&mut self, v: i8) -> Result<()> {
        self.inner.write_i8(v).map_err(ProtocolError::WriteFailed)
    }

    pub fn write_u16(&mut self, v: u16) -> Result<()> {
        self.inner
            .write_u16::<LittleEndian>(v)
            .map_err(ProtocolError::WriteFailed)
    }

    pub fn write_i16(&mut self, v: i16) -> Result<()> {
        self.inner
            .write_i16::<LittleEndian>(v)
            .map_err(ProtocolError::WriteFailed)
    }

    pub fn write_u32(&mut self, v: u32) -> Result<()> {
        self.inner
            .write_u32::<LittleEndian>(v)
            .map_err(ProtocolError::WriteFailed)
    }

    pub fn write_i32(&mut self, v: i32) -> Result<()> {
        self.inner
            .write_i32::<LittleEndian>(v)
            .map_err(ProtocolError::WriteFailed)
    }

    pub fn write_u64(&mut self, v: u64) -> Result<()> {
        self.inner
            .write_u64::<LittleEndian>(v)
            .map_err(ProtocolError::WriteFailed)
    }

    pub fn write_i64(&mut self, v: i64) -> Result<()> {
        self.inner
            .write_i64::<LittleEndian>(v)
            .map_err(ProtocolError::WriteFailed)
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.inner
            .write_all(data)
            .map_err(ProtocolError::WriteFailed)
    }

    /// Write a `u32` length followed by the bytes.
    pub fn write_len_prefixed(&mut self, data: &[u8]) -> Result<()> {
        let len = u32::try_from(data.len()).map_err(|_| ProtocolError::OversizedPacket(data.len()))?;
        self.write_u32(len)?;
        self.write_bytes(data)
    }

    pub fn write_cstring(&mut self, text: &str) -> Result<()> {
        self.write_bytes(text.as_bytes())?;
        self.write_u8(0)
    }
}

/// A fixed-layout structure that can be read from the wire.
pub trait Decode: Sized {
    fn decode(reader: &mut BinaryReader<'_>) -> Result<Self>;
}

/// A fixed-layout structure that can be written to the wire.
pub trait Encode {
    fn encode<W: Write>(&self, writer: &mut BinaryWriter<W>) -> Result<()>;

    /// Convenience: encode into a fresh buffer.
    fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = BinaryWriter::new(Vec::new());
        self.encode(&mut writer)?;
        Ok(writer.into_inner())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_little_endian_layout() {
        let mut w = BinaryWriter::new(Vec::new());
        w.write_u32(0x0403_0201).unwrap();
        w.write_i16(-2).unwrap();
        w.write_u64(u64::MAX).unwrap();
        let bytes = w.into_inner();
        assert_eq!(&bytes[..4], &[1, 2, 3, 4]);
        assert_eq!(&bytes[4..6], &[0xFE, 0xFF]);

        let mut r = BinaryReader::new(&bytes);
        assert_eq!(r.read_u32().unwrap(), 0x0403_0201);
        assert_eq!(r.read_i16().unwrap(), -2);
        assert_eq!(r.read_u64().unwrap(), u64::MAX);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_truncated_reads() {
        let mut r = BinaryReader::new(&[1, 2, 3]);
        assert!(matches!(r.read_u32(), Err(ProtocolError::TruncatedInput)));

        let mut r = BinaryReader::new(&[5, 0, 0, 0, 1, 2]);
        assert!(matches!(
            r.read_len_prefixed(),
            Err(ProtocolError::TruncatedInput)
        ));

        let mut r = BinaryReader::new(b"no terminator");
        assert!(matches!(r.read_cstring(), Err(ProtocolError::TruncatedInput)));
    }

    #[test]
    fn test_len_prefixed_and_cstring() {
        let mut w = BinaryWriter::new(Vec::new());
        w.write_len_prefixed(b"abc").unwrap();
        w.write_cstring("name").unwrap();
        w.write_u8(7).unwrap();
        let bytes = w.into_inner();

        let mut r = BinaryReader::new(&bytes);
        assert_eq!(r.read_len_prefixed().unwrap(), b"abc");
        assert_eq!(r.read_cstring().unwrap(), "name");
        assert_eq!(r.read_u8().unwrap(), 7);
        assert!(r.rest().is_empty());
    }

    #[test]
    fn test_write_failure_is_reported() {
        struct Closed;
        impl Write for Closed {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::from(io::ErrorKind::BrokenPipe))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut w = BinaryWriter::new(Closed);
        assert!(matches!(w.write_u32(1), Err(ProtocolError::WriteFailed(_))));
    }
}
