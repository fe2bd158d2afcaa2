// This file is part of ferro64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use byteorder::{ByteOrder, LittleEndian};

pub type Result<T> = std::result::Result<T, String>;

/// Serializes component state into an append only byte stream. All
/// multi-byte values are little endian.
pub struct Writer {
    data: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn write_bool(&mut self, value: bool) {
        self.data.push(value as u8);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.data.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        let mut buf = [0; 2];
        LittleEndian::write_u16(&mut buf, value);
        self.data.extend_from_slice(&buf);
    }

    pub fn write_u32(&mut self, value: u32) {
        let mut buf = [0; 4];
        LittleEndian::write_u32(&mut buf, value);
        self.data.extend_from_slice(&buf);
    }

    pub fn write_u64(&mut self, value: u64) {
        let mut buf = [0; 8];
        LittleEndian::write_u64(&mut buf, value);
        self.data.extend_from_slice(&buf);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.write_u16(value as u16);
    }

    pub fn write_bytes(&mut self, value: &[u8]) {
        self.data.extend_from_slice(value);
    }
}

/// Counterpart of `Writer`. Reads are bounds checked; running off the
/// end of the stream is reported as an error so that a snapshot load
/// can be rejected without mutating anything.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8]> {
        if self.remaining() < count {
            return Err(format!(
                "snapshot stream truncated at offset {}",
                self.pos
            ));
        }
        let slice = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.take(1)?[0] != 0)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        let slice = self.take(buf.len())?;
        buf.copy_from_slice(slice);
        Ok(())
    }
}

/// Implemented by every component whose state is part of a save state.
/// `save` and `restore` must walk the exact same fields in the exact
/// same order; there is no reflection and no schema.
pub trait Snapshotable {
    fn save(&self, writer: &mut Writer);
    fn restore(&mut self, reader: &mut Reader) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_scalars() {
        let mut writer = Writer::new();
        writer.write_u8(0xab);
        writer.write_u16(0x1234);
        writer.write_u64(0xdead_beef_cafe_f00d);
        writer.write_bool(true);
        let data = writer.into_bytes();
        let mut reader = Reader::new(&data);
        assert_eq!(0xab, reader.read_u8().unwrap());
        assert_eq!(0x1234, reader.read_u16().unwrap());
        assert_eq!(0xdead_beef_cafe_f00d, reader.read_u64().unwrap());
        assert_eq!(true, reader.read_bool().unwrap());
        assert_eq!(0, reader.remaining());
    }

    #[test]
    fn truncated_stream_is_an_error() {
        let data = [0x01, 0x02];
        let mut reader = Reader::new(&data);
        assert!(reader.read_u32().is_err());
    }
}
