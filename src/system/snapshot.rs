// This file is part of ferro64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::core::snapshot::{Reader, Result, Writer};

// Save state container. The file starts with a header carrying the
// magic bytes, version and a screenshot, followed by an append only
// stream of typed state records. Loading validates the whole layout
// before any state is applied.

pub const MAGIC_BYTES: [u8; 4] = [0x56, 0x43, 0x36, 0x34]; // "VC64"

pub const V_MAJOR: u8 = 1;
pub const V_MINOR: u8 = 0;
pub const V_SUBMINOR: u8 = 0;

/// Record tags, fixed order in the stream.
pub mod record {
    pub const FRAME_STATE: u8 = 0x01;
    pub const RAM: u8 = 0x02;
    pub const COLOR_RAM: u8 = 0x03;
    pub const CPU: u8 = 0x04;
    pub const CIA_1: u8 = 0x05;
    pub const CIA_2: u8 = 0x06;
    pub const VIC: u8 = 0x07;
    pub const IEC: u8 = 0x08;
    pub const DRIVE: u8 = 0x09;
}

/// Reset policy markers stored with every record.
pub mod flags {
    pub const CLEAR_ON_RESET: u8 = 0x00;
    pub const KEEP_ON_RESET: u8 = 0x01;
}

pub struct Screenshot {
    pub width: u16,
    pub height: u16,
    pub pixels: Vec<u8>,
}

pub struct Snapshot {
    pub major: u8,
    pub minor: u8,
    pub subminor: u8,
    pub timestamp: u64,
    pub screenshot: Screenshot,
    records: Vec<(u8, u8, Vec<u8>)>,
}

impl Snapshot {
    pub fn new(screenshot: Screenshot) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            major: V_MAJOR,
            minor: V_MINOR,
            subminor: V_SUBMINOR,
            timestamp,
            screenshot,
            records: Vec::new(),
        }
    }

    pub fn add_record(&mut self, tag: u8, flags: u8, payload: Vec<u8>) {
        self.records.push((tag, flags, payload));
    }

    pub fn record(&self, tag: u8) -> Option<&[u8]> {
        self.records
            .iter()
            .find(|(t, _, _)| *t == tag)
            .map(|(_, _, payload)| payload.as_slice())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        writer.write_bytes(&MAGIC_BYTES);
        writer.write_u8(self.major);
        writer.write_u8(self.minor);
        writer.write_u8(self.subminor);
        writer.write_u64(self.timestamp);
        writer.write_u16(self.screenshot.width);
        writer.write_u16(self.screenshot.height);
        writer.write_u32(self.screenshot.pixels.len() as u32);
        writer.write_bytes(&self.screenshot.pixels);
        for (tag, flags, payload) in &self.records {
            writer.write_u8(*tag);
            writer.write_u8(*flags);
            writer.write_u32(payload.len() as u32);
            writer.write_bytes(payload);
        }
        writer.into_bytes()
    }

    /// Parse and fully validate a snapshot image. Nothing is applied to
    /// the machine here; a bad file is rejected without side effects.
    pub fn from_bytes(data: &[u8]) -> Result<Snapshot> {
        let mut reader = Reader::new(data);
        let mut magic = [0u8; 4];
        reader.read_bytes(&mut magic)?;
        if magic != MAGIC_BYTES {
            return Err("not a snapshot file".to_string());
        }
        let major = reader.read_u8()?;
        let minor = reader.read_u8()?;
        let subminor = reader.read_u8()?;
        // Minor revisions stay backward compatible, majors do not
        if major != V_MAJOR {
            return Err(format!(
                "unsupported snapshot version {}.{}.{}",
                major, minor, subminor
            ));
        }
        if minor > V_MINOR {
            return Err(format!(
                "snapshot version {}.{}.{} is newer than this core",
                major, minor, subminor
            ));
        }
        let timestamp = reader.read_u64()?;
        let width = reader.read_u16()?;
        let height = reader.read_u16()?;
        let pixel_count = reader.read_u32()? as usize;
        if pixel_count != width as usize * height as usize {
            return Err("corrupt screenshot geometry".to_string());
        }
        let mut pixels = vec![0u8; pixel_count];
        reader.read_bytes(&mut pixels)?;
        let mut records = Vec::new();
        while reader.remaining() > 0 {
            let tag = reader.read_u8()?;
            let flags = reader.read_u8()?;
            let length = reader.read_u32()? as usize;
            let mut payload = vec![0u8; length];
            reader.read_bytes(&mut payload)?;
            records.push((tag, flags, payload));
        }
        Ok(Snapshot {
            major,
            minor,
            subminor,
            timestamp,
            screenshot: Screenshot {
                width,
                height,
                pixels,
            },
            records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_screenshot() -> Screenshot {
        Screenshot {
            width: 0,
            height: 0,
            pixels: Vec::new(),
        }
    }

    #[test]
    fn container_round_trip() {
        let mut snapshot = Snapshot::new(empty_screenshot());
        snapshot.add_record(record::RAM, flags::KEEP_ON_RESET, vec![1, 2, 3]);
        snapshot.add_record(record::CIA_1, flags::CLEAR_ON_RESET, vec![4, 5]);
        let bytes = snapshot.to_bytes();
        let parsed = Snapshot::from_bytes(&bytes).unwrap();
        assert_eq!(Some(&[1u8, 2, 3][..]), parsed.record(record::RAM));
        assert_eq!(Some(&[4u8, 5][..]), parsed.record(record::CIA_1));
        assert_eq!(None, parsed.record(record::DRIVE));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut snapshot = Snapshot::new(empty_screenshot()).to_bytes();
        snapshot[0] = b'X';
        assert!(Snapshot::from_bytes(&snapshot).is_err());
    }

    #[test]
    fn major_version_mismatch_blocks_load() {
        let mut bytes = Snapshot::new(empty_screenshot()).to_bytes();
        bytes[4] = V_MAJOR + 1;
        assert!(Snapshot::from_bytes(&bytes).is_err());
    }

    #[test]
    fn truncated_record_is_rejected() {
        let mut snapshot = Snapshot::new(empty_screenshot());
        snapshot.add_record(record::RAM, flags::KEEP_ON_RESET, vec![0; 100]);
        let mut bytes = snapshot.to_bytes();
        bytes.truncate(bytes.len() - 10);
        assert!(Snapshot::from_bytes(&bytes).is_err());
    }
}
