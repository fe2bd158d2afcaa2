// This file is part of ferro64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use log::info;

// In-memory model of a 5.25" floppy as raw GCR bit streams, one per
// half track. The 1541 steps in half track units; standard disks only
// use the odd positions 1, 3, 5, ...
//
// Spec: http://www.baltissen.org/newhtm/1541c.htm (zone layout)
//       GCR encoding per the 1541 DOS ($F77F translation table)

pub const NUM_HALFTRACKS: usize = 84;

/// Largest track size in bytes (G64 track buffer size).
pub const MAX_TRACK_BYTES: usize = 7928;

/// Bytes per track for the four speed zones, outermost first.
const BYTES_PER_ZONE: [usize; 4] = [7692, 7142, 6666, 6250];

const D64_SIZE_35: usize = 174_848;
const D64_SIZE_40: usize = 196_608;

/// 4 bit nibble to 5 bit GCR code. No code has more than two
/// consecutive zeroes or eight consecutive ones in a stream.
const GCR_CODE: [u8; 16] = [
    0x0a, 0x0b, 0x12, 0x13, 0x0e, 0x0f, 0x16, 0x17, 0x09, 0x19, 0x1a, 0x1b, 0x0d, 0x1d, 0x1e,
    0x15,
];

fn gcr_decode(code: u8) -> Option<u8> {
    GCR_CODE.iter().position(|&c| c == code).map(|n| n as u8)
}

pub fn zone_of_halftrack(halftrack: usize) -> usize {
    let track = (halftrack + 1) / 2;
    match track {
        1..=17 => 0,
        18..=24 => 1,
        25..=30 => 2,
        _ => 3,
    }
}

pub fn sectors_in_track(track: usize) -> usize {
    match track {
        1..=17 => 21,
        18..=24 => 19,
        25..=30 => 18,
        _ => 17,
    }
}

fn d64_track_offset(track: usize) -> usize {
    (1..track).map(|t| sectors_in_track(t) * 256).sum()
}

/// Encode a run of bytes into GCR. Source length must be a multiple of
/// four; every four bytes become five GCR bytes.
fn encode_gcr(src: &[u8], dst: &mut Vec<u8>) {
    debug_assert!(src.len() % 4 == 0);
    for chunk in src.chunks(4) {
        let mut bits = 0u64;
        for byte in chunk {
            bits = (bits << 5) | GCR_CODE[(byte >> 4) as usize] as u64;
            bits = (bits << 5) | GCR_CODE[(byte & 0x0f) as usize] as u64;
        }
        for i in (0..5).rev() {
            dst.push((bits >> (i * 8)) as u8);
        }
    }
}

/// Inverse of `encode_gcr`. Fails on codes that never appear in valid
/// streams.
fn decode_gcr(src: &[u8]) -> Result<Vec<u8>, String> {
    debug_assert!(src.len() % 5 == 0);
    let mut dst = Vec::with_capacity(src.len() / 5 * 4);
    for chunk in src.chunks(5) {
        let mut bits = 0u64;
        for byte in chunk {
            bits = (bits << 8) | *byte as u64;
        }
        for i in (0..4).rev() {
            let hi = gcr_decode(((bits >> (i * 10 + 5)) & 0x1f) as u8)
                .ok_or_else(|| "invalid GCR quintet".to_string())?;
            let lo = gcr_decode(((bits >> (i * 10)) & 0x1f) as u8)
                .ok_or_else(|| "invalid GCR quintet".to_string())?;
            dst.push((hi << 4) | lo);
        }
    }
    Ok(dst)
}

pub struct Disk {
    // Raw bit streams, indexed by half track 1..=84
    data: Vec<[u8; MAX_TRACK_BYTES]>,
    // Stream lengths in bits
    length: [u16; NUM_HALFTRACKS + 1],
    write_protected: bool,
    modified: bool,
}

impl Disk {
    pub fn new() -> Self {
        let mut length = [0u16; NUM_HALFTRACKS + 1];
        for (ht, len) in length.iter_mut().enumerate().skip(1) {
            *len = (BYTES_PER_ZONE[zone_of_halftrack(ht)] * 8) as u16;
        }
        let mut disk = Self {
            data: vec![[0; MAX_TRACK_BYTES]; NUM_HALFTRACKS + 1],
            length,
            write_protected: false,
            modified: false,
        };
        disk.format_pattern();
        disk
    }

    /// An unformatted disk carries no sync marks, just weak field noise.
    fn format_pattern(&mut self) {
        for track in self.data.iter_mut() {
            for byte in track.iter_mut() {
                *byte = 0x55;
            }
        }
    }

    pub fn len(&self, halftrack: usize) -> u16 {
        self.length[halftrack]
    }

    pub fn is_write_protected(&self) -> bool {
        self.write_protected
    }

    pub fn set_write_protected(&mut self, value: bool) {
        self.write_protected = value;
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn read_bit(&self, halftrack: usize, offset: u16) -> u8 {
        (self.data[halftrack][(offset >> 3) as usize] >> (7 - (offset & 0x07))) & 0x01
    }

    pub fn write_bit(&mut self, halftrack: usize, offset: u16, value: bool) {
        let mask = 0x80 >> (offset & 0x07);
        let byte = &mut self.data[halftrack][(offset >> 3) as usize];
        if value {
            *byte |= mask;
        } else {
            *byte &= !mask;
        }
        self.modified = true;
    }

    /// Raw half track bytes, the G64 view of the stream.
    pub fn halftrack_bytes(&self, halftrack: usize) -> &[u8] {
        let len = (self.length[halftrack] as usize + 7) / 8;
        &self.data[halftrack][..len]
    }

    pub fn set_halftrack_bytes(&mut self, halftrack: usize, bytes: &[u8], bit_length: u16) {
        self.data[halftrack][..bytes.len()].copy_from_slice(bytes);
        self.length[halftrack] = bit_length;
        self.modified = true;
    }

    // -- D64 conversion

    /// Expand a sector dump into GCR streams. The disk id is taken from
    /// the BAM, so a subsequent `export_d64` is the identity on valid
    /// images.
    pub fn encode_d64(&mut self, image: &[u8]) -> Result<(), String> {
        let num_tracks = match image.len() {
            D64_SIZE_35 => 35,
            D64_SIZE_40 => 40,
            _ => {
                return Err(format!(
                    "unexpected D64 image size {} bytes",
                    image.len()
                ))
            }
        };
        // Disk id lives in the BAM sector (track 18, sector 0)
        let bam = d64_track_offset(18);
        let id1 = image[bam + 0xa2];
        let id2 = image[bam + 0xa3];
        self.format_pattern();
        for track in 1..=num_tracks {
            self.encode_track(image, track, id1, id2)?;
        }
        info!(target: "drive", "Encoded {} tracks, id {:02x}{:02x}", num_tracks, id1, id2);
        self.modified = false;
        Ok(())
    }

    fn encode_track(&mut self, image: &[u8], track: usize, id1: u8, id2: u8) -> Result<(), String> {
        let halftrack = 2 * track - 1;
        let capacity = BYTES_PER_ZONE[zone_of_halftrack(halftrack)];
        let sectors = sectors_in_track(track);
        // SYNC + header + gap + SYNC + data
        let sector_size = 5 + 10 + 9 + 5 + 325;
        let spare = capacity - sectors * sector_size;
        let tail_gap = spare / sectors;
        let mut stream = Vec::with_capacity(capacity);
        for sector in 0..sectors {
            let offset = d64_track_offset(track) + sector * 256;
            let data = &image[offset..offset + 256];
            // Header block
            stream.extend_from_slice(&[0xff; 5]);
            let header_cks = sector as u8 ^ track as u8 ^ id1 ^ id2;
            let header = [
                0x08,
                header_cks,
                sector as u8,
                track as u8,
                id2,
                id1,
                0x0f,
                0x0f,
            ];
            encode_gcr(&header, &mut stream);
            for _ in 0..9 {
                stream.push(0x55);
            }
            // Data block
            stream.extend_from_slice(&[0xff; 5]);
            let mut block = Vec::with_capacity(260);
            block.push(0x07);
            block.extend_from_slice(data);
            let data_cks = data.iter().fold(0u8, |acc, b| acc ^ b);
            block.push(data_cks);
            block.push(0);
            block.push(0);
            encode_gcr(&block, &mut stream);
            let gap = if sector == sectors - 1 {
                tail_gap + spare % sectors
            } else {
                tail_gap
            };
            for _ in 0..gap {
                stream.push(0x55);
            }
        }
        if stream.len() != capacity {
            return Err(format!(
                "track {} stream is {} bytes, expected {}",
                track,
                stream.len(),
                capacity
            ));
        }
        self.data[halftrack][..capacity].copy_from_slice(&stream);
        self.length[halftrack] = (capacity * 8) as u16;
        Ok(())
    }

    /// Collapse the GCR streams back into a 35 track sector dump.
    pub fn export_d64(&self) -> Result<Vec<u8>, String> {
        let mut image = vec![0u8; D64_SIZE_35];
        for track in 1..=35 {
            self.decode_track(&mut image, track)?;
        }
        Ok(image)
    }

    fn decode_track(&self, image: &mut Vec<u8>, track: usize) -> Result<(), String> {
        let halftrack = 2 * track - 1;
        let sectors = sectors_in_track(track);
        let mut found = vec![false; sectors];
        let mut pos = 0u16;
        let mut scanned = 0u32;
        let mut remaining = sectors;
        while remaining > 0 {
            let start = match self.scan_sync(halftrack, pos, &mut scanned) {
                Some(p) => p,
                None => break,
            };
            pos = start;
            let header = self.read_gcr_block(halftrack, &mut pos, 10)?;
            if header[0] != 0x08 {
                continue;
            }
            let sector = header[2] as usize;
            let header_track = header[3] as usize;
            if header_track != track || sector >= sectors || found[sector] {
                continue;
            }
            // The data block follows behind the next sync
            let data_start = match self.scan_sync(halftrack, pos, &mut scanned) {
                Some(p) => p,
                None => break,
            };
            pos = data_start;
            let block = self.read_gcr_block(halftrack, &mut pos, 325)?;
            if block[0] != 0x07 {
                continue;
            }
            let offset = d64_track_offset(track) + sector * 256;
            image[offset..offset + 256].copy_from_slice(&block[1..257]);
            found[sector] = true;
            remaining -= 1;
        }
        if remaining > 0 {
            return Err(format!(
                "track {} is missing {} of {} sectors",
                track, remaining, sectors
            ));
        }
        Ok(())
    }

    /// Find the first bit after a sync run (10 or more consecutive
    /// ones) at or behind `pos`. Returns None after two revolutions.
    fn scan_sync(&self, halftrack: usize, mut pos: u16, scanned: &mut u32) -> Option<u16> {
        let length = self.length[halftrack] as u32;
        let mut ones = 0u32;
        while *scanned < 3 * length {
            let bit = self.read_bit(halftrack, pos);
            pos = if pos + 1 >= length as u16 { 0 } else { pos + 1 };
            *scanned += 1;
            if bit == 1 {
                ones += 1;
            } else {
                if ones >= 10 {
                    // The zero just consumed is the first bit of the
                    // block behind the sync
                    return Some(if pos == 0 { length as u16 - 1 } else { pos - 1 });
                }
                ones = 0;
            }
        }
        None
    }

    /// Read `count` GCR bytes starting at the given bit position and
    /// decode them.
    fn read_gcr_block(
        &self,
        halftrack: usize,
        pos: &mut u16,
        count: usize,
    ) -> Result<Vec<u8>, String> {
        let length = self.length[halftrack];
        let mut gcr = Vec::with_capacity(count);
        for _ in 0..count {
            let mut byte = 0u8;
            for _ in 0..8 {
                byte = (byte << 1) | self.read_bit(halftrack, *pos);
                *pos = if *pos + 1 >= length { 0 } else { *pos + 1 };
            }
            gcr.push(byte);
        }
        decode_gcr(&gcr)
    }
}

impl crate::core::Snapshotable for Disk {
    fn save(&self, writer: &mut crate::core::snapshot::Writer) {
        writer.write_bool(self.write_protected);
        writer.write_bool(self.modified);
        for halftrack in 1..=NUM_HALFTRACKS {
            writer.write_u16(self.length[halftrack]);
            writer.write_bytes(self.halftrack_bytes(halftrack));
        }
    }

    fn restore(
        &mut self,
        reader: &mut crate::core::snapshot::Reader,
    ) -> crate::core::snapshot::Result<()> {
        self.write_protected = reader.read_bool()?;
        self.modified = reader.read_bool()?;
        for halftrack in 1..=NUM_HALFTRACKS {
            let length = reader.read_u16()?;
            self.length[halftrack] = length;
            let bytes = (length as usize + 7) / 8;
            reader.read_bytes(&mut self.data[halftrack][..bytes])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_image() -> Vec<u8> {
        let mut image = vec![0u8; D64_SIZE_35];
        for (i, byte) in image.iter_mut().enumerate() {
            *byte = (i * 7 + i / 256) as u8;
        }
        // BAM id
        let bam = d64_track_offset(18);
        image[bam + 0xa2] = 0x46;
        image[bam + 0xa3] = 0x36;
        image
    }

    #[test]
    fn gcr_code_round_trip() {
        let src = [0x08, 0xf7, 0x11, 0x00];
        let mut encoded = Vec::new();
        encode_gcr(&src, &mut encoded);
        assert_eq!(5, encoded.len());
        assert_eq!(src.to_vec(), decode_gcr(&encoded).unwrap());
    }

    #[test]
    fn zone_layout() {
        assert_eq!(0, zone_of_halftrack(1));
        assert_eq!(0, zone_of_halftrack(33));
        assert_eq!(1, zone_of_halftrack(35));
        assert_eq!(2, zone_of_halftrack(49));
        assert_eq!(3, zone_of_halftrack(61));
        assert_eq!(3, zone_of_halftrack(84));
    }

    #[test]
    fn track_lengths_by_zone() {
        let disk = Disk::new();
        assert_eq!(7692 * 8, disk.len(1) as usize);
        assert_eq!(7142 * 8, disk.len(35) as usize);
        assert_eq!(6666 * 8, disk.len(49) as usize);
        assert_eq!(6250 * 8, disk.len(61) as usize);
    }

    #[test]
    fn d64_round_trip_is_identity() {
        let image = test_image();
        let mut disk = Disk::new();
        disk.encode_d64(&image).unwrap();
        let exported = disk.export_d64().unwrap();
        assert!(image == exported);
    }

    #[test]
    fn encoded_track_carries_sync_marks() {
        let image = test_image();
        let mut disk = Disk::new();
        disk.encode_d64(&image).unwrap();
        // Track 1 starts with a sync run
        let mut ones = 0;
        for offset in 0..40 {
            if disk.read_bit(1, offset) == 1 {
                ones += 1;
            }
        }
        assert_eq!(40, ones);
    }

    #[test]
    fn bad_image_size_is_rejected() {
        let mut disk = Disk::new();
        assert!(disk.encode_d64(&[0u8; 1234]).is_err());
    }

    #[test]
    fn bit_level_access() {
        let mut disk = Disk::new();
        disk.write_bit(1, 17, true);
        assert_eq!(1, disk.read_bit(1, 17));
        disk.write_bit(1, 17, false);
        assert_eq!(0, disk.read_bit(1, 17));
    }
}
