//! Byte-exact encodings of the MBR and GPT records.

use crate::checksum::crc32;
use crate::codec::{array, le_u32, le_u64, put_u32, put_u64};

pub const GPT_SIGNATURE: [u8; 8] = *b"EFI PART";
pub const GPT_REVISION: u32 = 0x0001_0000;
pub const GPT_HEADER_SIZE: u32 = 92;
pub const GPT_NAME_UNITS: usize = 36;

pub const MBR_SIZE: usize = 512;
pub const MBR_SIGNATURE: [u8; 2] = [0x55, 0xaa];
const MBR_ENTRIES_OFFSET: usize = 0x01be;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RawMBRPartitionEntry {
    pub status: u8,
    pub first_sector_chs: [u8; 3],
    pub ptype: u8,
    pub last_sector_chs: [u8; 3],
    pub first_sector_lba: u32,
    pub nr_sectors: u32,
}

impl RawMBRPartitionEntry {
    pub const SIZE: usize = 16;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut b = [0; Self::SIZE];
        b[0] = self.status;
        b[1..4].copy_from_slice(&self.first_sector_chs);
        b[4] = self.ptype;
        b[5..8].copy_from_slice(&self.last_sector_chs);
        put_u32(&mut b, 8, self.first_sector_lba);
        put_u32(&mut b, 12, self.nr_sectors);
        b
    }

    pub fn from_bytes(b: &[u8]) -> Self {
        RawMBRPartitionEntry {
            status: b[0],
            first_sector_chs: array(b, 1),
            ptype: b[4],
            last_sector_chs: array(b, 5),
            first_sector_lba: le_u32(b, 8),
            nr_sectors: le_u32(b, 12),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RawMBR {
    pub partition_entries: [RawMBRPartitionEntry; 4],
    pub signature: [u8; 2],
}

impl RawMBR {
    pub fn new() -> Self {
        RawMBR {
            partition_entries: [RawMBRPartitionEntry::default(); 4],
            signature: MBR_SIGNATURE,
        }
    }

    /// Boot code and disk signature are left zeroed.
    pub fn to_bytes(&self) -> [u8; MBR_SIZE] {
        let mut b = [0; MBR_SIZE];
        for (i, e) in self.partition_entries.iter().enumerate() {
            let at = MBR_ENTRIES_OFFSET + i * RawMBRPartitionEntry::SIZE;
            b[at..at + RawMBRPartitionEntry::SIZE].copy_from_slice(&e.to_bytes());
        }
        b[510..512].copy_from_slice(&self.signature);
        b
    }

    pub fn from_bytes(b: &[u8]) -> Self {
        let mut partition_entries = [RawMBRPartitionEntry::default(); 4];
        for (i, e) in partition_entries.iter_mut().enumerate() {
            *e = RawMBRPartitionEntry::from_bytes(&b[MBR_ENTRIES_OFFSET + i * 16..]);
        }

        RawMBR {
            partition_entries,
            signature: array(b, 510),
        }
    }
}

impl Default for RawMBR {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawGPTPartitionEntry {
    pub ptype: [u8; 16],
    pub ident: [u8; 16],
    pub starting_lba: u64,
    pub ending_lba: u64,
    pub attributes: u64,
    pub name: [u16; GPT_NAME_UNITS],
}

impl RawGPTPartitionEntry {
    pub const SIZE: usize = 128;

    pub fn empty() -> Self {
        RawGPTPartitionEntry {
            ptype: [0; 16],
            ident: [0; 16],
            starting_lba: 0,
            ending_lba: 0,
            attributes: 0,
            name: [0; GPT_NAME_UNITS],
        }
    }

    pub fn is_unused(&self) -> bool {
        self.ptype == [0; 16]
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut b = [0; Self::SIZE];
        b[0..16].copy_from_slice(&self.ptype);
        b[16..32].copy_from_slice(&self.ident);
        put_u64(&mut b, 32, self.starting_lba);
        put_u64(&mut b, 40, self.ending_lba);
        put_u64(&mut b, 48, self.attributes);
        for (i, unit) in self.name.iter().enumerate() {
            b[56 + i * 2..58 + i * 2].copy_from_slice(&unit.to_le_bytes());
        }
        b
    }

    pub fn from_bytes(b: &[u8]) -> Self {
        let mut name = [0; GPT_NAME_UNITS];
        for (i, unit) in name.iter_mut().enumerate() {
            *unit = u16::from_le_bytes([b[56 + i * 2], b[57 + i * 2]]);
        }

        RawGPTPartitionEntry {
            ptype: array(b, 0),
            ident: array(b, 16),
            starting_lba: le_u64(b, 32),
            ending_lba: le_u64(b, 40),
            attributes: le_u64(b, 48),
            name,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawGPTHeader {
    pub signature: [u8; 8],
    pub revision: u32,
    pub header_size: u32,
    pub header_checksum: u32,
    pub this_header_lba: u64,
    pub other_header_lba: u64,
    pub first_usable_lba: u64,
    pub last_usable_lba: u64,
    pub disk_guid: [u8; 16],
    pub partition_entries_lba: u64,
    pub nr_partition_entries: u32,
    pub partition_entry_size: u32,
    pub partition_entries_checksum: u32,
}

impl RawGPTHeader {
    pub fn new() -> Self {
        RawGPTHeader {
            signature: GPT_SIGNATURE,
            revision: GPT_REVISION,
            header_size: GPT_HEADER_SIZE,
            header_checksum: 0,
            this_header_lba: 0,
            other_header_lba: 0,
            first_usable_lba: 0,
            last_usable_lba: 0,
            disk_guid: [0; 16],
            partition_entries_lba: 0,
            nr_partition_entries: 0,
            partition_entry_size: RawGPTPartitionEntry::SIZE as u32,
            partition_entries_checksum: 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; GPT_HEADER_SIZE as usize] {
        let mut b = [0; GPT_HEADER_SIZE as usize];
        b[0..8].copy_from_slice(&self.signature);
        put_u32(&mut b, 8, self.revision);
        put_u32(&mut b, 12, self.header_size);
        put_u32(&mut b, 16, self.header_checksum);
        put_u64(&mut b, 24, self.this_header_lba);
        put_u64(&mut b, 32, self.other_header_lba);
        put_u64(&mut b, 40, self.first_usable_lba);
        put_u64(&mut b, 48, self.last_usable_lba);
        b[56..72].copy_from_slice(&self.disk_guid);
        put_u64(&mut b, 72, self.partition_entries_lba);
        put_u32(&mut b, 80, self.nr_partition_entries);
        put_u32(&mut b, 84, self.partition_entry_size);
        put_u32(&mut b, 88, self.partition_entries_checksum);
        b
    }

    pub fn from_bytes(b: &[u8]) -> Self {
        RawGPTHeader {
            signature: array(b, 0),
            revision: le_u32(b, 8),
            header_size: le_u32(b, 12),
            header_checksum: le_u32(b, 16),
            this_header_lba: le_u64(b, 24),
            other_header_lba: le_u64(b, 32),
            first_usable_lba: le_u64(b, 40),
            last_usable_lba: le_u64(b, 48),
            disk_guid: array(b, 56),
            partition_entries_lba: le_u64(b, 72),
            nr_partition_entries: le_u32(b, 80),
            partition_entry_size: le_u32(b, 84),
            partition_entries_checksum: le_u32(b, 88),
        }
    }

    /// CRC32 over the header with its own checksum field zeroed.
    pub fn compute_checksum(&self) -> u32 {
        let mut hdr = *self;
        hdr.header_checksum = 0;

        crc32(&hdr.to_bytes())
    }
}

impl Default for RawGPTHeader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_field_offsets() {
        let mut hdr = RawGPTHeader::new();
        hdr.this_header_lba = 1;
        hdr.other_header_lba = 0x1234;
        hdr.partition_entries_lba = 2;
        hdr.nr_partition_entries = 128;

        let b = hdr.to_bytes();
        assert_eq!(&b[0..8], b"EFI PART");
        assert_eq!(&b[8..12], &[0x00, 0x00, 0x01, 0x00]);
        assert_eq!(le_u32(&b, 12), 92);
        assert_eq!(le_u64(&b, 24), 1);
        assert_eq!(le_u64(&b, 32), 0x1234);
        assert_eq!(le_u64(&b, 72), 2);
        assert_eq!(le_u32(&b, 80), 128);
        assert_eq!(le_u32(&b, 84), 128);
        assert_eq!(RawGPTHeader::from_bytes(&b), hdr);
    }

    #[test]
    fn checksum_ignores_stored_checksum() {
        let mut hdr = RawGPTHeader::new();
        let before = hdr.compute_checksum();
        hdr.header_checksum = 0xdead_beef;

        assert_eq!(hdr.compute_checksum(), before);
    }

    #[test]
    fn mbr_entry_layout() {
        let mut mbr = RawMBR::new();
        mbr.partition_entries[0] = RawMBRPartitionEntry {
            status: 0,
            first_sector_chs: [0x00, 0x02, 0x00],
            ptype: 0xee,
            last_sector_chs: [0xff; 3],
            first_sector_lba: 1,
            nr_sectors: 0x0001_0000,
        };

        let b = mbr.to_bytes();
        assert_eq!(b[0x1c2], 0xee);
        assert_eq!(le_u32(&b, 0x1c6), 1);
        assert_eq!(le_u32(&b, 0x1ca), 0x0001_0000);
        assert_eq!(&b[510..], &[0x55, 0xaa]);
        assert_eq!(RawMBR::from_bytes(&b).partition_entries, mbr.partition_entries);
    }
}
