//! On-disk FAT32 records: boot sector, FSInfo and short directory entries.

use crate::codec::{array, le_u16, le_u32, put_u16, put_u32};

use super::name::ShortName;
use super::time::FatTimestamp;

pub const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xaa];

pub const FSINFO_LEAD_SIG: u32 = 0x4161_5252;
pub const FSINFO_STRUC_SIG: u32 = 0x6141_7272;
pub const FSINFO_TRAIL_SIG: u32 = 0xaa55_0000;
pub const FSINFO_UNKNOWN: u32 = 0xffff_ffff;

pub const ATTR_VOLUME_ID: u8 = 0x08;
pub const ATTR_DIRECTORY: u8 = 0x10;
pub const ATTR_ARCHIVE: u8 = 0x20;

/// Volume boot record with a FAT32 BIOS parameter block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vbr {
    pub oem_name: [u8; 8],
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub nr_fats: u8,
    pub media: u8,
    pub hidden_sectors: u32,
    pub total_sectors: u32,
    pub sectors_per_fat: u32,
    pub root_cluster: u32,
    pub fs_info_sector: u16,
    pub backup_boot_sector: u16,
    pub drive_number: u8,
    pub volume_id: u32,
    pub volume_label: [u8; 11],
    pub fs_type: [u8; 8],
}

impl Vbr {
    pub const SIZE: usize = 512;
    const JUMP: [u8; 3] = [0xeb, 0x58, 0x90];
    const EXTENDED_BOOT_SIG: u8 = 0x29;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut b = [0; Self::SIZE];
        b[0..3].copy_from_slice(&Self::JUMP);
        b[3..11].copy_from_slice(&self.oem_name);
        put_u16(&mut b, 11, self.bytes_per_sector);
        b[13] = self.sectors_per_cluster;
        put_u16(&mut b, 14, self.reserved_sectors);
        b[16] = self.nr_fats;
        // Root entry count, 16-bit sector count and 16-bit FAT size stay 0.
        b[21] = self.media;
        put_u32(&mut b, 28, self.hidden_sectors);
        put_u32(&mut b, 32, self.total_sectors);
        put_u32(&mut b, 36, self.sectors_per_fat);
        put_u32(&mut b, 44, self.root_cluster);
        put_u16(&mut b, 48, self.fs_info_sector);
        put_u16(&mut b, 50, self.backup_boot_sector);
        b[64] = self.drive_number;
        b[66] = Self::EXTENDED_BOOT_SIG;
        put_u32(&mut b, 67, self.volume_id);
        b[71..82].copy_from_slice(&self.volume_label);
        b[82..90].copy_from_slice(&self.fs_type);
        b[510..512].copy_from_slice(&BOOT_SIGNATURE);
        b
    }

    /// `None` unless the sector carries a boot signature.
    pub fn from_bytes(b: &[u8]) -> Option<Self> {
        if b[510..512] != BOOT_SIGNATURE {
            return None;
        }

        Some(Vbr {
            oem_name: array(b, 3),
            bytes_per_sector: le_u16(b, 11),
            sectors_per_cluster: b[13],
            reserved_sectors: le_u16(b, 14),
            nr_fats: b[16],
            media: b[21],
            hidden_sectors: le_u32(b, 28),
            total_sectors: le_u32(b, 32),
            sectors_per_fat: le_u32(b, 36),
            root_cluster: le_u32(b, 44),
            fs_info_sector: le_u16(b, 48),
            backup_boot_sector: le_u16(b, 50),
            drive_number: b[64],
            volume_id: le_u32(b, 67),
            volume_label: array(b, 71),
            fs_type: array(b, 82),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FsInfo {
    pub free_count: u32,
    pub next_free: u32,
}

impl FsInfo {
    pub const SIZE: usize = 512;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut b = [0; Self::SIZE];
        put_u32(&mut b, 0, FSINFO_LEAD_SIG);
        put_u32(&mut b, 484, FSINFO_STRUC_SIG);
        put_u32(&mut b, 488, self.free_count);
        put_u32(&mut b, 492, self.next_free);
        put_u32(&mut b, 508, FSINFO_TRAIL_SIG);
        b
    }

    pub fn from_bytes(b: &[u8]) -> Option<Self> {
        if le_u32(b, 0) != FSINFO_LEAD_SIG
            || le_u32(b, 484) != FSINFO_STRUC_SIG
            || le_u32(b, 508) != FSINFO_TRAIL_SIG
        {
            return None;
        }

        Some(FsInfo {
            free_count: le_u32(b, 488),
            next_free: le_u32(b, 492),
        })
    }
}

/// 8.3 directory entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: ShortName,
    pub attributes: u8,
    pub created: FatTimestamp,
    pub accessed_date: u16,
    pub written: FatTimestamp,
    pub first_cluster: u32,
    pub size: u32,
}

impl DirEntry {
    pub const SIZE: usize = 32;

    pub fn directory(name: ShortName, first_cluster: u32, stamp: FatTimestamp) -> Self {
        DirEntry {
            name,
            attributes: ATTR_DIRECTORY,
            created: stamp,
            accessed_date: stamp.date,
            written: stamp,
            first_cluster,
            size: 0,
        }
    }

    pub fn file(name: ShortName, first_cluster: u32, size: u32, stamp: FatTimestamp) -> Self {
        DirEntry {
            name,
            attributes: ATTR_ARCHIVE,
            created: stamp,
            accessed_date: stamp.date,
            written: stamp,
            first_cluster,
            size,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.attributes & ATTR_DIRECTORY != 0
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut b = [0; Self::SIZE];
        b[0..11].copy_from_slice(self.name.as_bytes());
        b[11] = self.attributes;
        put_u16(&mut b, 14, self.created.time);
        put_u16(&mut b, 16, self.created.date);
        put_u16(&mut b, 18, self.accessed_date);
        put_u16(&mut b, 20, (self.first_cluster >> 16) as u16);
        put_u16(&mut b, 22, self.written.time);
        put_u16(&mut b, 24, self.written.date);
        put_u16(&mut b, 26, self.first_cluster as u16);
        put_u32(&mut b, 28, self.size);
        b
    }

    pub fn from_bytes(b: &[u8]) -> Self {
        DirEntry {
            name: ShortName::from_raw(array(b, 0)),
            attributes: b[11],
            created: FatTimestamp {
                time: le_u16(b, 14),
                date: le_u16(b, 16),
            },
            accessed_date: le_u16(b, 18),
            written: FatTimestamp {
                time: le_u16(b, 22),
                date: le_u16(b, 24),
            },
            first_cluster: (le_u16(b, 20) as u32) << 16 | le_u16(b, 26) as u32,
            size: le_u32(b, 28),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_entry_splits_cluster() {
        let stamp = FatTimestamp {
            time: 0x1234,
            date: 0x5678,
        };
        let name = ShortName::parse("BOOTX64.EFI").unwrap();
        let entry = DirEntry::file(name, 0x0003_0005, 1000, stamp);

        let b = entry.to_bytes();
        assert_eq!(&b[..11], b"BOOTX64 EFI");
        assert_eq!(b[11], ATTR_ARCHIVE);
        assert_eq!(le_u16(&b, 20), 0x0003);
        assert_eq!(le_u16(&b, 26), 0x0005);
        assert_eq!(le_u32(&b, 28), 1000);
        assert_eq!(le_u16(&b, 22), 0x1234);
        assert_eq!(le_u16(&b, 24), 0x5678);
        assert_eq!(DirEntry::from_bytes(&b), entry);
    }

    #[test]
    fn fs_info_signatures() {
        let info = FsInfo {
            free_count: FSINFO_UNKNOWN,
            next_free: 5,
        };
        let mut b = info.to_bytes();

        assert_eq!(&b[0..4], b"RRaA");
        assert_eq!(&b[484..488], b"rrAa");
        assert_eq!(&b[508..512], &[0x00, 0x00, 0x55, 0xaa]);
        assert_eq!(FsInfo::from_bytes(&b), Some(info));

        b[0] = 0;
        assert_eq!(FsInfo::from_bytes(&b), None);
    }
}
