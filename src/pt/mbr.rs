use std::fmt::Display;

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use super::raw::{RawMBR, RawMBRPartitionEntry, MBR_SIGNATURE};
use crate::image::{Image, ImageError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryStatus {
    Bootable,
    NotBootable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
pub enum PartitionType {
    Empty = 0x00,
    ProtectiveMBR = 0xee,
    Unknown = 0xff,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CHS {
    head: usize,
    sector: usize,
    cylinder: usize,
}

const HEADS_PER_CYLINDER: usize = 16;
const SECTORS_PER_TRACK: usize = 63;

impl CHS {
    pub fn new_zero() -> Self {
        CHS {
            head: 0,
            sector: 0,
            cylinder: 0,
        }
    }

    /// All three bytes saturated, as required for the protective entry's end.
    pub fn new_max() -> Self {
        CHS {
            head: 0xff,
            sector: 0x3f,
            cylinder: 0x3ff,
        }
    }

    pub fn from_raw(bytes: &[u8; 3]) -> Self {
        CHS {
            head: bytes[0] as usize,
            sector: (bytes[1] & 0x3f) as usize,
            cylinder: (((bytes[1] as usize) & 0xc0) << 2) | bytes[2] as usize,
        }
    }

    fn saturate<T>(v: T, max: T) -> T
    where
        T: PartialOrd,
    {
        if v > max {
            max
        } else {
            v
        }
    }

    pub fn from_lba(lba: usize) -> Self {
        let cylinder = Self::saturate(lba / (HEADS_PER_CYLINDER * SECTORS_PER_TRACK), 0x3ff);
        let head = Self::saturate((lba / SECTORS_PER_TRACK) % HEADS_PER_CYLINDER, 0xff);
        let sector = Self::saturate((lba % SECTORS_PER_TRACK) + 1, 0x3f);

        CHS {
            head,
            sector,
            cylinder,
        }
    }

    pub fn to_bytes(&self) -> [u8; 3] {
        [
            self.head as u8,
            ((self.sector & 0x3f) | ((self.cylinder & 0x300) >> 2)) as u8,
            self.cylinder as u8,
        ]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartitionEntry {
    pub status: EntryStatus,
    pub ptype: PartitionType,
    pub first_sector: CHS,
    pub last_sector: CHS,
    pub first_sector_lba: u32,
    pub nr_sectors: u32,
}

impl PartitionEntry {
    pub fn new_empty() -> Self {
        PartitionEntry {
            status: EntryStatus::NotBootable,
            ptype: PartitionType::Empty,
            first_sector: CHS::new_zero(),
            last_sector: CHS::new_zero(),
            first_sector_lba: 0,
            nr_sectors: 0,
        }
    }

    pub fn to_raw(&self) -> RawMBRPartitionEntry {
        RawMBRPartitionEntry {
            status: match self.status {
                EntryStatus::Bootable => 0x80,
                EntryStatus::NotBootable => 0x00,
            },
            first_sector_chs: self.first_sector.to_bytes(),
            ptype: self.ptype as u8,
            last_sector_chs: self.last_sector.to_bytes(),
            first_sector_lba: self.first_sector_lba,
            nr_sectors: self.nr_sectors,
        }
    }

    pub fn from_raw(raw: RawMBRPartitionEntry) -> PartitionEntry {
        PartitionEntry {
            status: if (raw.status & 0x80) == 0x80 {
                EntryStatus::Bootable
            } else {
                EntryStatus::NotBootable
            },
            ptype: PartitionType::from_u8(raw.ptype).unwrap_or(PartitionType::Unknown),
            first_sector: CHS::from_raw(&raw.first_sector_chs),
            last_sector: CHS::from_raw(&raw.last_sector_chs),
            first_sector_lba: raw.first_sector_lba,
            nr_sectors: raw.nr_sectors,
        }
    }
}

#[derive(Debug)]
pub struct MBR {
    pub partition_table: [PartitionEntry; 4],
}

impl MBR {
    /// A single 0xEE entry covering everything after LBA 0.
    pub fn new_protective(nr_blocks: u64) -> Self {
        let pe = PartitionEntry {
            status: EntryStatus::NotBootable,
            ptype: PartitionType::ProtectiveMBR,
            first_sector: CHS::from_lba(1),
            last_sector: CHS::new_max(),
            first_sector_lba: 1,
            nr_sectors: u32::try_from(nr_blocks.saturating_sub(1)).unwrap_or(u32::MAX),
        };

        MBR {
            partition_table: [
                pe,
                PartitionEntry::new_empty(),
                PartitionEntry::new_empty(),
                PartitionEntry::new_empty(),
            ],
        }
    }

    pub fn to_raw(&self) -> RawMBR {
        let mut mbr = RawMBR::new();

        for i in 0..4 {
            mbr.partition_entries[i] = self.partition_table[i].to_raw();
        }

        mbr
    }

    pub fn write(&self, image: &mut Image) -> Result<(), ImageError> {
        image.write_blocks(0, &self.to_raw().to_bytes())?;

        log::debug!(
            "protective MBR written, {} sectors",
            self.partition_table[0].nr_sectors
        );

        Ok(())
    }

    pub fn read(image: &Image) -> Result<Option<Self>, ImageError> {
        let block0 = image.get_blocks(0, 1)?;
        let raw = RawMBR::from_bytes(block0);

        if raw.signature != MBR_SIGNATURE {
            return Ok(None);
        }

        Ok(Some(MBR {
            partition_table: raw.partition_entries.map(PartitionEntry::from_raw),
        }))
    }

    pub fn is_protective(&self) -> bool {
        self.partition_table[0].ptype == PartitionType::ProtectiveMBR
    }
}

impl Display for MBR {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, pe) in self.partition_table.iter().enumerate() {
            if pe.ptype == PartitionType::Empty {
                continue;
            }

            writeln!(
                f,
                "  {}: {:?} start={} sectors={}",
                i, pe.ptype, pe.first_sector_lba, pe.nr_sectors
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protective_record() {
        let mut image = Image::in_memory(16, 512);
        image.get_blocks_mut(0, 1).unwrap().fill(0xcc);

        MBR::new_protective(16).write(&mut image).unwrap();

        let block0 = image.get_blocks(0, 1).unwrap();
        assert!(block0[..0x1be].iter().all(|b| *b == 0));
        assert_eq!(&block0[0x1be..0x1ce], &[
            0x00, 0x00, 0x02, 0x00, 0xee, 0xff, 0xff, 0xff, 1, 0, 0, 0, 15, 0, 0, 0
        ]);
        assert!(block0[0x1ce..510].iter().all(|b| *b == 0));
        assert_eq!(&block0[510..], &[0x55, 0xaa]);

        let mbr = MBR::read(&image).unwrap().unwrap();
        assert!(mbr.is_protective());
        assert_eq!(mbr.partition_table[0].nr_sectors, 15);
        assert_eq!(mbr.partition_table[0].last_sector, CHS::new_max());
        assert_eq!(mbr.partition_table[1].ptype, PartitionType::Empty);
    }

    #[test]
    fn oversized_disk_saturates() {
        let mbr = MBR::new_protective(1 << 40);

        assert_eq!(mbr.partition_table[0].nr_sectors, u32::MAX);
    }

    #[test]
    fn missing_signature() {
        let image = Image::in_memory(1, 512);

        assert!(MBR::read(&image).unwrap().is_none());
    }

    #[test]
    fn chs_round_trip() {
        let chs = CHS::from_lba(100_000);

        assert_eq!(CHS::from_raw(&chs.to_bytes()), chs);
        assert_eq!(CHS::from_lba(1).to_bytes(), [0x00, 0x02, 0x00]);
    }
}
