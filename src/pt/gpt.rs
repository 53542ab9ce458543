use std::fmt::Display;

use super::{
    mbr::MBR,
    raw::{RawGPTHeader, RawGPTPartitionEntry, GPT_NAME_UNITS, GPT_SIGNATURE},
};
use crate::checksum::crc32;
use crate::guid::{Guid, GuidGenerator};
use crate::image::{Image, ImageError};
use crate::layout::{LayoutPlan, GPT_ENTRY_COUNT, GPT_ENTRY_SIZE};
use uuid::uuid;

const EFI_SYSTEM_GUID: Guid = Guid::from_uuid(uuid!("C12A7328-F81F-11D2-BA4B-00A0C93EC93B"));
const LINUX_FS_GUID: Guid = Guid::from_uuid(uuid!("0FC63DAF-8483-4772-8E79-3D69D8477DE4"));

/// Error while reading back a GUID partition table.
#[derive(Debug, displaydoc::Display, thiserror::Error)]
pub enum GptError {
    /// {0}
    Image(#[from] ImageError),
    /// No protective MBR found
    NoProtectiveMbr,
    /// No GPT header signature at LBA {0}
    BadSignature(u64),
    /// Header checksum mismatch at LBA {0}
    HeaderChecksum(u64),
    /// Partition table checksum mismatch for header at LBA {0}
    TableChecksum(u64),
    /// Unsupported partition table geometry in header at LBA {0}
    BadGeometry(u64),
    /// Primary and backup GPT disagree
    Mismatch,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartitionType {
    Unused,
    EFISystem,
    LinuxFilesystem,
    Other(Guid),
}

impl From<PartitionType> for Guid {
    fn from(t: PartitionType) -> Self {
        match t {
            PartitionType::Unused => Guid::from_uuid(uuid::Uuid::nil()),
            PartitionType::EFISystem => EFI_SYSTEM_GUID,
            PartitionType::LinuxFilesystem => LINUX_FS_GUID,
            PartitionType::Other(g) => g,
        }
    }
}

impl From<Guid> for PartitionType {
    fn from(g: Guid) -> Self {
        if g.is_nil() {
            PartitionType::Unused
        } else if g == EFI_SYSTEM_GUID {
            PartitionType::EFISystem
        } else if g == LINUX_FS_GUID {
            PartitionType::LinuxFilesystem
        } else {
            PartitionType::Other(g)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partition {
    pub partition_type: PartitionType,
    pub unique_guid: Guid,
    pub first_lba: u64,
    pub last_lba: u64,
    pub attributes: u64,
    pub name: String,
}

impl Partition {
    fn to_raw(&self) -> RawGPTPartitionEntry {
        let mut name = [0; GPT_NAME_UNITS];
        for (unit, c) in name.iter_mut().zip(self.name.encode_utf16()) {
            *unit = c;
        }

        RawGPTPartitionEntry {
            ptype: Guid::from(self.partition_type).to_bytes_le(),
            ident: self.unique_guid.to_bytes_le(),
            starting_lba: self.first_lba,
            ending_lba: self.last_lba,
            attributes: self.attributes,
            name,
        }
    }

    fn from_raw(raw: &RawGPTPartitionEntry) -> Self {
        let len = raw.name.iter().position(|u| *u == 0).unwrap_or(GPT_NAME_UNITS);

        Partition {
            partition_type: Guid::from_bytes_le(raw.ptype).into(),
            unique_guid: Guid::from_bytes_le(raw.ident),
            first_lba: raw.starting_lba,
            last_lba: raw.ending_lba,
            attributes: raw.attributes,
            name: String::from_utf16_lossy(&raw.name[..len]),
        }
    }
}

#[derive(Debug)]
pub struct GPT {
    pub disk_guid: Guid,
    pub partitions: Vec<Partition>,
}

impl GPT {
    /// The ESP and data partition placed by `plan`, each with a fresh GUID.
    pub fn for_layout(plan: &LayoutPlan, guids: &mut GuidGenerator) -> Self {
        let mut gpt = GPT {
            disk_guid: guids.new_guid(),
            partitions: Vec::new(),
        };

        gpt.add_partition(Partition {
            partition_type: PartitionType::EFISystem,
            unique_guid: guids.new_guid(),
            first_lba: plan.esp_start,
            last_lba: plan.esp_end(),
            attributes: 0,
            name: "EFI SYSTEM".into(),
        });

        if plan.data_lbas > 0 {
            gpt.add_partition(Partition {
                partition_type: PartitionType::LinuxFilesystem,
                unique_guid: guids.new_guid(),
                first_lba: plan.data_start,
                last_lba: plan.data_end(),
                attributes: 0,
                name: "LINUX DATA".into(),
            });
        }

        gpt
    }

    pub fn add_partition(&mut self, p: Partition) {
        self.partitions.push(p)
    }

    /// All `GPT_ENTRY_COUNT` slots, unused ones zeroed.
    fn entries_bytes(&self) -> Vec<u8> {
        let mut table = vec![0; GPT_ENTRY_COUNT as usize * GPT_ENTRY_SIZE as usize];

        for (slot, p) in table
            .chunks_exact_mut(GPT_ENTRY_SIZE as usize)
            .zip(self.partitions.iter())
        {
            slot[..RawGPTPartitionEntry::SIZE].copy_from_slice(&p.to_raw().to_bytes());
        }

        table
    }

    fn build_header(
        &self,
        plan: &LayoutPlan,
        this_block_idx: u64,
        alternative_block_idx: u64,
        entries_start_idx: u64,
        entries: &[u8],
    ) -> RawGPTHeader {
        let mut hdr = RawGPTHeader::new();

        hdr.this_header_lba = this_block_idx;
        hdr.other_header_lba = alternative_block_idx;
        hdr.first_usable_lba = plan.first_usable_lba();
        hdr.last_usable_lba = plan.last_usable_lba();
        hdr.disk_guid = self.disk_guid.to_bytes_le();
        hdr.partition_entries_lba = entries_start_idx;
        hdr.nr_partition_entries = GPT_ENTRY_COUNT;
        hdr.partition_entry_size = GPT_ENTRY_SIZE;
        hdr.partition_entries_checksum = crc32(entries);
        hdr.header_checksum = hdr.compute_checksum();

        hdr
    }

    /// Primary header and table at LBA 1 and 2, backup table and header at
    /// the end of the disk.
    pub fn write(&self, image: &mut Image, plan: &LayoutPlan) -> Result<(), ImageError> {
        let entries = self.entries_bytes();

        let primary_header_block = 1;
        let alt_header_block = plan.backup_header_lba();

        let primary = self.build_header(
            plan,
            primary_header_block,
            alt_header_block,
            primary_header_block + 1,
            &entries,
        );
        image.write_blocks(primary.this_header_lba, &primary.to_bytes())?;
        image.write_blocks(primary.partition_entries_lba, &entries)?;

        let backup = self.build_header(
            plan,
            alt_header_block,
            primary_header_block,
            plan.backup_table_lba(),
            &entries,
        );
        image.write_blocks(backup.partition_entries_lba, &entries)?;
        image.write_blocks(backup.this_header_lba, &backup.to_bytes())?;

        log::debug!(
            "GPT written: disk {}, table crc {:#010x}, backup header at LBA {}",
            self.disk_guid,
            primary.partition_entries_checksum,
            alt_header_block
        );

        Ok(())
    }

    /// Reads one header and its table, checking both checksums.
    pub fn read_header(
        image: &Image,
        lba: u64,
    ) -> Result<(RawGPTHeader, Vec<u8>), GptError> {
        let hdr = RawGPTHeader::from_bytes(image.get_blocks(lba, 1)?);

        if hdr.signature != GPT_SIGNATURE {
            return Err(GptError::BadSignature(lba));
        }
        if hdr.this_header_lba != lba
            || hdr.partition_entry_size as usize != RawGPTPartitionEntry::SIZE
            || hdr.nr_partition_entries != GPT_ENTRY_COUNT
        {
            return Err(GptError::BadGeometry(lba));
        }
        if hdr.compute_checksum() != hdr.header_checksum {
            return Err(GptError::HeaderChecksum(lba));
        }

        let entries_size = hdr.nr_partition_entries as usize * hdr.partition_entry_size as usize;
        let block_size = image.block_size();
        let nr_entry_blocks = entries_size.div_ceil(block_size) as u64;

        let entries =
            image.get_blocks(hdr.partition_entries_lba, nr_entry_blocks)?[..entries_size].to_vec();
        if crc32(&entries) != hdr.partition_entries_checksum {
            return Err(GptError::TableChecksum(lba));
        }

        Ok((hdr, entries))
    }

    pub fn read(image: &Image) -> Result<GPT, GptError> {
        match MBR::read(image)? {
            Some(mbr) if mbr.is_protective() => {}
            _ => return Err(GptError::NoProtectiveMbr),
        }

        let (primary, entries) = Self::read_header(image, 1)?;
        let (backup, backup_entries) = Self::read_header(image, primary.other_header_lba)?;

        if backup.other_header_lba != primary.this_header_lba
            || backup.disk_guid != primary.disk_guid
            || backup.partition_entries_checksum != primary.partition_entries_checksum
            || backup_entries != entries
        {
            return Err(GptError::Mismatch);
        }

        let partitions = entries
            .chunks_exact(primary.partition_entry_size as usize)
            .map(RawGPTPartitionEntry::from_bytes)
            .filter(|e| !e.is_unused())
            .map(|e| Partition::from_raw(&e))
            .collect();

        Ok(GPT {
            disk_guid: Guid::from_bytes_le(primary.disk_guid),
            partitions,
        })
    }
}

impl Display for GPT {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "GUID: {}", self.disk_guid)?;

        for (i, p) in self.partitions.iter().enumerate() {
            writeln!(
                f,
                "  {}: {:?} {} LBA {}..={} \"{}\"",
                i, p.partition_type, p.unique_guid, p.first_lba, p.last_lba, p.name
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::le_u32;

    fn build() -> (Image, LayoutPlan, GPT) {
        let plan = LayoutPlan::standard().unwrap();
        let mut image = Image::in_memory(plan.total_lbas, plan.lba_size as usize);
        let gpt = GPT::for_layout(&plan, &mut GuidGenerator::from_seed(1));

        MBR::new_protective(plan.total_lbas).write(&mut image).unwrap();
        gpt.write(&mut image, &plan).unwrap();

        (image, plan, gpt)
    }

    #[test]
    fn primary_header_fields() {
        let (image, plan, gpt) = build();
        let (hdr, entries) = GPT::read_header(&image, 1).unwrap();

        assert_eq!(hdr.this_header_lba, 1);
        assert_eq!(hdr.other_header_lba, plan.total_lbas - 1);
        assert_eq!(hdr.first_usable_lba, 34);
        assert_eq!(hdr.last_usable_lba, plan.total_lbas - 34);
        assert_eq!(hdr.partition_entries_lba, 2);
        assert_eq!(hdr.disk_guid, gpt.disk_guid.to_bytes_le());
        assert_eq!(hdr.partition_entries_checksum, crc32(&entries));

        // Checksum covers exactly the 92 header bytes.
        let mut raw = image.get_blocks(1, 1).unwrap()[..92].to_vec();
        let stored = le_u32(&raw, 16);
        raw[16..20].fill(0);
        assert_eq!(crc32(&raw), stored);
        assert!(image.get_blocks(1, 1).unwrap()[92..].iter().all(|b| *b == 0));
    }

    #[test]
    fn backup_mirrors_primary() {
        let (image, plan, _) = build();
        let (primary, entries) = GPT::read_header(&image, 1).unwrap();
        let (backup, backup_entries) = GPT::read_header(&image, plan.total_lbas - 1).unwrap();

        assert_eq!(entries, backup_entries);
        assert_eq!(backup.this_header_lba, primary.other_header_lba);
        assert_eq!(backup.other_header_lba, primary.this_header_lba);
        assert_eq!(backup.partition_entries_lba, plan.total_lbas - 1 - 32);
        assert_eq!(
            backup.partition_entries_checksum,
            primary.partition_entries_checksum
        );
        assert_ne!(backup.header_checksum, primary.header_checksum);
    }

    #[test]
    fn partition_entries() {
        let (image, plan, gpt) = build();
        let read = GPT::read(&image).unwrap();

        assert_eq!(read.disk_guid, gpt.disk_guid);
        assert_eq!(read.partitions, gpt.partitions);
        assert_eq!(read.partitions.len(), 2);

        let esp = &read.partitions[0];
        assert_eq!(esp.partition_type, PartitionType::EFISystem);
        assert_eq!(esp.first_lba, plan.esp_start);
        assert_eq!(esp.last_lba, plan.esp_start + plan.esp_lbas - 1);
        assert_eq!(esp.name, "EFI SYSTEM");

        let data = &read.partitions[1];
        assert_eq!(data.partition_type, PartitionType::LinuxFilesystem);
        assert_eq!(data.first_lba, plan.data_start);
        assert_eq!(data.last_lba, plan.data_start + plan.data_lbas - 1);
        assert_ne!(esp.unique_guid, data.unique_guid);
        assert_eq!(esp.unique_guid.version(), 4);
    }

    #[test]
    fn esp_type_guid_on_disk() {
        let (image, _, _) = build();
        let table = image.get_blocks(2, 1).unwrap();

        assert_eq!(
            &table[..16],
            &[
                0x28, 0x73, 0x2A, 0xC1, 0x1F, 0xF8, 0xD2, 0x11, 0xBA, 0x4B, 0x00, 0xA0, 0xC9,
                0x3E, 0xC9, 0x3B
            ]
        );
        assert_eq!(&table[56..58], &[b'E', 0]);
    }

    #[test]
    fn detects_corruption() {
        let (mut image, plan, _) = build();
        image.get_blocks_mut(2, 1).unwrap()[40] ^= 0xff;
        assert!(matches!(GPT::read(&image), Err(GptError::TableChecksum(1))));

        let (mut image, _, _) = build();
        image.get_blocks_mut(plan.total_lbas - 1, 1).unwrap()[24] ^= 0x01;
        assert!(GPT::read(&image).is_err());

        let mut image = Image::in_memory(plan.total_lbas, 512);
        assert!(matches!(GPT::read(&image), Err(GptError::NoProtectiveMbr)));
        MBR::new_protective(plan.total_lbas).write(&mut image).unwrap();
        assert!(matches!(GPT::read(&image), Err(GptError::BadSignature(1))));
    }
}
