use super::{
    name::ShortName,
    raw::{DirEntry, FsInfo, Vbr, ATTR_VOLUME_ID, FSINFO_UNKNOWN},
    time::FatTimestamp,
    Fat32Error, BACKUP_BOOT_SECTOR, BOOT_CLUSTER, EFI_CLUSTER, END_OF_CHAIN, FIRST_FREE_CLUSTER,
    FS_INFO_SECTOR, MEDIA_FIXED, NR_FATS, RESERVED_SECTORS, ROOT_CLUSTER,
};
use crate::guid::GuidGenerator;
use crate::image::Image;
use crate::layout::LayoutPlan;

const FAT_ENTRY_SIZE: u64 = 4;

/// Where the volume's regions sit on the disk, derived once from the plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    pub start_lba: u64,
    pub lba_size: u64,
    pub total_sectors: u32,
    pub reserved_sectors: u16,
    pub nr_fats: u8,
    pub sectors_per_fat: u32,
}

impl Geometry {
    /// The FATs fill the rest of the first alignment unit, so the data region
    /// starts aligned.
    pub fn for_layout(plan: &LayoutPlan) -> Result<Self, Fat32Error> {
        let reserved = RESERVED_SECTORS as u64;
        if plan.align_lbas <= reserved {
            return Err(Fat32Error::TooSmall);
        }

        let geometry = Geometry {
            start_lba: plan.esp_start,
            lba_size: plan.lba_size,
            total_sectors: u32::try_from(plan.esp_lbas).map_err(|_| Fat32Error::TooSmall)?,
            reserved_sectors: RESERVED_SECTORS,
            nr_fats: NR_FATS,
            sectors_per_fat: ((plan.align_lbas - reserved) / NR_FATS as u64) as u32,
        };

        if geometry.sectors_per_fat == 0 || geometry.last_cluster() < FIRST_FREE_CLUSTER - 1 {
            return Err(Fat32Error::TooSmall);
        }

        Ok(geometry)
    }

    pub fn fat_lba(&self, copy: u8) -> u64 {
        self.start_lba + self.reserved_sectors as u64 + copy as u64 * self.sectors_per_fat as u64
    }

    pub fn data_lba(&self) -> u64 {
        self.fat_lba(self.nr_fats)
    }

    pub fn cluster_lba(&self, cluster: u32) -> u64 {
        self.data_lba() + (cluster as u64 - ROOT_CLUSTER as u64)
    }

    fn data_sectors(&self) -> u64 {
        (self.start_lba + self.total_sectors as u64).saturating_sub(self.data_lba())
    }

    /// Highest cluster both the data region and the FAT can address.
    pub fn last_cluster(&self) -> u32 {
        let fat_slots = self.sectors_per_fat as u64 * self.lba_size / FAT_ENTRY_SIZE;
        let by_fat = fat_slots.saturating_sub(1);
        let by_data = self.data_sectors() + ROOT_CLUSTER as u64 - 1;

        by_fat.min(by_data).min(u32::MAX as u64 - 1) as u32
    }

    pub fn entries_per_directory(&self) -> usize {
        self.lba_size as usize / DirEntry::SIZE
    }
}

/// Result of scanning a directory for a name.
#[derive(Debug)]
pub(super) enum Slot {
    Found(DirEntry),
    Vacant(usize),
    Full,
}

pub struct Fat32Volume<'a> {
    image: &'a mut Image,
    geometry: Geometry,
}

impl<'a> Fat32Volume<'a> {
    /// Writes an empty volume holding `/EFI/BOOT`.
    pub fn format(
        image: &'a mut Image,
        plan: &LayoutPlan,
        guids: &mut GuidGenerator,
    ) -> Result<Self, Fat32Error> {
        let geometry = Geometry::for_layout(plan)?;
        let mut volume = Fat32Volume { image, geometry };

        volume.write_boot_region(guids.next_u32())?;
        volume.write_fats()?;
        volume.write_initial_tree(FatTimestamp::now())?;

        log::info!(
            "FAT32 volume formatted at LBA {}: {} sectors, {} per FAT, data at LBA {}",
            geometry.start_lba,
            geometry.total_sectors,
            geometry.sectors_per_fat,
            geometry.data_lba()
        );

        Ok(volume)
    }

    /// Attaches to a volume previously written by [`Fat32Volume::format`].
    pub fn open(image: &'a mut Image, plan: &LayoutPlan) -> Result<Self, Fat32Error> {
        let geometry = Geometry::for_layout(plan)?;
        let vbr = Vbr::from_bytes(image.get_blocks(geometry.start_lba, 1)?)
            .ok_or(Fat32Error::NotFormatted)?;

        if vbr.bytes_per_sector as u64 != geometry.lba_size
            || vbr.sectors_per_cluster != 1
            || vbr.reserved_sectors != geometry.reserved_sectors
            || vbr.nr_fats != geometry.nr_fats
            || vbr.sectors_per_fat != geometry.sectors_per_fat
            || vbr.root_cluster != ROOT_CLUSTER
            || &vbr.fs_type != b"FAT32   "
        {
            return Err(Fat32Error::NotFormatted);
        }

        let volume = Fat32Volume { image, geometry };
        volume.fs_info()?;

        Ok(volume)
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    fn build_vbr(&self, volume_id: u32) -> Vbr {
        Vbr {
            oem_name: *b"BOOTIMG ",
            bytes_per_sector: self.geometry.lba_size as u16,
            sectors_per_cluster: 1,
            reserved_sectors: self.geometry.reserved_sectors,
            nr_fats: self.geometry.nr_fats,
            media: MEDIA_FIXED,
            hidden_sectors: self.geometry.start_lba as u32,
            total_sectors: self.geometry.total_sectors,
            sectors_per_fat: self.geometry.sectors_per_fat,
            root_cluster: ROOT_CLUSTER,
            fs_info_sector: FS_INFO_SECTOR,
            backup_boot_sector: BACKUP_BOOT_SECTOR,
            drive_number: 0x80,
            volume_id,
            volume_label: *b"NO NAME    ",
            fs_type: *b"FAT32   ",
        }
    }

    /// VBR and FSInfo, then the identical backup pair.
    fn write_boot_region(&mut self, volume_id: u32) -> Result<(), Fat32Error> {
        let vbr = self.build_vbr(volume_id).to_bytes();
        let start = self.geometry.start_lba;

        for base in [start, start + BACKUP_BOOT_SECTOR as u64] {
            self.image.write_blocks(base, &vbr)?;
        }

        self.set_fs_info(FsInfo {
            free_count: FSINFO_UNKNOWN,
            next_free: FIRST_FREE_CLUSTER,
        })
    }

    fn write_fats(&mut self) -> Result<(), Fat32Error> {
        let mut head = Vec::with_capacity(5 * FAT_ENTRY_SIZE as usize);
        for entry in [
            0xffff_ff00 | MEDIA_FIXED as u32,
            END_OF_CHAIN,
            END_OF_CHAIN,
            END_OF_CHAIN,
            END_OF_CHAIN,
        ] {
            head.extend_from_slice(&entry.to_le_bytes());
        }

        for copy in 0..self.geometry.nr_fats {
            self.image.write_blocks(self.geometry.fat_lba(copy), &head)?;
        }

        Ok(())
    }

    fn write_initial_tree(&mut self, stamp: FatTimestamp) -> Result<(), Fat32Error> {
        let efi = ShortName::from_raw(*b"EFI        ");
        let boot = ShortName::from_raw(*b"BOOT       ");

        self.write_directory(
            ROOT_CLUSTER,
            &[DirEntry::directory(efi, EFI_CLUSTER, stamp)],
        )?;
        self.write_directory(
            EFI_CLUSTER,
            &[
                DirEntry::directory(ShortName::DOT, EFI_CLUSTER, stamp),
                DirEntry::directory(ShortName::DOT_DOT, 0, stamp),
                DirEntry::directory(boot, BOOT_CLUSTER, stamp),
            ],
        )?;
        self.write_directory(
            BOOT_CLUSTER,
            &[
                DirEntry::directory(ShortName::DOT, BOOT_CLUSTER, stamp),
                DirEntry::directory(ShortName::DOT_DOT, EFI_CLUSTER, stamp),
            ],
        )
    }

    pub fn fs_info(&self) -> Result<FsInfo, Fat32Error> {
        let lba = self.geometry.start_lba + FS_INFO_SECTOR as u64;

        FsInfo::from_bytes(self.image.get_blocks(lba, 1)?).ok_or(Fat32Error::BadFsInfo)
    }

    /// Updates the primary FSInfo and its backup after the backup VBR.
    pub(super) fn set_fs_info(&mut self, info: FsInfo) -> Result<(), Fat32Error> {
        let bytes = info.to_bytes();
        let start = self.geometry.start_lba + FS_INFO_SECTOR as u64;

        for lba in [start, start + BACKUP_BOOT_SECTOR as u64] {
            self.image.write_blocks(lba, &bytes)?;
        }

        Ok(())
    }

    fn fat_position(&self, copy: u8, cluster: u32) -> (u64, usize) {
        let byte = cluster as u64 * FAT_ENTRY_SIZE;
        let lba = self.geometry.fat_lba(copy) + byte / self.geometry.lba_size;

        (lba, (byte % self.geometry.lba_size) as usize)
    }

    pub fn fat_entry(&self, copy: u8, cluster: u32) -> Result<u32, Fat32Error> {
        let (lba, offset) = self.fat_position(copy, cluster);
        let block = self.image.get_blocks(lba, 1)?;

        Ok(crate::codec::le_u32(block, offset))
    }

    /// Writes the same value into every FAT copy.
    fn set_fat_entry(&mut self, cluster: u32, value: u32) -> Result<(), Fat32Error> {
        for copy in 0..self.geometry.nr_fats {
            let (lba, offset) = self.fat_position(copy, cluster);
            let block = self.image.get_blocks_mut(lba, 1)?;

            crate::codec::put_u32(block, offset, value);
        }

        Ok(())
    }

    /// First cluster of a free run of `count` clusters at the FSInfo hint.
    /// Changes nothing on disk.
    pub(super) fn reserve(&self, count: u32) -> Result<u32, Fat32Error> {
        let start = match self.fs_info()?.next_free {
            n if n < FIRST_FREE_CLUSTER || n == FSINFO_UNKNOWN => FIRST_FREE_CLUSTER,
            n => n,
        };
        if count == 0 {
            return Ok(start);
        }

        let last = start
            .checked_add(count - 1)
            .filter(|last| *last <= self.geometry.last_cluster())
            .ok_or(Fat32Error::VolumeFull(count))?;

        for cluster in start..=last {
            if self.fat_entry(0, cluster)? != 0 {
                return Err(Fat32Error::ClusterInUse(cluster));
            }
        }

        Ok(start)
    }

    /// Links `count` consecutive clusters starting at the FSInfo hint and
    /// advances the hint past them. An empty chain starts at cluster 0.
    pub(super) fn allocate_chain(&mut self, count: u32) -> Result<u32, Fat32Error> {
        if count == 0 {
            return Ok(0);
        }

        let start = self.reserve(count)?;
        let last = start + (count - 1);

        for cluster in start..=last {
            let next = if cluster == last {
                END_OF_CHAIN
            } else {
                cluster + 1
            };
            self.set_fat_entry(cluster, next)?;
        }

        let mut info = self.fs_info()?;
        info.next_free = last + 1;
        self.set_fs_info(info)?;

        log::debug!("allocated clusters {}..={}", start, last);

        Ok(start)
    }

    /// Frees a chain returned by `allocate_chain`, rewinding the hint when
    /// it was the most recent allocation.
    pub(super) fn release_chain(&mut self, first: u32, count: u32) -> Result<(), Fat32Error> {
        if count == 0 {
            return Ok(());
        }

        for cluster in first..first + count {
            self.set_fat_entry(cluster, 0)?;
        }

        let mut info = self.fs_info()?;
        if info.next_free == first + count {
            info.next_free = first;
            self.set_fs_info(info)?;
        }

        log::debug!("released clusters {}..{}", first, first + count);

        Ok(())
    }

    /// Follows a chain from `first` to its end-of-chain marker.
    pub fn chain(&self, first: u32) -> Result<Vec<u32>, Fat32Error> {
        let mut clusters = Vec::new();
        let mut cluster = first;

        while (ROOT_CLUSTER..=self.geometry.last_cluster()).contains(&cluster) {
            if clusters.len() > self.geometry.last_cluster() as usize {
                break;
            }
            clusters.push(cluster);
            cluster = self.fat_entry(0, cluster)?;
        }

        Ok(clusters)
    }

    pub fn read_cluster(&self, cluster: u32) -> Result<&[u8], Fat32Error> {
        Ok(self
            .image
            .get_blocks(self.geometry.cluster_lba(cluster), 1)?)
    }

    pub(super) fn write_cluster(&mut self, cluster: u32, data: &[u8]) -> Result<(), Fat32Error> {
        Ok(self
            .image
            .write_blocks(self.geometry.cluster_lba(cluster), data)?)
    }

    /// Fills a fresh directory cluster with `entries`, the rest zeroed.
    pub(super) fn write_directory(
        &mut self,
        cluster: u32,
        entries: &[DirEntry],
    ) -> Result<(), Fat32Error> {
        let mut data = vec![0; self.geometry.lba_size as usize];
        for (slot, entry) in data.chunks_exact_mut(DirEntry::SIZE).zip(entries) {
            slot.copy_from_slice(&entry.to_bytes());
        }

        self.write_cluster(cluster, &data)
    }

    pub(super) fn write_dir_entry(
        &mut self,
        dir_cluster: u32,
        slot: usize,
        entry: &DirEntry,
    ) -> Result<(), Fat32Error> {
        let lba = self.geometry.cluster_lba(dir_cluster);
        let block = self.image.get_blocks_mut(lba, 1)?;
        let at = slot * DirEntry::SIZE;

        block[at..at + DirEntry::SIZE].copy_from_slice(&entry.to_bytes());

        Ok(())
    }

    /// Entries of a directory up to its first never-used slot.
    pub fn read_directory(&self, cluster: u32) -> Result<Vec<DirEntry>, Fat32Error> {
        let data = self.read_cluster(cluster)?;

        Ok(data
            .chunks_exact(DirEntry::SIZE)
            .map(DirEntry::from_bytes)
            .take_while(|e| !e.name.is_free())
            .filter(|e| !e.name.is_deleted())
            .collect())
    }

    /// Scans until `name` or the first never-used slot. Deleted slots are
    /// reused; volume labels and long-name fragments never match.
    pub(super) fn lookup(&self, dir_cluster: u32, name: &ShortName) -> Result<Slot, Fat32Error> {
        let data = self.read_cluster(dir_cluster)?;
        let mut vacant = None;

        for (i, raw) in data.chunks_exact(DirEntry::SIZE).enumerate() {
            let entry = DirEntry::from_bytes(raw);

            if entry.name.is_free() {
                return Ok(Slot::Vacant(vacant.unwrap_or(i)));
            }
            if entry.name.is_deleted() {
                vacant.get_or_insert(i);
                continue;
            }
            if entry.attributes & ATTR_VOLUME_ID != 0 {
                continue;
            }
            if entry.name == *name {
                return Ok(Slot::Found(entry));
            }
        }

        Ok(vacant.map_or(Slot::Full, Slot::Vacant))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fat::raw::FSINFO_UNKNOWN;

    fn formatted() -> (Image, LayoutPlan) {
        let plan = LayoutPlan::standard().unwrap();
        let mut image = Image::in_memory(plan.total_lbas, plan.lba_size as usize);
        Fat32Volume::format(&mut image, &plan, &mut GuidGenerator::from_seed(3)).unwrap();

        (image, plan)
    }

    fn names(entries: &[DirEntry]) -> Vec<String> {
        entries.iter().map(|e| e.name.to_string()).collect()
    }

    #[test]
    fn standard_geometry() {
        let plan = LayoutPlan::standard().unwrap();
        let g = Geometry::for_layout(&plan).unwrap();

        assert_eq!(g.sectors_per_fat, 1008);
        assert_eq!(g.fat_lba(0), 2048 + 32);
        assert_eq!(g.fat_lba(1), 2048 + 32 + 1008);
        assert_eq!(g.data_lba(), 4096);
        assert_eq!(g.cluster_lba(2), 4096);
        assert_eq!(g.cluster_lba(5), 4099);
        assert_eq!(g.last_cluster(), 65537);
        assert_eq!(g.entries_per_directory(), 16);
    }

    #[test]
    fn boot_region() {
        let (image, plan) = formatted();
        let start = plan.esp_start;

        let vbr = Vbr::from_bytes(image.get_blocks(start, 1).unwrap()).unwrap();
        assert_eq!(vbr.bytes_per_sector, 512);
        assert_eq!(vbr.sectors_per_cluster, 1);
        assert_eq!(vbr.reserved_sectors, 32);
        assert_eq!(vbr.nr_fats, 2);
        assert_eq!(vbr.media, 0xf8);
        assert_eq!(vbr.total_sectors as u64, plan.esp_lbas);
        assert_eq!(vbr.sectors_per_fat, (2048 - 32) / 2);
        assert_eq!(vbr.root_cluster, 2);
        assert_eq!(vbr.fs_info_sector, 1);
        assert_eq!(vbr.backup_boot_sector, 6);

        assert_eq!(
            image.get_blocks(start, 2).unwrap(),
            image.get_blocks(start + 6, 2).unwrap()
        );

        let info = FsInfo::from_bytes(image.get_blocks(start + 1, 1).unwrap()).unwrap();
        assert_eq!(info.free_count, FSINFO_UNKNOWN);
        assert_eq!(info.next_free, 5);
    }

    #[test]
    fn fat_copies() {
        let (mut image, plan) = formatted();
        let volume = Fat32Volume::open(&mut image, &plan).unwrap();

        for copy in 0..2 {
            assert_eq!(volume.fat_entry(copy, 0).unwrap(), 0xffff_fff8);
            for cluster in 1..=4 {
                assert_eq!(volume.fat_entry(copy, cluster).unwrap(), END_OF_CHAIN);
            }
            assert_eq!(volume.fat_entry(copy, 5).unwrap(), 0);
        }
    }

    #[test]
    fn initial_tree() {
        let (mut image, plan) = formatted();
        let volume = Fat32Volume::open(&mut image, &plan).unwrap();

        let root = volume.read_directory(ROOT_CLUSTER).unwrap();
        assert_eq!(names(&root), ["EFI"]);
        assert!(root[0].is_directory());
        assert_eq!(root[0].first_cluster, 3);

        let efi = volume.read_directory(EFI_CLUSTER).unwrap();
        assert_eq!(names(&efi), [".", "..", "BOOT"]);
        assert_eq!(efi[0].first_cluster, 3);
        assert_eq!(efi[1].first_cluster, 0);
        assert_eq!(efi[2].first_cluster, 4);

        let boot = volume.read_directory(BOOT_CLUSTER).unwrap();
        assert_eq!(names(&boot), [".", ".."]);
        assert_eq!(boot[0].first_cluster, 4);
        assert_eq!(boot[1].first_cluster, 3);
    }

    #[test]
    fn allocation_advances_hint() {
        let (mut image, plan) = formatted();
        let mut volume = Fat32Volume::open(&mut image, &plan).unwrap();

        assert_eq!(volume.allocate_chain(3).unwrap(), 5);
        assert_eq!(volume.allocate_chain(1).unwrap(), 8);
        assert_eq!(volume.chain(5).unwrap(), [5, 6, 7]);
        assert_eq!(volume.fs_info().unwrap().next_free, 9);
        assert_eq!(volume.allocate_chain(0).unwrap(), 0);

        let backup = plan.esp_start + 7;
        let info = FsInfo::from_bytes(volume.image.get_blocks(backup, 1).unwrap()).unwrap();
        assert_eq!(info.next_free, 9);
    }

    #[test]
    fn allocation_respects_capacity() {
        let (mut image, plan) = formatted();
        let mut volume = Fat32Volume::open(&mut image, &plan).unwrap();
        let available = volume.geometry().last_cluster() - FIRST_FREE_CLUSTER + 1;

        assert!(matches!(
            volume.allocate_chain(available + 1),
            Err(Fat32Error::VolumeFull(_))
        ));
        assert_eq!(volume.fs_info().unwrap().next_free, 5);
    }

    #[test]
    fn allocation_refuses_used_clusters() {
        let (mut image, plan) = formatted();
        let mut volume = Fat32Volume::open(&mut image, &plan).unwrap();
        volume.set_fat_entry(6, END_OF_CHAIN).unwrap();

        assert!(matches!(
            volume.allocate_chain(2),
            Err(Fat32Error::ClusterInUse(6))
        ));
    }

    #[test]
    fn released_chain_is_reused() {
        let (mut image, plan) = formatted();
        let mut volume = Fat32Volume::open(&mut image, &plan).unwrap();

        let first = volume.allocate_chain(3).unwrap();
        volume.release_chain(first, 3).unwrap();

        for copy in 0..2 {
            for cluster in 5..8 {
                assert_eq!(volume.fat_entry(copy, cluster).unwrap(), 0);
            }
        }
        assert_eq!(volume.fs_info().unwrap().next_free, 5);
        assert_eq!(volume.reserve(3).unwrap(), 5);
        assert_eq!(volume.allocate_chain(2).unwrap(), 5);
    }

    #[test]
    fn reserve_leaves_volume_untouched() {
        let (mut image, plan) = formatted();
        let volume = Fat32Volume::open(&mut image, &plan).unwrap();
        let available = volume.geometry().last_cluster() - FIRST_FREE_CLUSTER + 1;

        assert_eq!(volume.reserve(available).unwrap(), 5);
        assert!(matches!(
            volume.reserve(available + 1),
            Err(Fat32Error::VolumeFull(_))
        ));
        assert_eq!(volume.fat_entry(0, 5).unwrap(), 0);
        assert_eq!(volume.fs_info().unwrap().next_free, 5);
    }

    #[test]
    fn open_rejects_blank_partition() {
        let plan = LayoutPlan::standard().unwrap();
        let mut image = Image::in_memory(plan.total_lbas, 512);

        assert!(matches!(
            Fat32Volume::open(&mut image, &plan),
            Err(Fat32Error::NotFormatted)
        ));
    }
}
