//! Adding files to the volume by absolute path.

use std::{fs::File, io::Read, path::Path};

use super::{
    name::ShortName,
    raw::DirEntry,
    time::FatTimestamp,
    volume::{Fat32Volume, Slot},
    Fat32Error, ROOT_CLUSTER,
};
use crate::layout::bytes_to_lbas;

/// Splits `/A/B/C` into short names; the last one names the file.
pub fn parse_path(path: &str) -> Result<Vec<ShortName>, Fat32Error> {
    let rest = path
        .strip_prefix('/')
        .ok_or_else(|| Fat32Error::RelativePath(path.to_string()))?;

    rest.split('/')
        .map(|component| {
            if component.is_empty() {
                return Err(Fat32Error::InvalidPath(path.to_string()));
            }
            ShortName::parse(component).ok_or_else(|| Fat32Error::InvalidName(component.into()))
        })
        .collect()
}

impl Fat32Volume<'_> {
    /// Copies the file at `source` to `path`, creating missing directories.
    pub fn insert_path<P>(&mut self, path: &str, source: P) -> Result<DirEntry, Fat32Error>
    where
        P: AsRef<Path>,
    {
        parse_path(path)?;

        let source = source.as_ref();
        let open_err = |e| Fat32Error::SourceOpen(source.display().to_string(), e);

        let file = File::open(source).map_err(open_err)?;
        let size = file.metadata().map_err(open_err)?.len();

        self.insert_reader(path, file, size)
    }

    /// Copies `size` bytes from `reader` to `path`.
    pub fn insert_reader<R>(
        &mut self,
        path: &str,
        mut reader: R,
        size: u64,
    ) -> Result<DirEntry, Fat32Error>
    where
        R: Read,
    {
        let components = parse_path(path)?;
        let size = u32::try_from(size).map_err(|_| Fat32Error::FileTooLarge(size))?;
        let (file_name, dirs) = match components.split_last() {
            Some(split) => split,
            None => return Err(Fat32Error::InvalidPath(path.to_string())),
        };

        // Resolve the existing part of the path and check for room before
        // anything is written.
        let mut dir_cluster = ROOT_CLUSTER;
        let mut existing = 0;
        for name in dirs {
            match self.lookup(dir_cluster, name)? {
                Slot::Found(entry) if entry.is_directory() => dir_cluster = entry.first_cluster,
                Slot::Found(_) => return Err(Fat32Error::NotADirectory(name.to_string())),
                Slot::Vacant(_) => break,
                Slot::Full => return Err(Fat32Error::DirectoryFull(dir_cluster)),
            }
            existing += 1;
        }

        let missing = &dirs[existing..];
        if missing.is_empty() {
            self.vacant_slot(dir_cluster, file_name, path)?;
        }

        let nr_clusters = bytes_to_lbas(size as u64, self.geometry().lba_size) as u32;
        self.reserve(missing.len() as u32 + nr_clusters)?;

        for name in missing {
            let slot = self.vacant_slot(dir_cluster, name, path)?;
            dir_cluster = self.create_directory(dir_cluster, slot, *name)?;
        }

        let slot = self.vacant_slot(dir_cluster, file_name, path)?;
        let entry =
            self.create_file(dir_cluster, slot, *file_name, &mut reader, size, nr_clusters)?;

        log::info!("added file '{}' ({} bytes)", path, size);

        Ok(entry)
    }

    fn vacant_slot(
        &self,
        dir_cluster: u32,
        name: &ShortName,
        path: &str,
    ) -> Result<usize, Fat32Error> {
        match self.lookup(dir_cluster, name)? {
            Slot::Vacant(slot) => Ok(slot),
            Slot::Found(_) => Err(Fat32Error::AlreadyExists(path.to_string())),
            Slot::Full => Err(Fat32Error::DirectoryFull(dir_cluster)),
        }
    }

    fn create_directory(
        &mut self,
        parent: u32,
        slot: usize,
        name: ShortName,
    ) -> Result<u32, Fat32Error> {
        let cluster = self.allocate_chain(1)?;
        let stamp = FatTimestamp::now();

        self.write_dir_entry(parent, slot, &DirEntry::directory(name, cluster, stamp))?;

        // The root is referenced as cluster 0 from `..`.
        let parent_ref = if parent == ROOT_CLUSTER { 0 } else { parent };
        self.write_directory(
            cluster,
            &[
                DirEntry::directory(ShortName::DOT, cluster, stamp),
                DirEntry::directory(ShortName::DOT_DOT, parent_ref, stamp),
            ],
        )?;

        log::debug!("created directory {} at cluster {}", name, cluster);

        Ok(cluster)
    }

    /// The entry is only written once all data is in place.
    fn create_file<R>(
        &mut self,
        parent: u32,
        slot: usize,
        name: ShortName,
        reader: &mut R,
        size: u32,
        nr_clusters: u32,
    ) -> Result<DirEntry, Fat32Error>
    where
        R: Read,
    {
        let first = self.allocate_chain(nr_clusters)?;

        if let Err(e) = self.write_file_data(first, nr_clusters, reader, size) {
            self.release_chain(first, nr_clusters)?;
            return Err(e);
        }

        let entry = DirEntry::file(name, first, size, FatTimestamp::now());
        self.write_dir_entry(parent, slot, &entry)?;

        Ok(entry)
    }

    fn write_file_data<R>(
        &mut self,
        first: u32,
        nr_clusters: u32,
        reader: &mut R,
        size: u32,
    ) -> Result<(), Fat32Error>
    where
        R: Read,
    {
        let lba_size = self.geometry().lba_size;

        // The chain is contiguous, so cluster i of the file is first + i.
        let mut buf = vec![0; lba_size as usize];
        let mut remaining = size as u64;
        for cluster in first..first + nr_clusters {
            let len = remaining.min(lba_size) as usize;

            reader
                .read_exact(&mut buf[..len])
                .map_err(Fat32Error::SourceRead)?;
            buf[len..].fill(0);

            self.write_cluster(cluster, &buf)?;
            remaining -= len as u64;
        }

        Ok(())
    }
}
