use std::{
    fs::{File, OpenOptions},
    path::Path,
};

use memmap::{Mmap, MmapMut};

/// Error while accessing a disk image.
#[derive(Debug, displaydoc::Display, thiserror::Error)]
pub enum ImageError {
    /// Unable to open image file
    OpenError,
    /// Unable to map image file
    MapError,
    /// Unable to flush image file to disk
    FlushError,
    /// Blocks {0}..{1} lie outside the image
    OutOfBounds(u64, u64),
}

enum Backing {
    Mapped(MmapMut),
    Memory(Vec<u8>),
}

/// A disk image addressed in whole logical blocks.
pub struct Image {
    mem: Backing,
    block_size: usize,
}

impl Image {
    pub fn from_file(file: File, block_size: usize) -> Result<Self, ImageError> {
        let mem = unsafe { Mmap::map(&file).map_err(|_| ImageError::MapError)? }
            .make_mut()
            .map_err(|_| ImageError::MapError)?;

        Ok(Image {
            mem: Backing::Mapped(mem),
            block_size,
        })
    }

    pub fn open<P>(path: P, block_size: usize) -> Result<Self, ImageError>
    where
        P: AsRef<Path>,
    {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(false)
            .truncate(false)
            .append(false)
            .open(path)
            .map_err(|_| ImageError::OpenError)?;

        Self::from_file(file, block_size)
    }

    /// Zero-filled image held entirely in memory.
    pub fn in_memory(block_count: u64, block_size: usize) -> Self {
        Image {
            mem: Backing::Memory(vec![0; block_count as usize * block_size]),
            block_size,
        }
    }

    fn bytes(&self) -> &[u8] {
        match &self.mem {
            Backing::Mapped(m) => &m[..],
            Backing::Memory(v) => &v[..],
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        match &mut self.mem {
            Backing::Mapped(m) => &mut m[..],
            Backing::Memory(v) => &mut v[..],
        }
    }

    fn block_range(
        &self,
        block_index: u64,
        block_count: u64,
    ) -> Result<std::ops::Range<usize>, ImageError> {
        let end_block = block_index
            .checked_add(block_count)
            .filter(|end| *end <= self.block_count())
            .ok_or(ImageError::OutOfBounds(
                block_index,
                block_index.saturating_add(block_count),
            ))?;

        let block_start = block_index as usize * self.block_size;
        let block_end = end_block as usize * self.block_size;

        Ok(block_start..block_end)
    }

    pub fn get_blocks(&self, block_index: u64, block_count: u64) -> Result<&[u8], ImageError> {
        let range = self.block_range(block_index, block_count)?;

        Ok(&self.bytes()[range])
    }

    pub fn get_blocks_mut(
        &mut self,
        block_index: u64,
        block_count: u64,
    ) -> Result<&mut [u8], ImageError> {
        let range = self.block_range(block_index, block_count)?;

        Ok(&mut self.bytes_mut()[range])
    }

    /// Writes `data` starting at `block_index`, zero-padding the last block.
    pub fn write_blocks(&mut self, block_index: u64, data: &[u8]) -> Result<(), ImageError> {
        let block_count = data.len().div_ceil(self.block_size) as u64;
        let blocks = self.get_blocks_mut(block_index, block_count)?;

        blocks[..data.len()].copy_from_slice(data);
        blocks[data.len()..].fill(0);

        Ok(())
    }

    pub fn flush(&self) -> Result<(), ImageError> {
        match &self.mem {
            Backing::Mapped(m) => m.flush().map_err(|_| ImageError::FlushError),
            Backing::Memory(_) => Ok(()),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn block_count(&self) -> u64 {
        (self.len() / self.block_size) as u64
    }

    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_pads_final_block() {
        let mut image = Image::in_memory(4, 512);
        image.get_blocks_mut(1, 2).unwrap().fill(0xAA);

        image.write_blocks(1, &[1, 2, 3]).unwrap();

        let blocks = image.get_blocks(1, 2).unwrap();
        assert_eq!(&blocks[..3], &[1, 2, 3]);
        assert!(blocks[3..512].iter().all(|b| *b == 0));
        assert!(blocks[512..].iter().all(|b| *b == 0xAA));
    }

    #[test]
    fn out_of_range_access_is_an_error() {
        let mut image = Image::in_memory(4, 512);

        assert!(matches!(
            image.get_blocks(3, 2),
            Err(ImageError::OutOfBounds(3, 5))
        ));
        assert!(image.write_blocks(4, &[0]).is_err());
        assert!(image.get_blocks(u64::MAX, 1).is_err());
        assert_eq!(image.block_count(), 4);
    }
}
