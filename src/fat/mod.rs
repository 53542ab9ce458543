//! FAT32 volume for the EFI system partition.
//!
//! Sectors per cluster is fixed at 1, so a cluster number maps directly to an
//! LBA in the data region. Every directory occupies exactly one cluster.

pub mod insert;
pub mod name;
pub mod raw;
pub mod time;
pub mod volume;

pub use name::ShortName;
pub use raw::{DirEntry, FsInfo, Vbr};
pub use time::FatTimestamp;
pub use volume::{Fat32Volume, Geometry};

use crate::image::ImageError;

pub const RESERVED_SECTORS: u16 = 32;
pub const NR_FATS: u8 = 2;
pub const MEDIA_FIXED: u8 = 0xf8;
pub const FS_INFO_SECTOR: u16 = 1;
pub const BACKUP_BOOT_SECTOR: u16 = 6;

pub const ROOT_CLUSTER: u32 = 2;
pub const EFI_CLUSTER: u32 = 3;
pub const BOOT_CLUSTER: u32 = 4;
pub const FIRST_FREE_CLUSTER: u32 = 5;

pub const END_OF_CHAIN: u32 = 0xffff_ffff;

/// Error while building or extending the FAT32 volume.
#[derive(Debug, displaydoc::Display, thiserror::Error)]
pub enum Fat32Error {
    /// {0}
    Image(#[from] ImageError),
    /// The partition is too small to hold a FAT32 volume
    TooSmall,
    /// The partition does not hold a FAT32 volume built by this tool
    NotFormatted,
    /// The FSInfo sector is damaged
    BadFsInfo,
    /// Path `{0}` is not absolute
    RelativePath(String),
    /// Path `{0}` has an empty component
    InvalidPath(String),
    /// `{0}` is not a valid 8.3 name
    InvalidName(String),
    /// `{0}` exists and is not a directory
    NotADirectory(String),
    /// `{0}` already exists
    AlreadyExists(String),
    /// Directory at cluster {0} has no free entries
    DirectoryFull(u32),
    /// No room for {0} more clusters
    VolumeFull(u32),
    /// Cluster {0} is already allocated
    ClusterInUse(u32),
    /// Source file of {0} bytes exceeds the FAT32 file size limit
    FileTooLarge(u64),
    /// Unable to open source file `{0}`: {1}
    SourceOpen(String, #[source] std::io::Error),
    /// Unable to read source data: {0}
    SourceRead(#[source] std::io::Error),
}
