use std::path::{Path, PathBuf};

use super::Action;
use crate::fat::{Fat32Error, Fat32Volume};
use crate::image::{Image, ImageError};
use crate::layout::{LayoutError, LayoutPlan};

const DEFAULT_BOOT_LOADER: &str = "/EFI/BOOT/BOOTX64.EFI";

/// A file to copy into the ESP: `DEST[=SOURCE]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Insertion {
    pub destination: String,
    pub source: PathBuf,
}

impl Insertion {
    /// Without `=SOURCE`, the source is the destination's file name in the
    /// working directory.
    pub fn parse(spec: &str) -> Self {
        match spec.split_once('=') {
            Some((destination, source)) => Insertion {
                destination: destination.to_string(),
                source: PathBuf::from(source),
            },
            None => Insertion {
                destination: spec.to_string(),
                source: PathBuf::from(spec.rsplit('/').next().unwrap_or_default()),
            },
        }
    }

    /// `/EFI/BOOT/BOOTX64.EFI`, if `BOOTX64.EFI` exists in the working directory.
    pub fn default_boot_loader() -> Option<Self> {
        let ins = Self::parse(DEFAULT_BOOT_LOADER);

        Path::new(&ins.source).is_file().then_some(ins)
    }
}

pub struct InsertActionArgs {
    pub insertions: Vec<Insertion>,
}

#[derive(Debug, displaydoc::Display, thiserror::Error)]
pub enum InsertActionError {
    /// Unable to plan the disk layout: {0}
    Layout(#[from] LayoutError),
    /// Unable to open the EFI system partition: {0}
    Open(#[source] Fat32Error),
    /// Unable to add `{0}`: {1}
    Insert(String, #[source] Fat32Error),
    /// Unable to flush image: {0}
    Flush(#[source] ImageError),
}

pub struct InsertAction {}

impl Action<InsertActionArgs, InsertActionError> for InsertAction {
    fn invoke(image: &mut Image, args: InsertActionArgs) -> Result<(), InsertActionError> {
        let plan = LayoutPlan::standard()?;

        {
            let mut volume = Fat32Volume::open(image, &plan).map_err(InsertActionError::Open)?;

            for ins in &args.insertions {
                volume
                    .insert_path(&ins.destination, &ins.source)
                    .map_err(|e| InsertActionError::Insert(ins.destination.clone(), e))?;
                println!("Added file '{}'", ins.destination);
            }
        }

        image.flush().map_err(InsertActionError::Flush)
    }
}

#[cfg(test)]
mod tests {
    use super::Insertion;
    use std::path::PathBuf;

    #[test]
    fn explicit_source() {
        let ins = Insertion::parse("/EFI/BOOT/BOOTX64.EFI=target/loader.efi");

        assert_eq!(ins.destination, "/EFI/BOOT/BOOTX64.EFI");
        assert_eq!(ins.source, PathBuf::from("target/loader.efi"));
    }

    #[test]
    fn source_defaults_to_file_name() {
        let ins = Insertion::parse("/EFI/BOOT/BOOTX64.EFI");

        assert_eq!(ins.destination, "/EFI/BOOT/BOOTX64.EFI");
        assert_eq!(ins.source, PathBuf::from("BOOTX64.EFI"));
    }
}
