use std::path::Path;

use humansize::{format_size, BINARY};
use nix::{
    fcntl::{FallocateFlags, OFlag},
    sys::stat::Mode,
};

use super::insert::Insertion;
use crate::fat::{Fat32Error, Fat32Volume};
use crate::guid::GuidGenerator;
use crate::image::{Image, ImageError};
use crate::layout::{LayoutError, LayoutPlan};
use crate::pt::{gpt::GPT, mbr::MBR};

pub struct CreateActionArgs {
    pub overwrite: bool,
    pub insertions: Vec<Insertion>,
}

/// Error during creation of disk image.
#[derive(Debug, displaydoc::Display, thiserror::Error)]
pub enum CreateError {
    /// Unable to open output file.
    OpenError,
    /// Unable to allocate space for output file.
    AllocationFailedError,
    /// The image file already exists, and force overwrite was not specified.
    FileAlreadyExistsError,
    /// Unable to plan the disk layout: {0}
    Layout(#[from] LayoutError),
    /// Unable to map output file: {0}
    Map(#[source] ImageError),
    /// Unable to write protective MBR: {0}
    Mbr(#[source] ImageError),
    /// Unable to write GPT headers and tables: {0}
    Gpt(#[source] ImageError),
    /// Unable to write EFI system partition: {0}
    Esp(#[source] Fat32Error),
    /// Unable to add `{0}`: {1}
    Insert(String, #[source] Fat32Error),
    /// Unable to flush output file: {0}
    Flush(#[source] ImageError),
}

/// Writes every structure of a fresh image into `image`, which must be
/// zero-filled and `plan.total_lbas` blocks long.
pub fn build(
    image: &mut Image,
    plan: &LayoutPlan,
    guids: &mut GuidGenerator,
    insertions: &[Insertion],
) -> Result<(), CreateError> {
    MBR::new_protective(plan.total_lbas)
        .write(image)
        .map_err(CreateError::Mbr)?;

    let gpt = GPT::for_layout(plan, guids);
    gpt.write(image, plan).map_err(CreateError::Gpt)?;
    log::info!("GPT written, disk {}", gpt.disk_guid);

    let mut volume = Fat32Volume::format(image, plan, guids).map_err(CreateError::Esp)?;

    for ins in insertions {
        volume
            .insert_path(&ins.destination, &ins.source)
            .map_err(|e| CreateError::Insert(ins.destination.clone(), e))?;
        println!("Added file '{}'", ins.destination);
    }

    // Without explicit insertions, pick up a boot loader lying next to us.
    if insertions.is_empty() {
        if let Some(ins) = Insertion::default_boot_loader() {
            match volume.insert_path(&ins.destination, &ins.source) {
                Ok(_) => println!("Added file '{}'", ins.destination),
                Err(e) => println!("Warning: could not add '{}': {}", ins.destination, e),
            }
        }
    }

    Ok(())
}

fn allocate(path: &Path, size: u64) -> Result<(), CreateError> {
    let len = i64::try_from(size).map_err(|_| CreateError::AllocationFailedError)?;

    // We need to use the *nix APIs to create a sparse file.
    let fd = nix::fcntl::open(
        path,
        OFlag::O_CREAT | OFlag::O_TRUNC | OFlag::O_RDWR,
        Mode::S_IRUSR | Mode::S_IWUSR | Mode::S_IRGRP | Mode::S_IROTH,
    )
    .map_err(|_| CreateError::OpenError)?;

    let allocated = nix::fcntl::fallocate(fd, FallocateFlags::empty(), 0, len);
    let closed = nix::unistd::close(fd);

    allocated.map_err(|_| CreateError::AllocationFailedError)?;
    closed.map_err(|_| CreateError::OpenError)
}

pub fn invoke(image_file: &str, ca: CreateActionArgs) -> Result<(), CreateError> {
    let p = Path::new(image_file);

    // Check for the existence of the image file
    if p.exists() {
        if ca.overwrite {
            println!("Image file already exists, but --overwrite was specified so re-creating!");
        } else {
            return Err(CreateError::FileAlreadyExistsError);
        }
    } else if ca.overwrite {
        println!("Warning: overwrite was specified, but the image file does not already exist!");
    }

    let plan = LayoutPlan::standard()?;

    println!(
        "Creating a disk image of size {}",
        format_size(plan.image_size(), BINARY)
    );

    allocate(p, plan.image_size())?;

    let mut image = Image::open(p, plan.lba_size as usize).map_err(CreateError::Map)?;
    let mut guids = GuidGenerator::from_os_rng();

    build(&mut image, &plan, &mut guids, &ca.insertions)?;

    image.flush().map_err(CreateError::Flush)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_produces_consistent_image() {
        let plan = LayoutPlan::standard().unwrap();
        let mut image = Image::in_memory(plan.total_lbas, plan.lba_size as usize);

        build(&mut image, &plan, &mut GuidGenerator::from_seed(11), &[]).unwrap();

        let gpt = GPT::read(&image).unwrap();
        assert_eq!(gpt.partitions.len(), 2);
        assert_eq!(gpt.partitions[0].first_lba, plan.esp_start);

        let volume = Fat32Volume::open(&mut image, &plan).unwrap();
        assert_eq!(volume.read_directory(2).unwrap().len(), 1);
    }

    #[test]
    fn failed_insertion_names_the_path() {
        let plan = LayoutPlan::standard().unwrap();
        let mut image = Image::in_memory(plan.total_lbas, plan.lba_size as usize);
        let ins = Insertion::parse("/EFI/BOOT/BOOTX64.EFI=/nonexistent/loader.efi");

        let err = build(&mut image, &plan, &mut GuidGenerator::from_seed(11), &[ins])
            .unwrap_err();

        assert!(matches!(err, CreateError::Insert(ref p, _) if p == "/EFI/BOOT/BOOTX64.EFI"));
        assert!(err.to_string().starts_with("Unable to add `/EFI/BOOT/BOOTX64.EFI`"));
    }

    #[test]
    fn short_image_fails_in_gpt_stage() {
        let plan = LayoutPlan::standard().unwrap();
        let mut image = Image::in_memory(64, plan.lba_size as usize);

        let err = build(&mut image, &plan, &mut GuidGenerator::from_seed(11), &[]).unwrap_err();

        assert!(matches!(err, CreateError::Gpt(ImageError::OutOfBounds(_, _))));
    }
}
