use humansize::{format_size, BINARY};

use super::Action;
use crate::fat::{Fat32Error, Fat32Volume, ROOT_CLUSTER};
use crate::image::Image;
use crate::layout::{LayoutError, LayoutPlan};

pub struct InfoArgs {}

#[derive(Debug, displaydoc::Display, thiserror::Error)]
pub enum InfoError {
    /// Unable to plan the disk layout: {0}
    Layout(#[from] LayoutError),
    /// Unable to read the EFI system partition: {0}
    Esp(#[from] Fat32Error),
}

pub struct InfoAction {}

impl Action<InfoArgs, InfoError> for InfoAction {
    fn invoke(image: &mut Image, _args: InfoArgs) -> Result<(), InfoError> {
        let plan = LayoutPlan::standard()?;

        println!(
            "image: {} ({} blocks of {} bytes)",
            format_size(image.len(), BINARY),
            image.block_count(),
            image.block_size()
        );
        if image.block_count() != plan.total_lbas {
            println!("warning: expected {} blocks", plan.total_lbas);
        }
        println!("esp:   LBA {}..={}", plan.esp_start, plan.esp_end());
        println!("data:  LBA {}..={}", plan.data_start, plan.data_end());

        let volume = Fat32Volume::open(image, &plan)?;
        let geometry = volume.geometry();

        println!(
            "fat32: {} sectors per FAT, data region at LBA {}, clusters 2..={}",
            geometry.sectors_per_fat,
            geometry.data_lba(),
            geometry.last_cluster()
        );
        println!("       next free cluster {}", volume.fs_info()?.next_free);

        for entry in volume.read_directory(ROOT_CLUSTER)? {
            let kind = if entry.is_directory() { "dir " } else { "file" };
            println!("       {} /{} ({} bytes)", kind, entry.name, entry.size);
        }

        Ok(())
    }
}
