use crate::pt::{gpt::GptError, read_partition_table, PartitionTable};

use super::Action;

pub struct ListPartitionsArgs {}

#[derive(Debug, displaydoc::Display, thiserror::Error)]
pub enum ListPartitionsError {
    /// Unable to read partition table: {0}
    Read(#[from] GptError),
}

pub struct ListPartitionsAction {}

impl Action<ListPartitionsArgs, ListPartitionsError> for ListPartitionsAction {
    fn invoke(
        image: &mut crate::image::Image,
        _args: ListPartitionsArgs,
    ) -> Result<(), ListPartitionsError> {
        // Determine partition table type; a GPT is verified in full here
        let pt = read_partition_table(image)?;

        match pt {
            Some(PartitionTable::MBR(mbr)) => {
                println!("found mbr:");
                print!("{}", mbr);
            }
            Some(PartitionTable::GPT(gpt)) => {
                println!("found gpt (primary and backup consistent):");
                print!("{}", gpt);
            }
            None => {
                println!("no partition table found");
            }
        }

        Ok(())
    }
}
