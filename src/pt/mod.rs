use crate::image::Image;

pub mod gpt;
pub mod mbr;
pub mod raw;

pub enum PartitionTable {
    MBR(mbr::MBR),
    GPT(gpt::GPT),
}

/// A protective MBR must be backed by a valid GPT; anything else with a boot
/// signature is reported as a plain MBR.
pub fn read_partition_table(image: &Image) -> Result<Option<PartitionTable>, gpt::GptError> {
    match mbr::MBR::read(image)? {
        Some(mbr) if mbr.is_protective() => Ok(Some(PartitionTable::GPT(gpt::GPT::read(image)?))),
        Some(mbr) => Ok(Some(PartitionTable::MBR(mbr))),
        None => Ok(None),
    }
}
