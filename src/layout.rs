//! Disk geometry: fixed parameters and partition placement.

pub const LBA_SIZE: u64 = 512;
pub const ALIGNMENT: u64 = 1024 * 1024;
pub const GPT_ENTRY_COUNT: u32 = 128;
pub const GPT_ENTRY_SIZE: u32 = 128;
pub const ESP_SIZE: u64 = 33 * 1024 * 1024;
pub const DATA_SIZE: u64 = 1024 * 1024;

/// Error while planning the disk layout.
#[derive(Debug, displaydoc::Display, thiserror::Error)]
pub enum LayoutError {
    /// LBA size {0} is not a power of two of at least 512 bytes
    BadLbaSize(u64),
    /// Alignment {0} is not a non-zero multiple of the LBA size
    BadAlignment(u64),
    /// The EFI system partition cannot be empty
    EmptyEsp,
    /// Partitions do not fit between the primary and backup GPT
    Overlap,
}

/// Round a byte count up to whole blocks.
pub fn bytes_to_lbas(bytes: u64, lba_size: u64) -> u64 {
    bytes.div_ceil(lba_size)
}

/// `lba` itself when aligned, otherwise the next multiple of `align_lbas`.
pub fn next_aligned_lba(lba: u64, align_lbas: u64) -> u64 {
    match lba % align_lbas {
        0 => lba,
        rem => lba + (align_lbas - rem),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayoutPlan {
    pub lba_size: u64,
    pub align_lbas: u64,
    pub gpt_table_lbas: u64,
    pub esp_start: u64,
    pub esp_lbas: u64,
    pub data_start: u64,
    pub data_lbas: u64,
    pub total_lbas: u64,
}

impl LayoutPlan {
    /// The image this tool builds: 33 MiB ESP, 1 MiB data partition.
    pub fn standard() -> Result<Self, LayoutError> {
        Self::new(ESP_SIZE, DATA_SIZE)
    }

    pub fn new(esp_size: u64, data_size: u64) -> Result<Self, LayoutError> {
        Self::with_geometry(esp_size, data_size, ALIGNMENT, LBA_SIZE)
    }

    pub fn with_geometry(
        esp_size: u64,
        data_size: u64,
        alignment: u64,
        lba_size: u64,
    ) -> Result<Self, LayoutError> {
        if lba_size < 512 || !lba_size.is_power_of_two() {
            return Err(LayoutError::BadLbaSize(lba_size));
        }
        if alignment == 0 || alignment % lba_size != 0 {
            return Err(LayoutError::BadAlignment(alignment));
        }
        if esp_size == 0 {
            return Err(LayoutError::EmptyEsp);
        }

        let gpt_table_lbas = bytes_to_lbas(
            GPT_ENTRY_COUNT as u64 * GPT_ENTRY_SIZE as u64,
            lba_size,
        );
        let esp_lbas = bytes_to_lbas(esp_size, lba_size);
        let data_lbas = bytes_to_lbas(data_size, lba_size);

        // The first aligned LBA must clear the MBR and the primary GPT.
        let align_lbas = alignment / lba_size;
        let esp_start = next_aligned_lba(2 + gpt_table_lbas, align_lbas);
        let data_start = next_aligned_lba(esp_start + esp_lbas, align_lbas);

        // Two alignment units, the MBR, both GPT headers and both tables.
        let padding = alignment * 2 + lba_size * (gpt_table_lbas * 2 + 1 + 2);
        let total_lbas = bytes_to_lbas(esp_size + data_size + padding, lba_size);

        let plan = LayoutPlan {
            lba_size,
            align_lbas,
            gpt_table_lbas,
            esp_start,
            esp_lbas,
            data_start,
            data_lbas,
            total_lbas,
        };

        if plan.data_start + plan.data_lbas > plan.last_usable_lba() + 1 {
            return Err(LayoutError::Overlap);
        }

        Ok(plan)
    }

    pub fn esp_end(&self) -> u64 {
        self.esp_start + self.esp_lbas - 1
    }

    /// Last LBA of the data partition; equals `data_start - 1` when it is empty.
    pub fn data_end(&self) -> u64 {
        self.data_start + self.data_lbas - 1
    }

    pub fn first_usable_lba(&self) -> u64 {
        2 + self.gpt_table_lbas
    }

    pub fn last_usable_lba(&self) -> u64 {
        self.total_lbas - 2 - self.gpt_table_lbas
    }

    pub fn backup_header_lba(&self) -> u64 {
        self.total_lbas - 1
    }

    pub fn backup_table_lba(&self) -> u64 {
        self.backup_header_lba() - self.gpt_table_lbas
    }

    pub fn image_size(&self) -> u64 {
        self.total_lbas * self.lba_size
    }
}
