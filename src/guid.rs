//! RFC-4122 version 4 identifiers for disks and partitions.

use std::fmt::Display;

use rand_core::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use uuid::{Builder, Uuid, Variant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Guid(Uuid);

impl Guid {
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Guid(uuid)
    }

    /// GPT stores the first three fields little-endian and the rest as bytes.
    pub fn to_bytes_le(&self) -> [u8; 16] {
        self.0.to_bytes_le()
    }

    pub fn from_bytes_le(bytes: [u8; 16]) -> Self {
        Guid(Uuid::from_bytes_le(bytes))
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    pub fn version(&self) -> usize {
        self.0.get_version_num()
    }

    pub fn is_rfc4122(&self) -> bool {
        self.0.get_variant() == Variant::RFC4122
    }
}

impl From<Uuid> for Guid {
    fn from(u: Uuid) -> Self {
        Guid(u)
    }
}

impl Display for Guid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated().to_string().to_uppercase())
    }
}

/// Source of fresh GUIDs, seeded once per run.
pub struct GuidGenerator {
    rng: Xoshiro256PlusPlus,
}

impl GuidGenerator {
    pub fn from_os_rng() -> Self {
        GuidGenerator {
            rng: Xoshiro256PlusPlus::from_os_rng(),
        }
    }

    pub fn from_seed(seed: u64) -> Self {
        GuidGenerator {
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
        }
    }

    pub fn new_guid(&mut self) -> Guid {
        let mut bytes = [0; 16];
        self.rng.fill_bytes(&mut bytes);

        // Sets version 4 and the 10xx variant bits.
        Guid(Builder::from_random_bytes(bytes).into_uuid())
    }

    pub fn next_u32(&mut self) -> u32 {
        self.rng.next_u32()
    }
}
