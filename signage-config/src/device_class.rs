//! Device-class knobs. Selected at startup from detected RAM; every
//! size here is in bytes unless named otherwise.

/// Files at or below this threshold are stored whole; above it, chunked.
/// Fixed regardless of device class.
pub const CHUNK_STORAGE_THRESHOLD: u64 = 100 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    /// <= 512 MB RAM.
    Low,
    /// ~4 GB RAM.
    Mid,
    /// >= 8 GB RAM.
    High,
}

/// Resolved tuning derived from a `DeviceClass`.
#[derive(Debug, Clone, Copy)]
pub struct DeviceProfile {
    pub class: DeviceClass,
    pub chunk_size: u64,
    pub blob_lru_budget: u64,
    pub download_concurrency: usize,
    pub chunks_per_file: usize,
}

impl DeviceClass {
    /// Classify a RAM size (bytes) into a device class. Boundaries follow
    /// the table's bracket names: low is "<= 512 MB", high is ">= 8 GB",
    /// everything between is mid-tier.
    pub fn from_ram_bytes(ram_bytes: u64) -> Self {
        const HALF_GIB: u64 = 512 * 1024 * 1024;
        const EIGHT_GIB: u64 = 8 * 1024 * 1024 * 1024;
        if ram_bytes <= HALF_GIB {
            DeviceClass::Low
        } else if ram_bytes >= EIGHT_GIB {
            DeviceClass::High
        } else {
            DeviceClass::Mid
        }
    }

    pub fn profile(self) -> DeviceProfile {
        let (chunk_size_mb, blob_lru_mb, concurrency, chunks_per_file) = match self {
            DeviceClass::Low => (10, 25, 1, 2),
            DeviceClass::Mid => (50, 200, 4, 4),
            DeviceClass::High => (100, 500, 6, 4),
        };
        DeviceProfile {
            class: self,
            chunk_size: chunk_size_mb * 1024 * 1024,
            blob_lru_budget: blob_lru_mb * 1024 * 1024,
            download_concurrency: concurrency,
            chunks_per_file,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_ram_brackets() {
        assert_eq!(
            DeviceClass::from_ram_bytes(256 * 1024 * 1024),
            DeviceClass::Low
        );
        assert_eq!(
            DeviceClass::from_ram_bytes(4 * 1024 * 1024 * 1024),
            DeviceClass::Mid
        );
        assert_eq!(
            DeviceClass::from_ram_bytes(16 * 1024 * 1024 * 1024),
            DeviceClass::High
        );
    }

    #[test]
    fn mid_profile_matches_table() {
        let profile = DeviceClass::Mid.profile();
        assert_eq!(profile.chunk_size, 50 * 1024 * 1024);
        assert_eq!(profile.blob_lru_budget, 200 * 1024 * 1024);
        assert_eq!(profile.download_concurrency, 4);
        assert_eq!(profile.chunks_per_file, 4);
    }
}
