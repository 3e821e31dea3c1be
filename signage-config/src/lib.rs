//! Device-class knobs and configuration loading for the signage
//! player. Kept as its own crate so both `signage-core` (which needs the
//! chunk/LRU/concurrency knobs) and `signage-server` (which needs the
//! server+CMS settings) can depend on it without a cycle.

pub mod config;
pub mod device_class;

pub use config::{CacheConfig, CmsConfig, Config, ConfigError, ServerConfig};
pub use device_class::{DeviceClass, DeviceProfile, CHUNK_STORAGE_THRESHOLD};
