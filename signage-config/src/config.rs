use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::device_class::{DeviceClass, DeviceProfile};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("failed to create cache directory {path:?}: {source}")]
    CacheDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct CmsConfig {
    pub base_url: String,
    pub cms_key: String,
    pub hardware_key: String,
    pub display_name: String,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub root: PathBuf,
}

impl CacheConfig {
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.root).map_err(|source| ConfigError::CacheDir {
            path: self.root.clone(),
            source,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Top-level configuration for one display. Groups sub-configs by concern
/// rather than flattening everything into one struct.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub cms: CmsConfig,
    pub cache: CacheConfig,
    pub collect_interval: Duration,
    pub device: DeviceProfile,
}

impl Config {
    pub fn cache_root(&self) -> &Path {
        &self.cache.root
    }

    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        self.cache.ensure_directories()
    }

    /// Load from the process environment, with the `SIGNAGE_` prefix (the
    /// `config` crate's environment source), falling back to sane
    /// defaults for a local demo run.
    pub fn load() -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8088)?
            .set_default("cms.base_url", "http://localhost:9000")?
            .set_default("cms.cms_key", "")?
            .set_default("cms.hardware_key", "")?
            .set_default("cms.display_name", "display-1")?
            .set_default("cache.root", "./signage-cache")?
            .set_default("collect_interval_secs", 300i64)?
            .add_source(config::Environment::with_prefix("SIGNAGE").separator("__"))
            .build()?;

        let ram_bytes = detect_ram_bytes();

        Ok(Config {
            server: ServerConfig {
                host: settings.get_string("server.host")?,
                port: settings.get_int("server.port")? as u16,
            },
            cms: CmsConfig {
                base_url: settings.get_string("cms.base_url")?,
                cms_key: settings.get_string("cms.cms_key")?,
                hardware_key: settings.get_string("cms.hardware_key")?,
                display_name: settings.get_string("cms.display_name")?,
            },
            cache: CacheConfig {
                root: PathBuf::from(settings.get_string("cache.root")?),
            },
            collect_interval: Duration::from_secs(
                settings.get_int("collect_interval_secs")? as u64,
            ),
            device: DeviceClass::from_ram_bytes(ram_bytes).profile(),
        })
    }
}

/// Best-effort RAM detection. Reads `/proc/meminfo` on Linux; falls back to
/// the mid-tier assumption everywhere else, since the exact figure only
/// matters for bucketing into one of three brackets.
fn detect_ram_bytes() -> u64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(contents) = std::fs::read_to_string("/proc/meminfo") {
            for line in contents.lines() {
                if let Some(rest) = line.strip_prefix("MemTotal:") {
                    let kb: u64 = rest
                        .trim()
                        .trim_end_matches(" kB")
                        .trim()
                        .parse()
                        .unwrap_or(0);
                    if kb > 0 {
                        return kb * 1024;
                    }
                }
            }
        }
    }
    4 * 1024 * 1024 * 1024
}
