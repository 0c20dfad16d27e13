use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use sysinfo::System;
use tracing::warn;

const APP_DIR: &str = "image-gallery";

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct GalleryConfig {
    pub cache: CacheOptions,
    pub fetch: FetchOptions,
}

impl GalleryConfig {
    /// Loads `path` if given, otherwise the first config found under the XDG
    /// locations. Anything unreadable falls back to defaults.
    pub fn load(path: Option<&Path>) -> Self {
        let config_path = path.map(Path::to_path_buf).or_else(Self::find_config_path);

        if let Some(path) = config_path {
            if path.exists() {
                match fs::read_to_string(&path) {
                    Ok(contents) => match Self::from_toml(&contents) {
                        Ok(config) => return config,
                        Err(e) => warn!("Failed to parse config at {:?}: {}", path, e),
                    },
                    Err(e) => warn!("Failed to read config at {:?}: {}", path, e),
                }
            }
        }

        Self::default()
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    fn find_config_path() -> Option<PathBuf> {
        if let Ok(xdg_config) = env::var("XDG_CONFIG_HOME") {
            return Some(PathBuf::from(xdg_config).join(APP_DIR).join("config.toml"));
        }

        if let Ok(home) = env::var("HOME") {
            return Some(
                PathBuf::from(home)
                    .join(".config")
                    .join(APP_DIR)
                    .join("config.toml"),
            );
        }

        None
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CacheOptions {
    pub memory_capacity: usize,
    pub max_memory_percent: f64,
    pub disk_capacity: u64,
    pub disk_path: Option<PathBuf>,
    pub persistent: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            memory_capacity: 4 * 1024 * 1024,
            max_memory_percent: 0.0,
            disk_capacity: 10 * 1024 * 1024,
            disk_path: None,
            persistent: true,
        }
    }
}

impl CacheOptions {
    /// `max_memory_percent` of physical memory when set, else `memory_capacity`.
    pub fn memory_budget(&self) -> usize {
        if self.max_memory_percent <= 0.0 {
            return self.memory_capacity;
        }

        let mut sys = System::new();
        sys.refresh_memory();
        let total_bytes = sys.total_memory() as f64;
        let budget = (total_bytes * (self.max_memory_percent / 100.0)).max(1024.0 * 1024.0);
        budget as usize
    }

    pub fn disk_dir(&self) -> PathBuf {
        if let Some(path) = &self.disk_path {
            return path.clone();
        }

        if let Ok(xdg_cache) = env::var("XDG_CACHE_HOME") {
            return PathBuf::from(xdg_cache).join(APP_DIR);
        }

        if let Ok(home) = env::var("HOME") {
            return PathBuf::from(home).join(".cache").join(APP_DIR);
        }

        env::temp_dir().join(APP_DIR)
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct FetchOptions {
    pub workers: usize,
    pub timeout_secs: u64,
    pub user_agent: String,
    pub max_image_bytes: u64,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            workers: 0,
            timeout_secs: 30,
            user_agent: concat!("image-gallery/", env!("CARGO_PKG_VERSION")).into(),
            max_image_bytes: 10 * 1024 * 1024,
        }
    }
}

impl FetchOptions {
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        }
    }
}
