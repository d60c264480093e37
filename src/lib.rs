// RustyHTTP core - memory management and wildcard hashing for the server
// Core library module

pub mod common;
pub mod error;
pub mod hash;
pub mod memory;

pub use error::{CoreError, Result, Status};

use serde::{Deserialize, Serialize};

/// Core library configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Size in bytes of each arena pool block.
    pub pool_size: usize,
    /// Smallest slab chunk class, as a power-of-two shift.
    pub slab_min_shift: usize,
    /// Upper bound on the bucket count of built hash tables.
    pub hash_max_size: usize,
    /// Byte budget of a single hash bucket.
    pub hash_bucket_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool_size: memory::pool::DEFAULT_POOL_SIZE,
            slab_min_shift: memory::slab::DEFAULT_MIN_SHIFT,
            hash_max_size: 512,
            hash_bucket_size: 64,
        }
    }
}

impl Config {
    /// Loads a configuration from a JSON file.
    pub fn from_file(path: &std::path::Path) -> Result<Config> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Configuration(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&text)
            .map_err(|e| CoreError::Configuration(format!("{}: {}", path.display(), e)))
    }
}
