use crate::segmentation::Segmentation;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for a tap-to-tap skim cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding the static, dynamic and trace artifacts
    pub dir: PathBuf,

    /// Start from an empty cache and allow persisting partial caches (default: false)
    pub rebuild: bool,

    /// Dump a csv copy of the table whenever a dirty cache is flushed (default: false)
    pub trace_as_csv: bool,

    /// Buffer size for artifact writers (default: 1MB)
    pub write_buffer_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./tvpb_cache"),
            rebuild: false,
            trace_as_csv: false,
            write_buffer_size: 1024 * 1024, // 1MB
        }
    }
}

impl CacheConfig {
    /// Create a new config with the given cache directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Request a rebuild of the cache
    pub fn rebuild(mut self, enabled: bool) -> Self {
        self.rebuild = enabled;
        self
    }

    /// Enable the csv trace dump
    pub fn trace_as_csv(mut self, enabled: bool) -> Self {
        self.trace_as_csv = enabled;
        self
    }

    /// Set artifact writer buffer size
    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }
}

/// Tap-to-tap settings as produced by the external settings loader.
///
/// `attribute_segments` keeps its declaration order, which is the canonical
/// order used for uid composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TapTapSettings {
    pub attribute_segments: Segmentation,
    /// Column names of the utility spec, one cached value per set
    pub set_names: Vec<String>,
}

impl TapTapSettings {
    pub fn new(attribute_segments: Segmentation, set_names: Vec<String>) -> Self {
        Self {
            attribute_segments,
            set_names,
        }
    }
}
