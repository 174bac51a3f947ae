pub mod buffer;
pub mod cache;
pub mod config;
pub mod error;
pub mod flock;
pub mod hasher;
pub mod metrics;
pub mod multi_writer;
pub mod persist;
pub mod segmentation;
pub mod table;
pub mod uid;

pub use buffer::{BufferRegistry, DataBuffer, SharedBuffer, UNSET};
pub use cache::{FlushOutcome, OpenMode, TvpbCache};
pub use config::{CacheConfig, TapTapSettings};
pub use error::{Error, Result};
pub use hasher::Hasher;
pub use multi_writer::MultiWriter;
pub use persist::CacheKind;
pub use segmentation::{AttributeValue, Attributes, Ordinalizer, Segmentation};
pub use table::CacheTable;
pub use uid::TapTapUidCalculator;
