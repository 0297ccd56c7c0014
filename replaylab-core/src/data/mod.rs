//! Market data: cache, remote stores, window planning and the feed.

pub mod cache;
pub mod calendar;
pub mod feed;
pub mod memory;
pub mod provider;
pub mod remote;
pub mod synthetic;

pub use cache::{CacheMeta, CacheStatus, ParquetCache};
pub use calendar::{MissingUnits, TimeSpan};
pub use feed::{DataFeed, LoadReport, LoadRequest, PreparedData, SnapshotSource};
pub use memory::MemoryStore;
pub use provider::{sanitize_symbol, CacheStore, DataError, RemoteStore};
pub use remote::HttpStore;
pub use synthetic::{SyntheticConfig, SyntheticStore};
