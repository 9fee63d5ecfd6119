//! Segmented, file-backed commit log storage.

pub mod config;
pub mod index;
pub mod record;
pub mod segment;
pub mod store;

pub use config::{Config, SegmentConfig};
pub use index::{Index, ENTRY_WIDTH};
pub use record::Record;
pub use segment::Segment;
pub use store::{Store, LEN_WIDTH};
