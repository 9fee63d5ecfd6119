pub mod log;
pub mod memory;

pub use self::log::{Config, Record, Segment};
pub use memory::MemoryLog;
