//! Storage core of a commit log: an append-only store, a memory-mapped
//! offset index and the segment that ties them together.

pub mod common;
pub mod storage;
