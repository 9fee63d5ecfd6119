use std::fs;
use std::path::{Path, PathBuf};

use prost::Message;
use tracing::{debug, info};

use super::config::Config;
use super::index::Index;
use super::record::Record;
use super::store::Store;
use crate::common::{Error, Result};

pub const STORE_EXTENSION: &str = "store";
pub const INDEX_EXTENSION: &str = "index";

/// A contiguous range of offsets `[base_offset, next_offset)` backed by one
/// store file and one index file.
///
/// `append` takes `&mut self` and `read` takes `&self`, so a segment shared
/// between threads goes behind a single `RwLock`. That one lock covers both
/// the store write and the index write of an append, so a reader never sees
/// a position that is not indexed yet.
#[derive(Debug)]
pub struct Segment {
    store: Store,
    index: Index,
    base_offset: u64,
    next_offset: u64,
    config: Config,
}

impl Segment {
    /// Opens or creates the segment starting at `base_offset` inside `dir`
    /// and recovers the next offset from the last index entry.
    pub fn new(dir: impl AsRef<Path>, base_offset: u64, config: Config) -> Result<Self> {
        config.validate()?;
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| Error::io("create_dir", dir, e))?;

        let store = Store::open(Self::file_path(dir, base_offset, STORE_EXTENSION))?;
        let index = Index::open(Self::file_path(dir, base_offset, INDEX_EXTENSION), &config)?;

        let next_offset = match index.read(-1) {
            Ok((last, _)) => base_offset
                .checked_add(last as u64 + 1)
                .ok_or_else(|| {
                    Error::Corruption(format!(
                        "index entry {} overflows base offset {}",
                        last, base_offset
                    ))
                })?,
            Err(Error::EndOfData) => base_offset,
            Err(err) => return Err(err),
        };

        info!(
            dir = %dir.display(),
            base_offset = base_offset,
            next_offset = next_offset,
            store_size = store.size(),
            "opened segment"
        );
        Ok(Segment {
            store,
            index,
            base_offset,
            next_offset,
            config,
        })
    }

    pub fn file_path(dir: &Path, base_offset: u64, extension: &str) -> PathBuf {
        dir.join(format!("{}.{}", base_offset, extension))
    }

    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store_size(&self) -> u64 {
        self.store.size()
    }

    pub fn index_size(&self) -> u64 {
        self.index.size()
    }

    /// Appends `record`, stamping it with the assigned offset.
    ///
    /// A full index surfaces as `Error::EndOfData`; the caller is expected to
    /// roll over to a new segment.
    pub fn append(&mut self, record: &mut Record) -> Result<u64> {
        let offset = self.next_offset;
        let relative = u32::try_from(offset - self.base_offset).map_err(|_| Error::EndOfData)?;
        // u64::MAX is never assigned; nothing could follow it.
        let next_offset = offset.checked_add(1).ok_or(Error::EndOfData)?;
        record.offset = offset;

        let (_, pos) = self.store.append(&record.encode_to_vec())?;
        self.index.write(relative, pos)?;

        self.next_offset = next_offset;
        Ok(offset)
    }

    /// Reads the record at `offset`.
    pub fn read(&self, offset: u64) -> Result<Record> {
        if offset < self.base_offset || offset >= self.next_offset {
            return Err(Error::NotFound(format!(
                "offset {} is outside segment [{}, {})",
                offset, self.base_offset, self.next_offset
            )));
        }

        let (_, pos) = self.index.read((offset - self.base_offset) as i64)?;
        let payload = self.store.read(pos)?;
        let mut record = Record::decode(payload.as_slice())?;
        record.offset = offset;
        Ok(record)
    }

    /// True once either file reached its limit. No append should follow.
    pub fn is_maxed(&self) -> bool {
        self.store.size() >= self.config.segment.max_store_bytes || self.index.is_full()
    }

    /// Closes the index, then the store. Both are attempted.
    pub fn close(self) -> Result<()> {
        let Segment {
            store,
            index,
            base_offset,
            next_offset,
            ..
        } = self;
        let index_closed = index.close();
        let store_closed = store.close();
        debug!(base_offset = base_offset, next_offset = next_offset, "closed segment");
        index_closed.and(store_closed)
    }

    /// Closes the segment and deletes both of its files.
    pub fn remove(self) -> Result<()> {
        let index_path = self.index.name().to_path_buf();
        let store_path = self.store.path().to_path_buf();
        let base_offset = self.base_offset;

        let closed = self.close();
        let index_removed =
            fs::remove_file(&index_path).map_err(|e| Error::io("remove", &index_path, e));
        let store_removed =
            fs::remove_file(&store_path).map_err(|e| Error::io("remove", &store_path, e));

        info!(base_offset = base_offset, "removed segment");
        closed.and(index_removed).and(store_removed)
    }
}
