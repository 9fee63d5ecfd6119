use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use tracing::{debug, warn};

use super::config::Config;
use crate::common::{Error, Result};

const OFFSET_WIDTH: u64 = 4;
const POSITION_WIDTH: u64 = 8;
/// Bytes taken by one `(relative offset, position)` entry.
pub const ENTRY_WIDTH: u64 = OFFSET_WIDTH + POSITION_WIDTH;

/// Fixed-width, memory-mapped index from relative offsets to store positions.
///
/// While open the file is grown to `max_index_bytes` so the map never has to
/// be remapped; `close` shrinks it back to the bytes actually written. A
/// reopened index therefore learns its entry count from the file length.
#[derive(Debug)]
pub struct Index {
    path: PathBuf,
    max_bytes: u64,
    size: u64,
    mapped: Option<Mapped>,
}

#[derive(Debug)]
struct Mapped {
    file: File,
    mmap: MmapMut,
}

impl Index {
    /// Opens `path`, creating it when missing.
    pub fn open(path: impl AsRef<Path>, config: &Config) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| Error::io("open", path, e))?;
        Self::new(file, path, config)
    }

    /// Builds an index over an already opened read-write file.
    pub fn new(file: File, path: impl Into<PathBuf>, config: &Config) -> Result<Self> {
        let path = path.into();
        let max_bytes = config.segment.max_index_bytes;
        let size = file
            .metadata()
            .map_err(|e| Error::io("stat", &path, e))?
            .len();

        if size % ENTRY_WIDTH != 0 {
            return Err(Error::Corruption(format!(
                "index {} has length {} which is not a multiple of {}",
                path.display(),
                size,
                ENTRY_WIDTH
            )));
        }
        if size > max_bytes {
            return Err(Error::Config(format!(
                "index {} holds {} bytes, more than the configured {}",
                path.display(),
                size,
                max_bytes
            )));
        }

        file.set_len(max_bytes)
            .map_err(|e| Error::io("truncate", &path, e))?;

        // SAFETY: the file is owned by this index for the lifetime of the map
        // and is only resized after the map is dropped.
        let mmap = match unsafe { MmapMut::map_mut(&file) } {
            Ok(mmap) => mmap,
            Err(err) => {
                if let Err(shrink) = file.set_len(size) {
                    warn!(path = %path.display(), err = %shrink, "failed to shrink index after map failure");
                }
                return Err(Error::io("mmap", &path, err));
            }
        };

        debug!(path = %path.display(), size = size, max_bytes = max_bytes, "opened index");
        Ok(Index {
            path,
            max_bytes,
            size,
            mapped: Some(Mapped { file, mmap }),
        })
    }

    pub fn name(&self) -> &Path {
        &self.path
    }

    /// Bytes of real entries.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Number of entries written.
    pub fn len(&self) -> u64 {
        self.size / ENTRY_WIDTH
    }

    /// Reads entry `entry`, or the last entry when `entry` is `-1`.
    pub fn read(&self, entry: i64) -> Result<(u32, u64)> {
        let mapped = self.mapped()?;
        let entries = self.len() as i64;
        let entry = if entry == -1 { entries - 1 } else { entry };
        if entry < 0 || entry >= entries {
            return Err(Error::EndOfData);
        }

        let pos = entry as usize * ENTRY_WIDTH as usize;
        let buf = &mapped.mmap[pos..pos + ENTRY_WIDTH as usize];
        let mut off = [0u8; OFFSET_WIDTH as usize];
        off.copy_from_slice(&buf[..OFFSET_WIDTH as usize]);
        let mut position = [0u8; POSITION_WIDTH as usize];
        position.copy_from_slice(&buf[OFFSET_WIDTH as usize..]);
        Ok((u32::from_be_bytes(off), u64::from_be_bytes(position)))
    }

    /// True when another entry would not fit, even if `max_index_bytes` is
    /// not a multiple of the entry width.
    pub fn is_full(&self) -> bool {
        self.size + ENTRY_WIDTH > self.max_bytes
    }

    /// Appends an entry. Fails with `EndOfData` when the index is full.
    pub fn write(&mut self, offset: u32, position: u64) -> Result<()> {
        if self.is_full() {
            return Err(Error::EndOfData);
        }
        let pos = self.size as usize;
        let mapped = self.mapped_mut()?;
        let buf = &mut mapped.mmap[pos..pos + ENTRY_WIDTH as usize];
        buf[..OFFSET_WIDTH as usize].copy_from_slice(&offset.to_be_bytes());
        buf[OFFSET_WIDTH as usize..].copy_from_slice(&position.to_be_bytes());
        self.size += ENTRY_WIDTH;
        Ok(())
    }

    /// Flushes the map and shrinks the file to the bytes written.
    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    // Every step runs even if an earlier one failed, otherwise the file
    // would be left at its preallocated size and be misread on reopen.
    fn release(&mut self) -> Result<()> {
        let Some(Mapped { file, mmap }) = self.mapped.take() else {
            return Ok(());
        };
        let mut result = mmap.flush().map_err(|e| Error::io("msync", &self.path, e));
        drop(mmap);

        let synced = file.sync_all().map_err(|e| Error::io("sync", &self.path, e));
        result = result.and(synced);
        let truncated = file
            .set_len(self.size)
            .map_err(|e| Error::io("truncate", &self.path, e));
        result = result.and(truncated);
        let synced = file.sync_all().map_err(|e| Error::io("sync", &self.path, e));
        result = result.and(synced);

        debug!(path = %self.path.display(), size = self.size, "closed index");
        result
    }

    fn mapped(&self) -> Result<&Mapped> {
        self.mapped
            .as_ref()
            .ok_or_else(|| Error::Internal(format!("index {} is closed", self.path.display())))
    }

    fn mapped_mut(&mut self) -> Result<&mut Mapped> {
        let path = &self.path;
        self.mapped
            .as_mut()
            .ok_or_else(|| Error::Internal(format!("index {} is closed", path.display())))
    }
}

impl Drop for Index {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!(path = %self.path.display(), err = %err, "failed to release index");
        }
    }
}
