use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::common::{Error, Result};

/// Width of the big-endian length prefix in front of every frame.
pub const LEN_WIDTH: u64 = 8;

/// Append-only file of length-prefixed frames.
///
/// Appends are buffered. Every read flushes first, so the buffered writer
/// and the size are kept under a single lock.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    inner: Mutex<Option<StoreInner>>,
}

#[derive(Debug)]
struct StoreInner {
    writer: BufWriter<File>,
    size: u64,
    failed: bool,
}

impl Store {
    /// Opens `path` for appending, creating it when missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .map_err(|e| Error::io("open", path, e))?;
        Self::new(file, path)
    }

    /// Wraps an already opened file. It must be readable and opened in
    /// append mode.
    pub(crate) fn new(file: File, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let size = file
            .metadata()
            .map_err(|e| Error::io("stat", &path, e))?
            .len();
        debug!(path = %path.display(), size = size, "opened store");
        Ok(Store {
            path,
            inner: Mutex::new(Some(StoreInner {
                writer: BufWriter::new(file),
                size,
                failed: false,
            })),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Position the next frame will start at.
    pub fn size(&self) -> u64 {
        match self.inner.lock() {
            Ok(guard) => guard.as_ref().map_or(0, |inner| inner.size),
            Err(poisoned) => poisoned.into_inner().as_ref().map_or(0, |inner| inner.size),
        }
    }

    /// Appends one frame and returns `(bytes written, frame position)`.
    pub fn append(&self, payload: &[u8]) -> Result<(u64, u64)> {
        let mut guard = self.inner.lock()?;
        let inner = Self::opened(&mut guard, &self.path)?;

        if inner.failed {
            return Err(Error::Internal(format!(
                "store {} refuses appends after a partial write",
                self.path.display()
            )));
        }

        let pos = inner.size;
        let framed = inner
            .writer
            .write_all(&(payload.len() as u64).to_be_bytes())
            .and_then(|_| inner.writer.write_all(payload));
        if let Err(err) = framed {
            // Part of the frame may already be buffered or on disk, so
            // `size` no longer matches where the next frame would land.
            inner.failed = true;
            warn!(path = %self.path.display(), pos = pos, err = %err, "partial frame write");
            return Err(Error::io("append", &self.path, err));
        }

        let written = LEN_WIDTH + payload.len() as u64;
        inner.size += written;
        Ok((written, pos))
    }

    /// Reads the payload of the frame starting at `pos`.
    pub fn read(&self, pos: u64) -> Result<Vec<u8>> {
        let mut guard = self.inner.lock()?;
        let inner = Self::opened(&mut guard, &self.path)?;
        if pos.checked_add(LEN_WIDTH).map_or(true, |end| end > inner.size) {
            return Err(Error::EndOfData);
        }
        let size = inner.size;
        let file = Self::flushed_at(inner, pos, &self.path)?;

        let mut len_buf = [0u8; LEN_WIDTH as usize];
        file.read_exact(&mut len_buf)
            .map_err(|e| Error::io("read", &self.path, e))?;
        let len = u64::from_be_bytes(len_buf);

        let available = size - pos - LEN_WIDTH;
        if len > available {
            return Err(Error::Corruption(format!(
                "frame at {} in {} claims {} bytes but only {} remain",
                pos,
                self.path.display(),
                len,
                available
            )));
        }

        let mut payload = vec![0u8; len as usize];
        file.read_exact(&mut payload)
            .map_err(|e| Error::io("read", &self.path, e))?;
        Ok(payload)
    }

    /// Raw positional read. Fills as much of `buf` as the store holds past
    /// `offset` and returns the number of bytes copied.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let mut guard = self.inner.lock()?;
        let inner = Self::opened(&mut guard, &self.path)?;
        if buf.is_empty() {
            return Ok(0);
        }
        if offset >= inner.size {
            return Err(Error::EndOfData);
        }
        let n = buf.len().min((inner.size - offset) as usize);
        let file = Self::flushed_at(inner, offset, &self.path)?;
        file.read_exact(&mut buf[..n])
            .map_err(|e| Error::io("read_at", &self.path, e))?;
        Ok(n)
    }

    /// Flushes buffered frames, syncs the file and releases the handle.
    pub fn close(self) -> Result<()> {
        let inner = self.inner.lock()?.take();
        match inner {
            Some(inner) => Self::release(inner, &self.path),
            None => Ok(()),
        }
    }

    fn release(mut inner: StoreInner, path: &Path) -> Result<()> {
        let flushed = inner
            .writer
            .flush()
            .map_err(|e| Error::io("flush", path, e));
        let synced = inner
            .writer
            .get_ref()
            .sync_all()
            .map_err(|e| Error::io("sync", path, e));
        debug!(path = %path.display(), size = inner.size, "closed store");
        flushed.and(synced)
    }

    fn opened<'a>(inner: &'a mut Option<StoreInner>, path: &Path) -> Result<&'a mut StoreInner> {
        inner
            .as_mut()
            .ok_or_else(|| Error::Internal(format!("store {} is closed", path.display())))
    }

    // Writes land at the end regardless of the cursor because the file is
    // in append mode, so seeking here only affects reads.
    fn flushed_at<'a>(inner: &'a mut StoreInner, pos: u64, path: &Path) -> Result<&'a mut File> {
        inner
            .writer
            .flush()
            .map_err(|e| Error::io("flush", path, e))?;
        let file = inner.writer.get_mut();
        file.seek(SeekFrom::Start(pos))
            .map_err(|e| Error::io("seek", path, e))?;
        Ok(file)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        let inner = match self.inner.get_mut() {
            Ok(inner) => inner.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(inner) = inner {
            if let Err(err) = Self::release(inner, &self.path) {
                warn!(path = %self.path.display(), err = %err, "failed to release store");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};
    use std::sync::Arc;
    use tempfile::tempdir;

    const WRITE: &[u8] = b"hello world";
    const WIDTH: u64 = WRITE.len() as u64 + LEN_WIDTH;

    fn append_three(s: &Store) {
        for i in 1..4u64 {
            let (n, pos) = s.append(WRITE).unwrap();
            assert_eq!(pos + n, WIDTH * i);
        }
    }

    fn read_three(s: &Store) {
        let mut pos = 0;
        for _ in 1..4 {
            let read = s.read(pos).unwrap();
            assert_eq!(read, WRITE);
            pos += WIDTH;
        }
    }

    fn read_at_three(s: &Store) {
        let mut off = 0u64;
        for _ in 1..4 {
            let mut len_buf = [0u8; LEN_WIDTH as usize];
            let n = s.read_at(&mut len_buf, off).unwrap();
            assert_eq!(n, LEN_WIDTH as usize);
            off += n as u64;

            let size = u64::from_be_bytes(len_buf);
            let mut b = vec![0u8; size as usize];
            let n = s.read_at(&mut b, off).unwrap();
            assert_eq!(b, WRITE);
            assert_eq!(n, size as usize);
            off += n as u64;
        }
    }

    #[test]
    fn test_store_append_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store_append_read_test");

        let s = Store::open(&path).unwrap();
        append_three(&s);
        read_three(&s);
        read_at_three(&s);
        s.close().unwrap();

        let s = Store::open(&path).unwrap();
        assert_eq!(s.size(), WIDTH * 3);
        read_three(&s);
    }

    #[test]
    fn test_positions() {
        let dir = tempdir().unwrap();
        let s = Store::open(dir.path().join("0.store")).unwrap();

        let positions: Vec<u64> = (0..3).map(|_| s.append(WRITE).unwrap().1).collect();
        assert_eq!(positions, vec![0, 19, 38]);
        assert_eq!(s.size(), 57);
    }

    #[test]
    fn test_read_out_of_range() {
        let dir = tempdir().unwrap();
        let s = Store::open(dir.path().join("0.store")).unwrap();
        assert_eq!(s.read(0), Err(Error::EndOfData));

        s.append(WRITE).unwrap();
        assert_eq!(s.read(WIDTH), Err(Error::EndOfData));
        assert_eq!(s.read(u64::MAX), Err(Error::EndOfData));

        let mut buf = [0u8; 4];
        assert_eq!(s.read_at(&mut buf, WIDTH), Err(Error::EndOfData));
    }

    #[test]
    fn test_read_at_short() {
        let dir = tempdir().unwrap();
        let s = Store::open(dir.path().join("0.store")).unwrap();
        s.append(WRITE).unwrap();

        let mut buf = [0u8; 64];
        let n = s.read_at(&mut buf, LEN_WIDTH).unwrap();
        assert_eq!(n, WRITE.len());
        assert_eq!(&buf[..n], WRITE);
    }

    #[test]
    fn test_truncated_frame_is_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0.store");
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(&100u64.to_be_bytes()).unwrap();
            f.write_all(b"short").unwrap();
        }

        let s = Store::open(&path).unwrap();
        assert!(matches!(s.read(0), Err(Error::Corruption(_))));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_partial_write_refuses_later_appends() {
        // Writes to /dev/full fail with ENOSPC. The prefix fits the buffer;
        // a payload larger than the buffer forces a flush that fails.
        let s = Store::open("/dev/full").unwrap();
        let big = vec![0u8; 64 * 1024];
        assert!(matches!(s.append(&big), Err(Error::Io { .. })));
        assert_eq!(s.size(), 0);

        assert!(matches!(s.append(WRITE), Err(Error::Internal(_))));
        assert_eq!(s.size(), 0);
    }

    #[test]
    fn test_random_payloads() {
        let dir = tempdir().unwrap();
        let s = Store::open(dir.path().join("0.store")).unwrap();
        let mut rng = SmallRng::seed_from_u64(7);

        let mut written = Vec::new();
        for _ in 0..64 {
            let len = rng.gen_range(0..512);
            let payload: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            let size_before = s.size();
            let (n, pos) = s.append(&payload).unwrap();
            assert_eq!(pos, size_before);
            assert_eq!(pos + n, s.size());
            written.push((pos, payload));
        }

        for (pos, payload) in written {
            assert_eq!(s.read(pos).unwrap(), payload);
        }
    }

    #[test]
    fn test_concurrent_appends() {
        let dir = tempdir().unwrap();
        let s = Arc::new(Store::open(dir.path().join("0.store")).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = Arc::clone(&s);
                std::thread::spawn(move || {
                    (0..16)
                        .map(|_| {
                            let (_, pos) = s.append(WRITE).unwrap();
                            assert_eq!(s.read(pos).unwrap(), WRITE);
                            pos
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut positions: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        positions.sort_unstable();
        let expected: Vec<u64> = (0..128).map(|i| i * WIDTH).collect();
        assert_eq!(positions, expected);
    }
}
