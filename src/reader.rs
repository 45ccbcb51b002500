//! Source read strategies: memory-mapped random access (default) and plain
//! sequential I/O (linear devices). Both expose the same fixed-batch
//! slice-read abstraction so the copy stage doesn't need to know which one
//! it has.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

/// A single read pass over a source file, yielding fixed-size batches as
/// refcounted immutable slices so the same buffer can be broadcast to
/// every destination writer without copying.
pub trait SourceReader: Send {
    /// Reads up to `batch_size` bytes. Returns `Ok(None)` at EOF.
    fn next_batch(&mut self, batch_size: usize) -> io::Result<Option<Arc<[u8]>>>;

    fn len(&self) -> u64;
}

/// Random-access reader backed by a memory map. Appropriate for ordinary
/// disks where the OS can page the file in efficiently.
#[cfg(unix)]
pub struct MmapReader {
    map: Option<memmap2::Mmap>,
    len: u64,
    offset: usize,
}

#[cfg(unix)]
impl MmapReader {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        let map = if len == 0 {
            None
        } else {
            Some(unsafe { memmap2::Mmap::map(&file)? })
        };
        Ok(MmapReader { map, len, offset: 0 })
    }
}

#[cfg(unix)]
impl SourceReader for MmapReader {
    fn next_batch(&mut self, batch_size: usize) -> io::Result<Option<Arc<[u8]>>> {
        let map = match &self.map {
            Some(m) => m,
            None => return Ok(None),
        };
        if self.offset >= map.len() {
            return Ok(None);
        }
        let end = (self.offset + batch_size).min(map.len());
        let slice: Arc<[u8]> = Arc::from(&map[self.offset..end]);
        self.offset = end;
        Ok(Some(slice))
    }

    fn len(&self) -> u64 {
        self.len
    }
}

/// Plain sequential reader: used for linear (tape-like) source devices
/// that cannot reposition quickly, and as the portable fallback off Unix.
pub struct SequentialReader {
    file: File,
    len: u64,
}

impl SequentialReader {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(SequentialReader { file, len })
    }
}

impl SourceReader for SequentialReader {
    fn next_batch(&mut self, batch_size: usize) -> io::Result<Option<Arc<[u8]>>> {
        let mut buf = vec![0u8; batch_size];
        let mut filled = 0;
        loop {
            let n = self.file.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
            if filled == buf.len() {
                break;
            }
        }
        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);
        Ok(Some(Arc::from(buf.into_boxed_slice())))
    }

    fn len(&self) -> u64 {
        self.len
    }
}

/// Opens the appropriate reader for a given device discipline.
pub fn open(path: &Path, linear: bool) -> io::Result<Box<dyn SourceReader>> {
    if linear {
        return Ok(Box::new(SequentialReader::open(path)?));
    }

    #[cfg(unix)]
    {
        Ok(Box::new(MmapReader::open(path)?))
    }
    #[cfg(not(unix))]
    {
        Ok(Box::new(SequentialReader::open(path)?))
    }
}
