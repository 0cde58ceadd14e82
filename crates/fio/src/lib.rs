//! # fio — file IO backends
//!
//! The storage layer reads and writes data files through one of two
//! backends:
//!
//! - [`StandardIo`]: an OS file handle with positional reads and appending
//!   writes. Used for every file the engine keeps open during normal
//!   operation.
//! - [`MmapIo`]: a read-only memory map. Used only while the engine scans
//!   existing files at startup, where sequential decoding of whole segments
//!   benefits from mapping; once the scan finishes the engine swaps every
//!   file back to [`StandardIo`].
//!
//! Both sit behind [`IoBackend`], a closed two-variant enum dispatched at
//! construction time. The capability set is `read` / `write` / `sync` /
//! `size`; dropping a backend closes the underlying handle.
//!
//! Reading past the end of a file is not an error: both backends return the
//! number of bytes actually copied, and `0` signals end-of-data. Writing or
//! syncing a memory-mapped backend fails with [`std::io::ErrorKind::Unsupported`].

use memmap2::Mmap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Which backend a file should be opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoType {
    /// Positional reads and appending writes over an OS file handle.
    Standard,
    /// Read-only memory map, for startup scans.
    Mmap,
}

/// A file IO backend. Closed set — the two variants are the only ones the
/// engine ever constructs, so they are dispatched as an enum rather than a
/// trait object.
#[derive(Debug)]
pub enum IoBackend {
    Standard(StandardIo),
    Mmap(MmapIo),
}

impl IoBackend {
    /// Opens (or creates) `path` with the requested backend.
    pub fn open(path: &Path, io_type: IoType) -> io::Result<Self> {
        match io_type {
            IoType::Standard => Ok(IoBackend::Standard(StandardIo::open(path)?)),
            IoType::Mmap => Ok(IoBackend::Mmap(MmapIo::open(path)?)),
        }
    }

    /// Reads up to `buf.len()` bytes starting at `offset`. Returns the number
    /// of bytes copied; `0` (or any count short of `buf.len()`) means the
    /// file ended first.
    pub fn read(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        match self {
            IoBackend::Standard(io) => io.read(buf, offset),
            IoBackend::Mmap(io) => io.read(buf, offset),
        }
    }

    /// Appends `buf` to the end of the file and returns the number of bytes
    /// written.
    pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            IoBackend::Standard(io) => io.write(buf),
            IoBackend::Mmap(io) => io.write(buf),
        }
    }

    /// Flushes kernel buffers to stable storage.
    pub fn sync(&self) -> io::Result<()> {
        match self {
            IoBackend::Standard(io) => io.sync(),
            IoBackend::Mmap(io) => io.sync(),
        }
    }

    /// Current length of the file in bytes.
    pub fn size(&self) -> io::Result<u64> {
        match self {
            IoBackend::Standard(io) => io.size(),
            IoBackend::Mmap(io) => io.size(),
        }
    }
}

/// Positional IO over an ordinary file handle.
///
/// The file is opened in append mode, so `write` always lands at the current
/// end regardless of any reads that happened in between.
#[derive(Debug)]
pub struct StandardIo {
    file: File,
}

impl StandardIo {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        Ok(Self { file })
    }

    pub fn read(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = match read_at(&self.file, &mut buf[filled..], offset + filled as u64) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }

    pub fn size(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

/// Read-only memory map over a file.
///
/// A zero-length file maps to nothing (mapping an empty file is an error on
/// most platforms), so `map` is `None` until the file has content.
#[derive(Debug)]
pub struct MmapIo {
    map: Option<Mmap>,
    len: u64,
}

impl MmapIo {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        let len = file.metadata()?.len();
        let map = if len == 0 {
            None
        } else {
            // Safety: the engine never writes through a file opened with the
            // mmap backend, and data files are append-only, so the mapped
            // prefix is immutable for the lifetime of the map.
            Some(unsafe { Mmap::map(&file)? })
        };
        Ok(Self { map, len })
    }

    pub fn read(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let Some(map) = &self.map else {
            return Ok(0);
        };
        if offset >= self.len {
            return Ok(0);
        }
        let start = offset as usize;
        let end = (start + buf.len()).min(map.len());
        let n = end - start;
        buf[..n].copy_from_slice(&map[start..end]);
        Ok(n)
    }

    pub fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "memory-mapped files are read-only",
        ))
    }

    pub fn sync(&self) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "memory-mapped files are read-only",
        ))
    }

    pub fn size(&self) -> io::Result<u64> {
        Ok(self.len)
    }
}
