use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use xxhash_rust::xxh3::xxh3_64;

use crate::error::{Error, Result};

/// Physical bytes per page on disk.
pub const PAGE_SIZE: u64 = 1024;

/// Trailing xxh3-64 checksum per page.
pub const PAGE_CHECKSUM_SIZE: u64 = 8;

/// Usable payload bytes per page.
pub const PAGE_PAYLOAD: u64 = PAGE_SIZE - PAGE_CHECKSUM_SIZE;

/// Which address space an offset lives in.
///
/// Physical offsets index raw bytes on disk, including the checksum trailer
/// of every page. Logical offsets index the concatenation of page payloads,
/// which is the only address space the packet layer ever sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetKind {
    Physical,
    Logical,
}

/// Page-oriented file with a per-page checksum.
///
/// Every 1024-byte physical page carries 1016 payload bytes followed by the
/// xxh3-64 of those bytes. Reads verify the checksum of each page they
/// touch; writes are read-modify-write per page and re-seal the checksum.
/// A write that lands past the current end of file materialises the missing
/// pages as sealed zero pages, so every page on disk is always verifiable.
pub struct CheckedFile {
    file: File,
    writable: bool,
    /// Current position, in logical bytes.
    position: u64,
    /// Bytes on disk; always a multiple of `PAGE_SIZE`.
    physical_length: u64,
}

impl CheckedFile {
    /// Create a new file, truncating any existing one.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            file,
            writable: true,
            position: 0,
            physical_length: 0,
        })
    }

    /// Open an existing file read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let physical_length = file.metadata()?.len();
        if physical_length % PAGE_SIZE != 0 {
            return Err(Error::BadBuffer(format!(
                "file length {} is not page-aligned",
                physical_length
            )));
        }
        Ok(Self {
            file,
            writable: false,
            position: 0,
            physical_length,
        })
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Move the cursor. Physical offsets are converted to logical.
    pub fn seek(&mut self, offset: u64, kind: OffsetKind) -> Result<()> {
        self.position = match kind {
            OffsetKind::Logical => offset,
            OffsetKind::Physical => self.physical_to_logical(offset),
        };
        Ok(())
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// File length in the requested address space.
    pub fn length(&self, kind: OffsetKind) -> u64 {
        match kind {
            OffsetKind::Physical => self.physical_length,
            OffsetKind::Logical => (self.physical_length / PAGE_SIZE) * PAGE_PAYLOAD,
        }
    }

    /// Map a physical offset to the logical offset of the same payload byte.
    /// Offsets pointing into a checksum trailer clamp to the end of that
    /// page's payload.
    pub fn physical_to_logical(&self, offset: u64) -> u64 {
        let page = offset / PAGE_SIZE;
        let within = (offset % PAGE_SIZE).min(PAGE_PAYLOAD);
        page * PAGE_PAYLOAD + within
    }

    /// Map a logical offset to the physical offset of the same payload byte.
    pub fn logical_to_physical(&self, offset: u64) -> u64 {
        let page = offset / PAGE_PAYLOAD;
        let within = offset % PAGE_PAYLOAD;
        page * PAGE_SIZE + within
    }

    /// Read exactly `buf.len()` logical bytes at the cursor, verifying the
    /// checksum of every page touched.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0usize;
        while filled < buf.len() {
            let page = self.position / PAGE_PAYLOAD;
            let within = (self.position % PAGE_PAYLOAD) as usize;
            let page_bytes = self.read_page(page)?;

            let n = (buf.len() - filled).min(PAGE_PAYLOAD as usize - within);
            buf[filled..filled + n].copy_from_slice(&page_bytes[within..within + n]);
            filled += n;
            self.position += n as u64;
        }
        Ok(())
    }

    /// Write `buf` at the cursor, read-modify-writing each page it touches
    /// and re-sealing the page checksum.
    pub fn write(&mut self, buf: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(Error::FileReadOnly);
        }
        let mut written = 0usize;
        while written < buf.len() {
            let page = self.position / PAGE_PAYLOAD;
            let within = (self.position % PAGE_PAYLOAD) as usize;

            let mut page_bytes = if page * PAGE_SIZE < self.physical_length {
                self.read_page(page)?
            } else {
                [0u8; PAGE_PAYLOAD as usize]
            };

            let n = (buf.len() - written).min(PAGE_PAYLOAD as usize - within);
            page_bytes[within..within + n].copy_from_slice(&buf[written..written + n]);
            self.write_page(page, &page_bytes)?;

            written += n;
            self.position += n as u64;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }

    /// Read and verify one page, returning its payload.
    fn read_page(&mut self, page: u64) -> Result<[u8; PAGE_PAYLOAD as usize]> {
        let physical = page * PAGE_SIZE;
        if physical >= self.physical_length {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("read past end of file (page {})", page),
            )));
        }
        self.file.seek(SeekFrom::Start(physical))?;
        let mut raw = [0u8; PAGE_SIZE as usize];
        self.file.read_exact(&mut raw)?;

        let stored = u64::from_le_bytes(raw[PAGE_PAYLOAD as usize..].try_into().unwrap());
        let computed = xxh3_64(&raw[..PAGE_PAYLOAD as usize]);
        if stored != computed {
            return Err(Error::ChecksumMismatch { offset: physical });
        }

        let mut payload = [0u8; PAGE_PAYLOAD as usize];
        payload.copy_from_slice(&raw[..PAGE_PAYLOAD as usize]);
        Ok(payload)
    }

    /// Seal and write one page. Pages between the old end of file and `page`
    /// are materialised as sealed zero pages first.
    fn write_page(&mut self, page: u64, payload: &[u8; PAGE_PAYLOAD as usize]) -> Result<()> {
        let zero = [0u8; PAGE_PAYLOAD as usize];
        let mut next = self.physical_length / PAGE_SIZE;
        while next < page {
            self.write_raw_page(next, &zero)?;
            next += 1;
        }
        self.write_raw_page(page, payload)
    }

    fn write_raw_page(&mut self, page: u64, payload: &[u8; PAGE_PAYLOAD as usize]) -> Result<()> {
        let mut raw = [0u8; PAGE_SIZE as usize];
        raw[..PAGE_PAYLOAD as usize].copy_from_slice(payload);
        let checksum = xxh3_64(payload);
        raw[PAGE_PAYLOAD as usize..].copy_from_slice(&checksum.to_le_bytes());

        self.file.seek(SeekFrom::Start(page * PAGE_SIZE))?;
        self.file.write_all(&raw)?;
        self.physical_length = self.physical_length.max((page + 1) * PAGE_SIZE);
        Ok(())
    }
}
