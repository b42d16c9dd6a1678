//! Shared image-file handle.
//!
//! An [`ImageFile`] wraps one [`CheckedFile`] behind a cheaply clonable
//! handle that readers, writers, and compressed-vector nodes share. It owns
//! the reader/writer attachment counts: a reader increments the reader count
//! for its whole lifetime, a writer the writer count, and `close()` refuses
//! to proceed while either is nonzero.
//!
//! Handles are single-threaded (`Rc` inner); the counts themselves are
//! atomic so the accounting stays correct even if a future caller adds
//! external synchronisation around the handle.

use std::cell::{Cell, RefCell};
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::checked_file::{CheckedFile, OffsetKind};
use crate::error::{Error, Result};

/// Magic bytes at logical offset 0: "E57CV1\n" followed by a null byte.
pub const MAGIC: &[u8; 8] = b"E57CV1\n\x00";

/// Fixed size of the file header in bytes.
///   magic[8] + version:u16 + reserved[6] = 16
pub const IMAGE_HEADER_SIZE: u64 = 16;

const FORMAT_VERSION: u16 = 1;

struct Inner {
    file: RefCell<CheckedFile>,
    open: Cell<bool>,
    writable: bool,
    reader_count: AtomicU32,
    writer_count: AtomicU32,
}

#[derive(Clone)]
pub struct ImageFile {
    inner: Rc<Inner>,
}

impl ImageFile {
    /// Create a new image file, truncating any existing one, and write the
    /// file header.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = CheckedFile::create(path)?;

        let mut header = [0u8; IMAGE_HEADER_SIZE as usize];
        header[..8].copy_from_slice(MAGIC);
        header[8..10].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        file.seek(0, OffsetKind::Logical)?;
        file.write(&header)?;

        Ok(Self {
            inner: Rc::new(Inner {
                file: RefCell::new(file),
                open: Cell::new(true),
                writable: true,
                reader_count: AtomicU32::new(0),
                writer_count: AtomicU32::new(0),
            }),
        })
    }

    /// Open an existing image file read-only, checking the header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = CheckedFile::open(path)?;

        let mut header = [0u8; IMAGE_HEADER_SIZE as usize];
        file.seek(0, OffsetKind::Logical)?;
        file.read(&mut header)?;
        if &header[..8] != MAGIC {
            return Err(Error::BadFileSignature("not an e57cv file".into()));
        }
        let version = u16::from_le_bytes(header[8..10].try_into().unwrap());
        if version != FORMAT_VERSION {
            return Err(Error::BadFileSignature(format!(
                "unsupported format version {}",
                version
            )));
        }

        Ok(Self {
            inner: Rc::new(Inner {
                file: RefCell::new(file),
                open: Cell::new(true),
                writable: false,
                reader_count: AtomicU32::new(0),
                writer_count: AtomicU32::new(0),
            }),
        })
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.get()
    }

    pub fn is_writable(&self) -> bool {
        self.inner.writable
    }

    /// Number of readers currently attached.
    pub fn reader_count(&self) -> u32 {
        self.inner.reader_count.load(Ordering::SeqCst)
    }

    /// Number of writers currently attached.
    pub fn writer_count(&self) -> u32 {
        self.inner.writer_count.load(Ordering::SeqCst)
    }

    /// Flush and close. Refuses while any reader or writer is still
    /// attached.
    pub fn close(&self) -> Result<()> {
        if !self.inner.open.get() {
            return Ok(());
        }
        let readers = self.reader_count();
        let writers = self.writer_count();
        if readers != 0 || writers != 0 {
            return Err(Error::FileInUse { readers, writers });
        }
        self.inner.file.borrow_mut().flush()?;
        self.inner.open.set(false);
        Ok(())
    }

    pub(crate) fn check_open(&self) -> Result<()> {
        if !self.is_open() {
            return Err(Error::ImageFileNotOpen);
        }
        Ok(())
    }

    pub(crate) fn file(&self) -> &RefCell<CheckedFile> {
        &self.inner.file
    }

    /// Logical offset where a new binary section may start: past the file
    /// header and past everything written so far.
    pub(crate) fn end_of_data(&self) -> u64 {
        self.inner
            .file
            .borrow()
            .length(OffsetKind::Logical)
            .max(IMAGE_HEADER_SIZE)
    }

    pub(crate) fn incr_reader_count(&self) {
        self.inner.reader_count.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn decr_reader_count(&self) {
        self.inner.reader_count.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn incr_writer_count(&self) {
        self.inner.writer_count.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn decr_writer_count(&self) {
        self.inner.writer_count.fetch_sub(1, Ordering::SeqCst);
    }
}
