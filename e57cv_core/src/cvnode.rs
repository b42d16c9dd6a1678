//! Compressed-vector node: the handle that ties a prototype to a binary
//! section of an image file.

use std::cell::Cell;
use std::rc::Rc;

use crate::buffer::SourceDestBuffer;
use crate::error::{Error, Result};
use crate::imagefile::ImageFile;
use crate::prototype::Prototype;
use crate::reader::Reader;
use crate::writer::Writer;

struct CvInner {
    file: ImageFile,
    prototype: Prototype,
    /// Logical offset of the section header; 0 means the vector has never
    /// been written.
    section_start: Cell<u64>,
    record_count: Cell<u64>,
}

#[derive(Clone)]
pub struct CompressedVectorNode {
    inner: Rc<CvInner>,
}

impl CompressedVectorNode {
    pub fn new(file: &ImageFile, prototype: Prototype) -> Result<Self> {
        file.check_open()?;
        if prototype.terminal_count() == 0 {
            return Err(Error::BadApiArgument(
                "prototype has no terminal fields".into(),
            ));
        }
        Ok(Self {
            inner: Rc::new(CvInner {
                file: file.clone(),
                prototype,
                section_start: Cell::new(0),
                record_count: Cell::new(0),
            }),
        })
    }

    pub fn prototype(&self) -> &Prototype {
        &self.inner.prototype
    }

    pub fn file(&self) -> &ImageFile {
        &self.inner.file
    }

    /// Records in the section, as published by the writer that produced it.
    pub fn record_count(&self) -> u64 {
        self.inner.record_count.get()
    }

    /// Logical start of the binary section; 0 until a writer closes.
    pub fn binary_section_start(&self) -> u64 {
        self.inner.section_start.get()
    }

    /// Point this node at an already-written section, e.g. after reopening
    /// a file. The record count is recovered from the section header when a
    /// reader opens.
    pub fn attach_section(&self, logical_start: u64) {
        self.inner.section_start.set(logical_start);
    }

    pub(crate) fn set_section(&self, logical_start: u64, record_count: u64) {
        self.inner.section_start.set(logical_start);
        self.inner.record_count.set(record_count);
    }

    /// Open a streaming reader over this vector's section.
    pub fn reader(&self, dbufs: &[SourceDestBuffer]) -> Result<Reader> {
        Reader::new(self.clone(), dbufs)
    }

    /// Open a streaming writer that will append a new section.
    pub fn writer(&self, dbufs: &[SourceDestBuffer]) -> Result<Writer> {
        Writer::new(self.clone(), dbufs)
    }
}
