//! Read-through packet cache.
//!
//! Packets are keyed by the logical offset of their first header byte. A hit
//! hands back a shared handle to the cached bytes; a miss reads the packet
//! header from the file to learn the full length, pulls the whole packet in,
//! and caches it. Eviction is LRU over a small fixed capacity.
//!
//! The handle returned by [`PacketCache::lock`] is the pin of the design:
//! it is an `Rc`, so the backing bytes stay valid for as long as any holder
//! keeps it, even if the cache evicts the entry underneath. The engine never
//! holds more than two pins at once.

use std::num::NonZeroUsize;
use std::rc::Rc;

use lru::LruCache;
use tracing::trace;

use crate::checked_file::OffsetKind;
use crate::error::Result;
use crate::imagefile::ImageFile;
use crate::packet::{DataPacket, PacketHeader, PACKET_HEADER_SIZE};

/// Default number of packets kept resident.
pub const DEFAULT_CACHE_CAPACITY: usize = 32;

/// One cached packet: its parsed header plus the complete packet bytes,
/// header included.
pub struct CachedPacket {
    pub header: PacketHeader,
    pub offset: u64,
    bytes: Vec<u8>,
}

impl CachedPacket {
    /// Raw packet bytes, header included.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Interpret this packet as a data packet.
    pub fn data(&self) -> Result<DataPacket<'_>> {
        DataPacket::parse(&self.bytes, self.offset)
    }
}

pub struct PacketCache {
    file: ImageFile,
    entries: LruCache<u64, Rc<CachedPacket>>,
}

impl PacketCache {
    pub fn new(file: ImageFile, capacity: usize) -> Self {
        Self {
            file,
            entries: LruCache::new(NonZeroUsize::new(capacity.max(1)).unwrap()),
        }
    }

    /// Pin the packet starting at `logical_offset`, reading it from the file
    /// on a miss.
    pub fn lock(&mut self, logical_offset: u64) -> Result<Rc<CachedPacket>> {
        if let Some(entry) = self.entries.get(&logical_offset) {
            return Ok(Rc::clone(entry));
        }

        let packet = Rc::new(self.read_packet(logical_offset)?);
        trace!(offset = logical_offset, length = packet.header.logical_length(), "packet cache miss");
        self.entries.put(logical_offset, Rc::clone(&packet));
        Ok(packet)
    }

    /// Drop every unpinned entry. Held pins keep their bytes alive.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn read_packet(&mut self, logical_offset: u64) -> Result<CachedPacket> {
        let mut file = self.file.file().borrow_mut();

        file.seek(logical_offset, OffsetKind::Logical)?;
        let mut header_buf = [0u8; PACKET_HEADER_SIZE as usize];
        file.read(&mut header_buf)?;
        let header = PacketHeader::from_bytes(&header_buf, logical_offset)?;

        let length = header.logical_length() as usize;
        if length < PACKET_HEADER_SIZE as usize {
            return Err(crate::error::Error::BadCvPacket {
                offset: logical_offset,
                reason: format!("declared packet length {} is shorter than the header", length),
            });
        }
        let mut bytes = vec![0u8; length];
        bytes[..PACKET_HEADER_SIZE as usize].copy_from_slice(&header_buf);
        file.seek(logical_offset + PACKET_HEADER_SIZE, OffsetKind::Logical)?;
        file.read(&mut bytes[PACKET_HEADER_SIZE as usize..])?;

        Ok(CachedPacket {
            header,
            offset: logical_offset,
            bytes,
        })
    }
}
