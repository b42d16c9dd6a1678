//! Streaming reader over a compressed-vector section.
//!
//! One decode channel per bound buffer couples a decoder with cursor state
//! over the packet stream. Channels move through the section independently:
//! a packet may satisfy one channel with a handful of bytes while another
//! channel needs ten packets for the same record range, so each channel
//! remembers which packet it is draining and how far into its slice it got.
//!
//! The pull loop always feeds the earliest packet some live channel still
//! needs. That bounds the working set (at most two packets are pinned at
//! any instant) and guarantees every channel makes forward progress instead
//! of one channel racing ahead and churning the cache.

use tracing::debug;

use crate::buffer::SourceDestBuffer;
use crate::cache::{PacketCache, DEFAULT_CACHE_CAPACITY};
use crate::checked_file::OffsetKind;
use crate::codec::Decoder;
use crate::codecs;
use crate::cvnode::CompressedVectorNode;
use crate::error::{Error, Result};
use crate::packet::{SectionHeader, DATA_PACKET, SECTION_HEADER_SIZE};

struct DecodeChannel {
    sdb: SourceDestBuffer,
    decoder: Box<dyn Decoder>,
    bytestream: usize,
    /// Offset of the packet this channel is currently draining.
    current_packet_logical_offset: u64,
    /// Bytes already consumed from this channel's slice of that packet.
    current_bytestream_buffer_index: u64,
    /// Total slice length for this channel in that packet.
    current_bytestream_buffer_length: u64,
    /// Sticky: the channel drained its final slice at the section end.
    input_finished: bool,
}

impl DecodeChannel {
    fn is_output_blocked(&self) -> bool {
        self.sdb.is_full()
    }

    fn is_input_blocked(&self) -> bool {
        self.current_bytestream_buffer_index >= self.current_bytestream_buffer_length
    }

    /// True when this channel has nothing left to do with the packet at
    /// `offset`: it already moved past it, or its output has no room.
    fn already_read_packet(&self, offset: u64) -> bool {
        self.current_packet_logical_offset != offset || self.is_output_blocked()
    }
}

pub struct Reader {
    node: CompressedVectorNode,
    dbufs: Vec<SourceDestBuffer>,
    channels: Vec<DecodeChannel>,
    cache: PacketCache,
    section_end_logical_offset: u64,
    validated: bool,
    open: bool,
    attached: bool,
}

impl Reader {
    /// Bind buffers to a written compressed vector and position every
    /// channel at the first data packet.
    pub fn new(node: CompressedVectorNode, dbufs: &[SourceDestBuffer]) -> Result<Self> {
        node.file().check_open()?;
        if dbufs.is_empty() {
            return Err(Error::BadApiArgument("empty buffer list".into()));
        }

        let proto = node.prototype();
        proto.check_buffers(dbufs, true)?;

        let section_start = node.binary_section_start();
        if section_start == 0 {
            return Err(Error::Internal(
                "compressed vector was never written".into(),
            ));
        }

        let header = {
            let mut file = node.file().file().borrow_mut();
            file.seek(section_start, OffsetKind::Logical)?;
            let mut buf = [0u8; SECTION_HEADER_SIZE as usize];
            file.read(&mut buf)?;
            SectionHeader::from_bytes(&buf, section_start)?
        };
        let section_end_logical_offset = section_start + header.section_logical_length;
        let max_records = header.record_count;

        let mut channels = Vec::with_capacity(dbufs.len());
        for dbuf in dbufs {
            let id = proto.get(&dbuf.path_name())?;
            let bytestream = proto
                .find_terminal_position(id)
                .ok_or_else(|| Error::Internal(format!("{} has no bytestream", dbuf.path_name())))?
                as usize;
            let decoder = codecs::decoder_for(proto.kind(id), dbuf, max_records)?;
            channels.push(DecodeChannel {
                sdb: dbuf.clone(),
                decoder,
                bytestream,
                current_packet_logical_offset: 0,
                current_bytestream_buffer_index: 0,
                current_bytestream_buffer_length: 0,
                input_finished: false,
            });
        }

        let mut cache = PacketCache::new(node.file().clone(), DEFAULT_CACHE_CAPACITY);

        // Seed every channel from the first data packet.
        let data_logical = {
            let file = node.file().file().borrow();
            file.physical_to_logical(header.data_physical_offset)
        };
        {
            let packet = cache.lock(data_logical)?;
            if packet.header.kind != DATA_PACKET {
                return Err(Error::BadCvPacket {
                    offset: data_logical,
                    reason: format!("first packet has kind {}", packet.header.kind),
                });
            }
            let view = packet.data()?;
            for channel in &mut channels {
                channel.current_packet_logical_offset = data_logical;
                channel.current_bytestream_buffer_index = 0;
                channel.current_bytestream_buffer_length =
                    view.payload_length(channel.bytestream) as u64;
            }
        }

        node.file().incr_reader_count();
        Ok(Self {
            node,
            dbufs: dbufs.to_vec(),
            channels,
            cache,
            section_end_logical_offset,
            validated: false,
            open: true,
            attached: true,
        })
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Fill the bound buffers with the next run of records.
    ///
    /// Returns how many records landed in every buffer; less than capacity
    /// only at the end of the section, and 0 once the section is exhausted.
    pub fn read(&mut self) -> Result<u64> {
        self.node.file().check_open()?;
        if !self.open {
            return Err(Error::ReaderNotOpen);
        }
        match self.read_inner() {
            Ok(count) => Ok(count),
            Err(e) => {
                // Buffer contents are undefined past a failed read; refuse
                // everything except close from here on.
                self.open = false;
                Err(e)
            }
        }
    }

    /// Rebind buffers, then read. The new list must match the original one
    /// buffer-for-buffer in path, representation, capacity, and stride;
    /// only the backing memory may differ.
    pub fn read_with(&mut self, dbufs: &[SourceDestBuffer]) -> Result<u64> {
        self.node.file().check_open()?;
        if !self.open {
            return Err(Error::ReaderNotOpen);
        }
        self.set_buffers(dbufs)?;
        self.read()
    }

    /// Random access is not part of the forward-streaming design.
    pub fn seek(&mut self, _record_number: u64) -> Result<()> {
        Err(Error::NotImplemented)
    }

    /// Release the reader's attachment to the file. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.attached {
            self.node.file().decr_reader_count();
            self.attached = false;
            self.channels.clear();
            self.cache.clear();
        }
        self.open = false;
        Ok(())
    }

    fn set_buffers(&mut self, dbufs: &[SourceDestBuffer]) -> Result<()> {
        self.node.prototype().check_buffers(dbufs, true)?;
        if dbufs.len() != self.dbufs.len() {
            return Err(Error::BuffersNotCompatible(format!(
                "old count {} new count {}",
                self.dbufs.len(),
                dbufs.len()
            )));
        }
        for (old, new) in self.dbufs.iter().zip(dbufs) {
            old.check_compatible(new)?;
        }
        for (old, new) in self.dbufs.iter().zip(dbufs) {
            old.adopt_region(new);
        }
        Ok(())
    }

    fn read_inner(&mut self) -> Result<u64> {
        if !self.validated {
            for channel in &self.channels {
                channel.decoder.validate()?;
            }
            self.validated = true;
        }

        for dbuf in &self.dbufs {
            dbuf.rewind();
        }

        // Let decoders spill queued values into the freshly emptied buffers
        // before any packet is touched; channel hunger tests below depend
        // on the cursors this moves.
        for channel in &mut self.channels {
            channel.decoder.input_process(&[])?;
        }

        loop {
            let Some(earliest) = self.earliest_packet_needed_for_input() else {
                break;
            };
            self.feed_packet_to_decoders(earliest)?;
        }

        // Every channel must have produced the same number of records.
        let count = self.channels[0].sdb.next_index();
        for channel in &self.channels[1..] {
            if channel.sdb.next_index() != count {
                return Err(Error::Internal(format!(
                    "stream {} produced {} records, stream {} produced {}",
                    self.channels[0].bytestream,
                    count,
                    channel.bytestream,
                    channel.sdb.next_index()
                )));
            }
        }
        Ok(count as u64)
    }

    /// Smallest packet offset among channels that can still make progress.
    fn earliest_packet_needed_for_input(&self) -> Option<u64> {
        self.channels
            .iter()
            .filter(|c| !c.is_output_blocked() && !c.input_finished)
            .map(|c| c.current_packet_logical_offset)
            .min()
    }

    fn feed_packet_to_decoders(&mut self, offset: u64) -> Result<()> {
        let packet = self.cache.lock(offset)?;
        if packet.header.kind != DATA_PACKET {
            return Err(Error::Internal(format!(
                "fed packet of kind {} at offset {}",
                packet.header.kind, offset
            )));
        }
        let view = packet.data()?;

        let mut any_exhausted = false;
        let mut next_offset = 0u64;

        for channel in &mut self.channels {
            if channel.already_read_packet(offset) {
                continue;
            }

            let slice_length = view.payload_length(channel.bytestream) as u64;
            if channel.current_bytestream_buffer_index > slice_length {
                return Err(Error::Internal(format!(
                    "stream {} consumed {} of a {}-byte slice",
                    channel.bytestream, channel.current_bytestream_buffer_index, slice_length
                )));
            }

            let uneaten =
                &view.bytestream(channel.bytestream)[channel.current_bytestream_buffer_index as usize..];
            let processed = channel.decoder.input_process(uneaten)?;
            channel.current_bytestream_buffer_index += processed as u64;

            if channel.is_input_blocked() {
                any_exhausted = true;
                next_offset = offset + packet.header.logical_length();
            }
        }

        if !any_exhausted {
            return Ok(());
        }

        // Some channel drained its slice: move every channel still parked
        // on this packet to the next data packet, or mark it finished when
        // the section ends first.
        match self.find_next_data_packet(next_offset)? {
            Some(next) => {
                let next_packet = self.cache.lock(next)?;
                let next_view = next_packet.data()?;
                debug!(from = offset, to = next, "advancing channels");
                for channel in &mut self.channels {
                    if channel.already_read_packet(offset) {
                        continue;
                    }
                    channel.current_packet_logical_offset = next;
                    channel.current_bytestream_buffer_index = 0;
                    // A zero-length slice here is fine; the next loop turn
                    // walks this channel past the packet.
                    channel.current_bytestream_buffer_length =
                        next_view.payload_length(channel.bytestream) as u64;
                }
            }
            None => {
                debug!(after = offset, "section end reached");
                for channel in &mut self.channels {
                    if channel.already_read_packet(offset) {
                        continue;
                    }
                    channel.input_finished = true;
                }
            }
        }
        Ok(())
    }

    /// Walk forward from `offset`, skipping index and ignored packets, to
    /// the next data packet inside the section.
    fn find_next_data_packet(&mut self, mut offset: u64) -> Result<Option<u64>> {
        while offset < self.section_end_logical_offset {
            let packet = self.cache.lock(offset)?;
            if packet.header.kind == DATA_PACKET {
                return Ok(Some(offset));
            }
            offset += packet.header.logical_length();
        }
        Ok(None)
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
