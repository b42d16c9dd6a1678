//! Streaming writer for a compressed-vector section.
//!
//! # Write contract
//! Call [`write`](Writer::write) any number of times; each call consumes
//! that many records from the front of every bound buffer and feeds them
//! through the per-bytestream encoders. Whenever the queued encoder output
//! would fill a packet, a data packet is emitted with the queued bytes
//! concatenated in bytestream-number order. Call [`close`](Writer::close)
//! to flush the encoders, emit the trailing packet, and patch the section
//! header in place with the final lengths and record count.
//!
//! # Section layout written
//! ```text
//! [SECTION HEADER: 40 bytes placeholder]
//! [DATA PACKET] [DATA PACKET] ...
//! ← seek back to the section start, overwrite the header with real values
//! ```

use tracing::debug;

use crate::buffer::SourceDestBuffer;
use crate::checked_file::OffsetKind;
use crate::codec::Encoder;
use crate::codecs;
use crate::cvnode::CompressedVectorNode;
use crate::error::{Error, Result};
use crate::packet::{build_data_packet, SectionHeader, MAX_PACKET_SIZE, SECTION_HEADER_SIZE};

/// Records fed per encoder pass; bounds encoder queue growth between packet
/// emissions.
const FEED_CHUNK: usize = 1024;

struct EncodeChannel {
    encoder: Box<dyn Encoder>,
    bytestream: usize,
}

pub struct Writer {
    node: CompressedVectorNode,
    dbufs: Vec<SourceDestBuffer>,
    /// Sorted by bytestream number, which is also packet payload order.
    channels: Vec<EncodeChannel>,
    section_start: u64,
    /// Logical offset the next packet will be written at.
    next_packet_offset: u64,
    record_count: u64,
    packets_emitted: u64,
    validated: bool,
    open: bool,
    attached: bool,
}

impl Writer {
    /// Bind buffers for writing. Unlike a reader, a writer must bind every
    /// terminal of the prototype; each record needs a value per field.
    pub fn new(node: CompressedVectorNode, dbufs: &[SourceDestBuffer]) -> Result<Self> {
        let file = node.file().clone();
        file.check_open()?;
        if !file.is_writable() {
            return Err(Error::FileReadOnly);
        }
        if dbufs.is_empty() {
            return Err(Error::BadApiArgument("empty buffer list".into()));
        }

        let proto = node.prototype();
        proto.check_buffers(dbufs, false)?;

        let mut bound = Vec::with_capacity(dbufs.len());
        for dbuf in dbufs {
            let id = proto.get(&dbuf.path_name())?;
            let bytestream = proto
                .find_terminal_position(id)
                .ok_or_else(|| Error::Internal(format!("{} has no bytestream", dbuf.path_name())))?
                as usize;
            let encoder = codecs::encoder_for(proto.kind(id), dbuf)?;
            bound.push((bytestream, dbuf.clone(), encoder));
        }
        bound.sort_by_key(|(bytestream, ..)| *bytestream);

        let mut dbufs_in_stream_order = Vec::with_capacity(bound.len());
        let mut channels = Vec::with_capacity(bound.len());
        for (bytestream, dbuf, encoder) in bound {
            dbufs_in_stream_order.push(dbuf);
            channels.push(EncodeChannel { encoder, bytestream });
        }

        // The per-packet stream table must leave room for payload bytes.
        if 6 + 2 * channels.len() >= MAX_PACKET_SIZE as usize {
            return Err(Error::BadApiArgument(format!(
                "{} bytestreams cannot share one packet",
                channels.len()
            )));
        }

        let section_start = file.end_of_data();
        {
            let mut f = file.file().borrow_mut();
            f.seek(section_start, OffsetKind::Logical)?;
            f.write(&[0u8; SECTION_HEADER_SIZE as usize])?;
        }

        file.incr_writer_count();
        Ok(Self {
            node,
            dbufs: dbufs_in_stream_order,
            channels,
            section_start,
            next_packet_offset: section_start + SECTION_HEADER_SIZE,
            record_count: 0,
            packets_emitted: 0,
            validated: false,
            open: true,
            attached: true,
        })
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Feed `num_records` records from the front of every bound buffer.
    pub fn write(&mut self, num_records: usize) -> Result<()> {
        self.node.file().check_open()?;
        if !self.open {
            return Err(Error::WriterNotOpen);
        }
        for dbuf in &self.dbufs {
            if num_records > dbuf.capacity() {
                return Err(Error::BadApiArgument(format!(
                    "{} records requested, buffer {} holds {}",
                    num_records,
                    dbuf.path_name(),
                    dbuf.capacity()
                )));
            }
        }
        match self.write_inner(num_records) {
            Ok(()) => Ok(()),
            Err(e) => {
                // The section is in an undefined state; refuse everything
                // except close from here on.
                self.open = false;
                Err(e)
            }
        }
    }

    /// Flush everything, patch the section header, publish the section to
    /// the node, and detach from the file. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if !self.attached {
            self.open = false;
            return Ok(());
        }
        let result = if self.open { self.finalize() } else { Ok(()) };
        self.node.file().decr_writer_count();
        self.attached = false;
        self.open = false;
        result
    }

    fn write_inner(&mut self, num_records: usize) -> Result<()> {
        if !self.validated {
            for channel in &self.channels {
                channel.encoder.validate()?;
            }
            self.validated = true;
        }
        for dbuf in &self.dbufs {
            dbuf.rewind();
        }

        let mut fed = 0;
        while fed < num_records {
            let limit = (fed + FEED_CHUNK).min(num_records);
            for channel in &mut self.channels {
                channel.encoder.feed(limit)?;
            }
            fed = limit;

            while self.total_queued() >= self.packet_payload_budget() {
                self.emit_packet()?;
            }
        }

        self.record_count += num_records as u64;
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        for channel in &mut self.channels {
            channel.encoder.flush()?;
        }
        while self.total_queued() > 0 {
            self.emit_packet()?;
        }
        // A section always holds at least one data packet, so a reader has
        // something to seed its channels from.
        if self.packets_emitted == 0 {
            self.emit_packet()?;
        }

        for channel in &self.channels {
            if channel.encoder.records_consumed() != self.record_count {
                return Err(Error::Internal(format!(
                    "stream {} consumed {} of {} records",
                    channel.bytestream,
                    channel.encoder.records_consumed(),
                    self.record_count
                )));
            }
        }

        let header = {
            let file = self.node.file().file().borrow();
            SectionHeader {
                section_logical_length: self.next_packet_offset - self.section_start,
                data_physical_offset: file
                    .logical_to_physical(self.section_start + SECTION_HEADER_SIZE),
                index_physical_offset: 0,
                record_count: self.record_count,
            }
        };
        {
            let mut file = self.node.file().file().borrow_mut();
            file.seek(self.section_start, OffsetKind::Logical)?;
            file.write(&header.to_bytes())?;
            file.flush()?;
        }

        debug!(
            section_start = self.section_start,
            records = self.record_count,
            packets = self.packets_emitted,
            "compressed-vector section sealed"
        );
        self.node.set_section(self.section_start, self.record_count);
        Ok(())
    }

    fn total_queued(&self) -> usize {
        self.channels.iter().map(|c| c.encoder.queued_bytes()).sum()
    }

    /// Payload bytes that fit one packet beside its header and per-stream
    /// length table.
    fn packet_payload_budget(&self) -> usize {
        MAX_PACKET_SIZE as usize - 6 - 2 * self.channels.len()
    }

    /// Emit one data packet from the queued encoder output, greedily in
    /// bytestream order. Streams whose queue does not fit simply spill into
    /// later packets; reader channels track their packets independently.
    fn emit_packet(&mut self) -> Result<()> {
        let mut remaining = self.packet_payload_budget();
        let mut payloads = Vec::with_capacity(self.channels.len());
        for channel in &mut self.channels {
            let mut payload = Vec::new();
            let take = remaining.min(u16::MAX as usize);
            remaining -= channel.encoder.drain(take, &mut payload);
            payloads.push(payload);
        }

        let bytes = build_data_packet(&payloads)?;
        {
            let mut file = self.node.file().file().borrow_mut();
            file.seek(self.next_packet_offset, OffsetKind::Logical)?;
            file.write(&bytes)?;
        }
        debug!(
            offset = self.next_packet_offset,
            length = bytes.len(),
            "emitted data packet"
        );
        self.next_packet_offset += bytes.len() as u64;
        self.packets_emitted += 1;
        Ok(())
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
